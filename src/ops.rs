use burn::prelude::{Backend, Tensor};

pub fn l2<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, 1> {
    let tensor = tensor.flatten::<1>(0, D - 1);
    let squared = tensor.powi_scalar(2);
    let summed = squared.sum();
    summed.sqrt()
}

/// Clamps pixel values into the displayable range.
pub fn unit_range<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    tensor.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    #[test]
    fn l2_flattens_all_dims() {
        let device = Default::default();
        let tensor = Tensor::<NdArray, 2>::from_floats([[3.0, 0.0], [0.0, 4.0]], &device);

        assert!((l2(tensor).into_scalar() - 5.0).abs() < 1e-6);
    }
}
