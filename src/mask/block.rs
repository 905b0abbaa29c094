use burn::prelude::{Backend, Bool, Tensor};
use burn::tensor::TensorData;
use rand::Rng;

use crate::mask::MaskingStrategy;

/// Hides one random rectangle per example.
#[derive(Clone)]
pub struct BlockMask;

#[derive(Clone, Debug)]
pub struct BlockMaskConfig {
    /// Smallest block side as a fraction of the grid side.
    pub min_fraction: f32,
    /// Largest block side as a fraction of the grid side.
    pub max_fraction: f32,
}

impl Default for BlockMaskConfig {
    fn default() -> Self {
        Self {
            min_fraction: 0.25,
            max_fraction: 0.5,
        }
    }
}

impl BlockMaskConfig {
    fn side_range(&self, side: usize) -> (usize, usize) {
        let bound = |fraction: f32| ((fraction * side as f32).round() as usize).clamp(1, side);
        let low = bound(self.min_fraction);
        let high = bound(self.max_fraction).max(low);

        (low, high)
    }
}

impl<B: Backend> MaskingStrategy<B> for BlockMask {
    type Config = BlockMaskConfig;

    fn known_positions<R: Rng>(
        [batch, height, width]: [usize; 3],
        config: &Self::Config,
        rng: &mut R,
        device: &B::Device,
    ) -> Tensor<B, 3, Bool> {
        let (min_rows, max_rows) = config.side_range(height);
        let (min_cols, max_cols) = config.side_range(width);

        let mut known = vec![true; batch * height * width];
        for grid in known.chunks_mut(height * width) {
            let rows = rng.gen_range(min_rows..=max_rows);
            let cols = rng.gen_range(min_cols..=max_cols);
            let top = rng.gen_range(0..=height - rows);
            let left = rng.gen_range(0..=width - cols);

            for row in top..top + rows {
                grid[row * width + left..row * width + left + cols].fill(false);
            }
        }

        Tensor::from_data(TensorData::new(known, [batch, height, width]), device)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use burn::prelude::Int;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    type B = NdArray;

    #[test]
    fn hides_one_rectangle_per_example() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(11);
        let config = BlockMaskConfig::default();

        let known = <BlockMask as MaskingStrategy<B>>::known_positions([4, 8, 8], &config, &mut rng, &device);
        let known = known.into_data().iter::<bool>().collect::<Vec<_>>();

        for grid in known.chunks(64) {
            let hidden = (0..64).filter(|&i| !grid[i]).collect::<Vec<_>>();
            let rows = hidden.iter().map(|i| i / 8).collect::<Vec<_>>();
            let cols = hidden.iter().map(|i| i % 8).collect::<Vec<_>>();

            let height = rows.iter().max().unwrap() - rows.iter().min().unwrap() + 1;
            let width = cols.iter().max().unwrap() - cols.iter().min().unwrap() + 1;

            assert_eq!(hidden.len(), height * width, "hidden cells are not a rectangle");
            assert!((2..=4).contains(&height));
            assert!((2..=4).contains(&width));
        }
    }

    #[test]
    fn masked_codes_are_zeroed() {
        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(5);
        let codes = Tensor::<B, 3, Int>::ones([2, 4, 4], &device) * 3;

        let context = BlockMask::mask_codes(codes, &BlockMaskConfig::default(), &mut rng);
        let known = context.known.into_data().iter::<bool>().collect::<Vec<_>>();
        let codes = context.codes.into_data().iter::<i64>().collect::<Vec<_>>();

        for (known, code) in known.iter().zip(codes) {
            assert_eq!(code, if *known { 3 } else { 0 });
        }
    }
}
