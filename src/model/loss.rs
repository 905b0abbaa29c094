use std::f64::consts::LN_2;

use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::{Backend, Int};
use burn::tensor::Tensor;

pub fn mse_loss<B: Backend, const D: usize>(
    reconstruction: Tensor<B, D>,
    target: Tensor<B, D>,
    use_sum: bool,
) -> Tensor<B, 1> {
    let reduction = if use_sum { Reduction::Sum } else { Reduction::Mean };
    MseLoss::new().forward(reconstruction, target, reduction)
}

/// KL divergence of `N(mu, exp(log_var))` from the standard normal.
///
/// `log_var` is used as is; very large values overflow `exp`.
pub fn kl_divergence<B: Backend>(mu: Tensor<B, 2>, log_var: Tensor<B, 2>, use_sum: bool) -> Tensor<B, 1> {
    let inner = log_var.clone() + 1.0 - mu.powf_scalar(2.0) - log_var.exp();

    if use_sum {
        inner.sum() * -0.5
    } else {
        inner.sum_dim(1).mean() * -0.5
    }
}

/// KL divergence between two diagonal gaussians given as mean / log-variance.
pub fn kl_divergence_two_gaussians<B: Backend>(
    mu1: Tensor<B, 2>,
    log_var1: Tensor<B, 2>,
    mu2: Tensor<B, 2>,
    log_var2: Tensor<B, 2>,
    use_sum: bool,
) -> Tensor<B, 1> {
    let log_ratio = log_var1.clone() - log_var2.clone();
    let scaled = (log_var1.exp() + (mu1 - mu2).powf_scalar(2.0)) / log_var2.exp();
    let inner = log_ratio - scaled + 1.0;

    if use_sum {
        inner.sum() * -0.5
    } else {
        inner.sum_dim(1).mean() * -0.5
    }
}

#[derive(Clone, Copy, Debug)]
pub struct VaeLossWeights {
    pub use_sum: bool,
    pub reconstruction: f64,
    pub kl: f64,
}

impl Default for VaeLossWeights {
    fn default() -> Self {
        Self {
            use_sum: true,
            reconstruction: 1.0,
            kl: 1.0,
        }
    }
}

pub struct VaeLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub reconstruction: Tensor<B, 1>,
    pub kl: Tensor<B, 1>,
}

pub fn vae_loss<B: Backend>(
    reconstruction: Tensor<B, 4>,
    target: Tensor<B, 4>,
    mu: Tensor<B, 2>,
    log_var: Tensor<B, 2>,
    weights: VaeLossWeights,
) -> VaeLoss<B> {
    let reconstruction = mse_loss(reconstruction, target, weights.use_sum);
    let kl = kl_divergence(mu, log_var, weights.use_sum);

    VaeLoss {
        total: reconstruction.clone() * weights.reconstruction + kl.clone() * weights.kl,
        reconstruction,
        kl,
    }
}

/// Per-position class logits (N x K x H x W) and targets (N x H x W) as rows.
pub fn flatten_positions<B: Backend>(
    logits: Tensor<B, 4>,
    targets: Tensor<B, 3, Int>,
) -> (Tensor<B, 2>, Tensor<B, 1, Int>) {
    let [batch, classes, height, width] = logits.dims();
    let positions = batch * height * width;

    (
        logits.permute([0, 2, 3, 1]).reshape([positions, classes]),
        targets.reshape([positions]),
    )
}

/// Mean negative log-likelihood in nats converted to bits per dimension.
pub fn bits_per_dimension<B: Backend>(nll: Tensor<B, 1>) -> Tensor<B, 1> {
    nll / LN_2
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use burn::nn::loss::CrossEntropyLossConfig;
    use burn::tensor::{Distribution, TensorData};

    use super::*;

    type B = NdArray;

    #[test]
    fn kl_of_standard_normal_is_zero() {
        let device = Default::default();
        let mu = Tensor::<B, 2>::zeros([4, 3], &device);
        let log_var = Tensor::<B, 2>::zeros([4, 3], &device);

        assert!(kl_divergence(mu.clone(), log_var.clone(), true).into_scalar().abs() < 1e-6);
        assert!(kl_divergence_two_gaussians(mu.clone(), log_var.clone(), mu, log_var, false)
            .into_scalar()
            .abs()
            < 1e-6);
    }

    #[test]
    fn two_gaussian_kl_matches_standard_normal_case() {
        let device = Default::default();
        let mu = Tensor::<B, 2>::random([5, 2], Distribution::Normal(0.0, 1.0), &device);
        let log_var = Tensor::<B, 2>::random([5, 2], Distribution::Normal(0.0, 0.5), &device);
        let zeros = Tensor::<B, 2>::zeros([5, 2], &device);

        let expected = kl_divergence(mu.clone(), log_var.clone(), false);
        let actual = kl_divergence_two_gaussians(mu, log_var, zeros.clone(), zeros, false);

        actual.into_data().assert_approx_eq(&expected.into_data(), 4);
    }

    #[test]
    fn losses_are_non_negative() {
        let device = Default::default();
        let reconstruction = Tensor::<B, 4>::random([2, 3, 4, 4], Distribution::Default, &device);
        let target = Tensor::<B, 4>::random([2, 3, 4, 4], Distribution::Default, &device);
        let mu = Tensor::<B, 2>::random([2, 8], Distribution::Normal(0.0, 2.0), &device);
        let log_var = Tensor::<B, 2>::random([2, 8], Distribution::Normal(0.0, 1.0), &device);

        let loss = vae_loss(reconstruction, target, mu, log_var, VaeLossWeights::default());
        assert!(loss.reconstruction.into_scalar() >= 0.0);
        assert!(loss.kl.into_scalar() >= 0.0);
        assert!(loss.total.into_scalar() >= 0.0);

        let logits = Tensor::<B, 4>::random([2, 5, 3, 3], Distribution::Normal(0.0, 3.0), &device);
        let targets = Tensor::<B, 3, Int>::ones([2, 3, 3], &device);
        let (logits, targets) = flatten_positions(logits, targets);
        let cross_entropy = CrossEntropyLossConfig::new().init(&device).forward(logits, targets);

        assert!(cross_entropy.clone().into_scalar() >= 0.0);
        assert!(bits_per_dimension(cross_entropy).into_scalar() >= 0.0);
    }

    #[test]
    fn flatten_positions_keeps_class_rows() {
        let device = Default::default();
        // class c at position (h, w) holds 100c + 10h + w
        let values = (0..2)
            .flat_map(|c| (0..2).flat_map(move |h| (0..3).map(move |w| (100 * c + 10 * h + w) as f32)))
            .collect::<Vec<_>>();
        let logits = Tensor::<B, 4>::from_data(TensorData::new(values, [1, 2, 2, 3]), &device);
        let targets = Tensor::<B, 3, Int>::zeros([1, 2, 3], &device);

        let (rows, targets) = flatten_positions(logits, targets);
        assert_eq!(rows.dims(), [6, 2]);
        assert_eq!(targets.dims(), [6]);

        rows.slice([4..5, 0..2])
            .into_data()
            .assert_approx_eq(&TensorData::from([[11.0f32, 111.0]]), 4);
    }
}
