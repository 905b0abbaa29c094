//! Stage 1: fitting an autoencoder to images.

use burn::prelude::{Backend, ElementConversion, Tensor};
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{Adaptor, LossInput};
use burn::train::{TrainOutput, TrainStep, ValidStep};

use crate::data::ImageBatch;
use crate::metric::history::LossHistoryInput;
use crate::metric::loss_terms::{LossTermInput, ReconstructionLossInput, RegularizerInput};
use crate::metric::perplexity::PerplexityInput;
use crate::model::autoencoder::{ConvolutionalAe, ConvolutionalVae, VaeOutput};
use crate::model::loss::{mse_loss, vae_loss, VaeLoss};
use crate::model::vqvae::{VqVae, VqVaeOutput};

pub struct ReconstructionOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub reconstruction_loss: Tensor<B, 1>,
    /// Commitment loss (VQ-VAE), KL divergence (VAE) or zero.
    pub regularizer: Tensor<B, 1>,
    pub perplexity: Option<Tensor<B, 1>>,
    pub batch_size: usize,
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_scalar().elem::<f32>()
}

impl<B: Backend> Adaptor<LossInput<B>> for ReconstructionOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

impl<B: Backend> Adaptor<LossHistoryInput> for ReconstructionOutput<B> {
    fn adapt(&self) -> LossHistoryInput {
        LossHistoryInput {
            value: scalar(&self.loss) as f64,
            batch_size: self.batch_size,
        }
    }
}

impl<B: Backend> Adaptor<ReconstructionLossInput> for ReconstructionOutput<B> {
    fn adapt(&self) -> ReconstructionLossInput {
        ReconstructionLossInput(LossTermInput {
            value: scalar(&self.reconstruction_loss),
            batch_size: self.batch_size,
        })
    }
}

impl<B: Backend> Adaptor<RegularizerInput> for ReconstructionOutput<B> {
    fn adapt(&self) -> RegularizerInput {
        RegularizerInput(LossTermInput {
            value: scalar(&self.regularizer),
            batch_size: self.batch_size,
        })
    }
}

impl<B: Backend> Adaptor<PerplexityInput> for ReconstructionOutput<B> {
    fn adapt(&self) -> PerplexityInput {
        PerplexityInput {
            value: self.perplexity.as_ref().map(scalar).unwrap_or(0.0),
            batch_size: self.batch_size,
        }
    }
}

/// Loss of reconstructing a batch of images.
pub trait Reconstruction<B: Backend> {
    fn reconstruction_step(&self, images: Tensor<B, 4>) -> ReconstructionOutput<B>;
}

impl<B: Backend> Reconstruction<B> for VqVae<B> {
    fn reconstruction_step(&self, images: Tensor<B, 4>) -> ReconstructionOutput<B> {
        let batch_size = images.dims()[0];
        let VqVaeOutput {
            reconstruction,
            commitment_loss,
            perplexity,
            ..
        } = self.forward(images.clone());

        let reconstruction_loss = mse_loss(reconstruction, images, false);

        ReconstructionOutput {
            loss: reconstruction_loss.clone() + commitment_loss.clone(),
            reconstruction_loss,
            regularizer: commitment_loss,
            perplexity: Some(perplexity),
            batch_size,
        }
    }
}

impl<B: Backend> Reconstruction<B> for ConvolutionalAe<B> {
    fn reconstruction_step(&self, images: Tensor<B, 4>) -> ReconstructionOutput<B> {
        let batch_size = images.dims()[0];
        let reconstruction_loss = mse_loss(self.forward(images.clone()), images, false);

        ReconstructionOutput {
            loss: reconstruction_loss.clone(),
            regularizer: reconstruction_loss.zeros_like(),
            reconstruction_loss,
            perplexity: None,
            batch_size,
        }
    }
}

impl<B: Backend> Reconstruction<B> for ConvolutionalVae<B> {
    fn reconstruction_step(&self, images: Tensor<B, 4>) -> ReconstructionOutput<B> {
        let batch_size = images.dims()[0];
        let VaeOutput {
            reconstruction,
            mu,
            log_var,
        } = self.forward(images.clone());

        let VaeLoss {
            total,
            reconstruction,
            kl,
        } = vae_loss(reconstruction, images, mu, log_var, self.loss_weights());

        ReconstructionOutput {
            loss: total,
            reconstruction_loss: reconstruction,
            regularizer: kl,
            perplexity: None,
            batch_size,
        }
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ReconstructionOutput<B>> for VqVae<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ReconstructionOutput<B>> {
        let output = self.reconstruction_step(batch.images);
        TrainOutput::new(self, output.loss.backward(), output)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ReconstructionOutput<B>> for VqVae<B> {
    fn step(&self, batch: ImageBatch<B>) -> ReconstructionOutput<B> {
        self.reconstruction_step(batch.images)
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ReconstructionOutput<B>> for ConvolutionalAe<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ReconstructionOutput<B>> {
        let output = self.reconstruction_step(batch.images);
        TrainOutput::new(self, output.loss.backward(), output)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ReconstructionOutput<B>> for ConvolutionalAe<B> {
    fn step(&self, batch: ImageBatch<B>) -> ReconstructionOutput<B> {
        self.reconstruction_step(batch.images)
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ReconstructionOutput<B>> for ConvolutionalVae<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ReconstructionOutput<B>> {
        let output = self.reconstruction_step(batch.images);
        TrainOutput::new(self, output.loss.backward(), output)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ReconstructionOutput<B>> for ConvolutionalVae<B> {
    fn step(&self, batch: ImageBatch<B>) -> ReconstructionOutput<B> {
        self.reconstruction_step(batch.images)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    use super::*;
    use crate::model::autoencoder::AutoencoderConfig;
    use crate::model::vqvae::VqVaeConfig;

    type AB = Autodiff<NdArray>;

    fn batch(device: &<AB as Backend>::Device) -> ImageBatch<AB> {
        ImageBatch {
            names: vec!["a".into(), "b".into()],
            images: Tensor::random([2, 3, 8, 8], Distribution::Default, device),
        }
    }

    #[test]
    fn vqvae_step_reports_all_terms() {
        let device = Default::default();
        let model = VqVaeConfig::new()
            .with_max_filters(8)
            .with_num_layers(2)
            .with_input_image_dimensions(8)
            .with_embedding_dim(4)
            .with_num_embeddings(6)
            .init::<AB>(&device)
            .unwrap();

        let output = TrainStep::step(&model, batch(&device)).item;
        let loss = scalar(&output.loss);
        let parts = scalar(&output.reconstruction_loss) + scalar(&output.regularizer);

        assert!((loss - parts).abs() < 1e-5);
        assert!(output.perplexity.is_some());
        assert_eq!(output.batch_size, 2);
    }

    #[test]
    fn vae_step_uses_configured_weights() {
        let device = Default::default();
        let model = AutoencoderConfig::new()
            .with_max_filters(8)
            .with_num_layers(2)
            .with_latent_dim(3)
            .with_input_image_dimensions(8)
            .with_kl_weight(0.0)
            .init_vae::<AB>(&device)
            .unwrap();

        let output = ValidStep::step(&model, batch(&device));
        let loss = scalar(&output.loss);

        assert!((loss - scalar(&output.reconstruction_loss)).abs() < 1e-4);
        assert!(scalar(&output.regularizer) >= 0.0);
    }

    #[test]
    fn autoencoder_has_no_regularizer() {
        let device = Default::default();
        let model = AutoencoderConfig::new()
            .with_max_filters(8)
            .with_num_layers(2)
            .with_latent_dim(3)
            .with_input_image_dimensions(8)
            .init_ae::<AB>(&device)
            .unwrap();

        let output = TrainStep::step(&model, batch(&device)).item;
        assert_eq!(scalar(&output.regularizer), 0.0);
        assert!(output.perplexity.is_none());
    }
}
