//! 64x64 sprite inpainting setup.

use crate::config::{AutoencoderExperiment, PriorExperiment, TrainingConfig};
use crate::model::autoencoder::AutoencoderConfig;
use crate::model::prior::inpainting::InpaintingPixelCnnConfig;
use crate::model::prior::pixelcnn::PixelCnnConfig;
use crate::model::vqvae::VqVaeConfig;

pub const IMAGE_SIZE: usize = 64;
pub const NUM_EMBEDDINGS: usize = 256;

pub fn vqvae() -> VqVaeConfig {
    VqVaeConfig::new()
        .with_input_image_dimensions(IMAGE_SIZE)
        .with_num_layers(1)
        .with_small_conv(true)
        .with_max_filters(512)
        .with_num_embeddings(NUM_EMBEDDINGS)
        .with_embedding_dim(32)
        .with_commitment_cost(0.25)
        .with_use_max_filters(true)
}

pub fn autoencoder() -> AutoencoderConfig {
    AutoencoderConfig::new()
        .with_input_image_dimensions(IMAGE_SIZE)
        .with_small_conv(true)
}

pub fn prior() -> InpaintingPixelCnnConfig {
    let backbone = PixelCnnConfig::new(NUM_EMBEDDINGS)
        .with_hidden_channels(128)
        .with_kernel_size(3)
        .with_use_dilation(true);

    InpaintingPixelCnnConfig::new(backbone)
}

pub fn training() -> TrainingConfig {
    TrainingConfig::new()
        .with_learning_rate(1e-4)
        .with_num_epochs(25)
        .with_batch_size(32)
        .with_num_workers(1)
        .with_seed(42)
        .with_image_size(IMAGE_SIZE)
        .with_num_sample_batches(5)
        .with_use_bits_per_dimension(false)
}

pub fn autoencoder_experiment() -> AutoencoderExperiment {
    AutoencoderExperiment::new(vqvae(), autoencoder(), training())
}

pub fn prior_experiment() -> PriorExperiment {
    PriorExperiment::new(prior(), training())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prior_matches_the_code_book() {
        assert_eq!(prior().backbone.num_classes, vqvae().num_embeddings);
        assert_eq!(vqvae().latent_size().unwrap(), IMAGE_SIZE / 2);
    }
}
