//! Small shapes for smoke runs.

use crate::config::{AutoencoderExperiment, PriorExperiment, TrainingConfig};
use crate::model::autoencoder::AutoencoderConfig;
use crate::model::prior::inpainting::InpaintingPixelCnnConfig;
use crate::model::prior::pixelcnn::PixelCnnConfig;
use crate::model::vqvae::VqVaeConfig;

pub const IMAGE_SIZE: usize = 16;

pub fn vqvae() -> VqVaeConfig {
    VqVaeConfig::new()
        .with_input_image_dimensions(IMAGE_SIZE)
        .with_num_layers(2)
        .with_max_filters(16)
        .with_num_embeddings(8)
        .with_embedding_dim(4)
}

pub fn autoencoder() -> AutoencoderConfig {
    AutoencoderConfig::new()
        .with_input_image_dimensions(IMAGE_SIZE)
        .with_num_layers(2)
        .with_max_filters(16)
        .with_latent_dim(8)
}

pub fn prior() -> InpaintingPixelCnnConfig {
    InpaintingPixelCnnConfig::new(PixelCnnConfig::new(8).with_hidden_channels(8)).with_context_channels(4)
}

pub fn training() -> TrainingConfig {
    TrainingConfig::new()
        .with_num_epochs(1)
        .with_batch_size(2)
        .with_image_size(IMAGE_SIZE)
        .with_num_sample_batches(1)
}

pub fn autoencoder_experiment() -> AutoencoderExperiment {
    AutoencoderExperiment::new(vqvae(), autoencoder(), training())
}

pub fn prior_experiment() -> PriorExperiment {
    PriorExperiment::new(prior(), training())
}
