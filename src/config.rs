//! Run configuration and the stock presets.

pub mod sprites;
pub mod tiny;

use std::path::Path;

use burn::config::Config;

use crate::error::{Error, Result};
use crate::model::autoencoder::AutoencoderConfig;
use crate::model::prior::inpainting::InpaintingPixelCnnConfig;
use crate::model::vqvae::VqVaeConfig;

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = 1e-4)]
    pub learning_rate: f64,
    #[config(default = 25)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Side of the square images fed to the autoencoder.
    #[config(default = 64)]
    pub image_size: usize,
    #[config(default = 3)]
    pub image_channels: usize,
    /// Batches of unconditioned samples drawn after prior training.
    #[config(default = 5)]
    pub num_sample_batches: usize,
    /// Report the prior loss in bits per dimension instead of nats.
    #[config(default = false)]
    pub use_bits_per_dimension: bool,
    /// Draw the terminal dashboard while fitting. When off, progress goes to
    /// the tracing subscriber.
    #[config(default = true)]
    pub dashboard: bool,
}

impl TrainingConfig {
    /// Rejects settings the data loaders cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.num_workers == 0 {
            return Err(Error::Config("num_workers must be at least 1".into()));
        }
        if self.num_epochs == 0 {
            return Err(Error::Config("num_epochs must be at least 1".into()));
        }
        Ok(())
    }
}

/// Stage 1: which autoencoder to fit and how.
#[derive(Config, Debug)]
pub struct AutoencoderExperiment {
    pub vqvae: VqVaeConfig,
    pub autoencoder: AutoencoderConfig,
    pub training: TrainingConfig,
}

/// Stage 2: the prior fitted on the codes of a trained VQ-VAE.
#[derive(Config, Debug)]
pub struct PriorExperiment {
    pub prior: InpaintingPixelCnnConfig,
    pub training: TrainingConfig,
}

/// Reads `path` as JSON if given, else returns the preset.
pub fn load_or<C: Config>(path: Option<&Path>, preset: impl FnOnce() -> C) -> Result<C> {
    match path {
        Some(path) => C::load(path).map_err(|err| Error::Config(format!("{}: {err:?}", path.display()))),
        None => Ok(preset()),
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use super::*;

    #[test]
    fn file_overrides_preset() {
        let path = env::temp_dir().join(format!("imagemodel-config-{}.json", std::process::id()));
        let experiment = sprites::prior_experiment();
        PriorExperiment::new(experiment.prior.clone(), experiment.training.clone().with_num_epochs(3))
            .save(&path)
            .unwrap();

        let loaded: PriorExperiment = load_or(Some(&path), sprites::prior_experiment).unwrap();
        assert_eq!(loaded.training.num_epochs, 3);
        assert_eq!(loaded.prior.context_channels, experiment.prior.context_channels);

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn presets_are_valid() {
        sprites::training().validate().unwrap();
        tiny::training().validate().unwrap();
    }

    #[test]
    fn zero_workers_or_batch_size_are_rejected() {
        let workers = tiny::training().with_num_workers(0).validate();
        assert!(matches!(workers, Err(Error::Config(_))));

        let batch = tiny::training().with_batch_size(0).validate();
        assert!(matches!(batch, Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = load_or(Some(Path::new("/nonexistent/imagemodel.json")), sprites::prior_experiment);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
