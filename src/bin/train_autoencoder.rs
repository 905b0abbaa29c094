use std::path::PathBuf;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, NdArray, Wgpu};
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, ValueEnum};
use color_eyre::eyre::ensure;
use tracing_subscriber::EnvFilter;

use imagemodel::config::{self, sprites, AutoencoderExperiment};
use imagemodel::data::folder::ImageFolderDataset;
use imagemodel::train::train_autoencoder;

#[derive(ValueEnum, Clone, Copy, Debug)]
#[clap(rename_all = "lowercase")]
enum Kind {
    Ae,
    Vae,
    Vqvae,
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
///
/// Stage 1: fit an autoencoder to a folder of images.
/// Expects `<data>/train` and `<data>/valid` image folders.
///
struct Cli {
    #[arg(value_enum)]
    kind: Kind,

    /// dataset root
    #[arg(short, long)]
    data: PathBuf,

    /// bundle directory for the trained model
    #[arg(short, long, default_value = ".out/autoencoder")]
    output: PathBuf,

    /// JSON experiment replacing the sprite preset
    #[arg(long)]
    config: Option<PathBuf>,

    /// train on the CPU instead of the GPU
    #[arg(long)]
    cpu: bool,
}

fn run<B: AutodiffBackend>(cli: &Cli, experiment: &AutoencoderExperiment, device: B::Device) -> color_eyre::Result<()> {
    let training = &experiment.training;
    let image_dimensions = match cli.kind {
        Kind::Vqvae => experiment.vqvae.input_image_dimensions,
        Kind::Ae | Kind::Vae => experiment.autoencoder.input_image_dimensions,
    };
    ensure!(
        training.image_size == image_dimensions,
        "images are loaded at {0}x{0} but the model expects {1}x{1}",
        training.image_size,
        image_dimensions
    );

    let dataset_train = ImageFolderDataset::load(cli.data.join("train"), training.image_size, training.image_channels)?;
    let dataset_valid = ImageFolderDataset::load(cli.data.join("valid"), training.image_size, training.image_channels)?;

    match cli.kind {
        Kind::Ae => {
            let model = experiment.autoencoder.init_ae::<B>(&device)?;
            train_autoencoder(&cli.output, model, &experiment.autoencoder, training, dataset_train, dataset_valid, device)?;
        }
        Kind::Vae => {
            let model = experiment.autoencoder.init_vae::<B>(&device)?;
            train_autoencoder(&cli.output, model, &experiment.autoencoder, training, dataset_train, dataset_valid, device)?;
        }
        Kind::Vqvae => {
            let model = experiment.vqvae.init::<B>(&device)?;
            train_autoencoder(&cli.output, model, &experiment.vqvae, training, dataset_train, dataset_valid, device)?;
        }
    }

    Ok(())
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let experiment = config::load_or(cli.config.as_deref(), sprites::autoencoder_experiment)?;

    if cli.cpu {
        run::<Autodiff<NdArray>>(&cli, &experiment, NdArrayDevice::Cpu)
    } else {
        run::<Autodiff<Wgpu>>(&cli, &experiment, WgpuDevice::default())
    }
}
