use std::path::{Path, PathBuf};

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, NdArray, Wgpu};
use burn::config::Config;
use burn::module::{AutodiffModule, ModuleDisplay};
use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, Subcommand};
use color_eyre::eyre::ensure;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use imagemodel::checkpoint;
use imagemodel::config::{self, sprites, PriorExperiment};
use imagemodel::data::folder::InpaintingDataset;
use imagemodel::mask::block::BlockMaskConfig;
use imagemodel::model::prior::{Prior, PriorConfig};
use imagemodel::model::vqvae::{VqVae, VqVaeConfig};
use imagemodel::task::prior::PriorTraining;
use imagemodel::train::{evaluate_prior, generate_samples, inpaint, train_prior};

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
///
/// Stage 2: fit a PixelCNN prior to the codes of a trained VQ-VAE.
/// Expects `<data>/{train,valid,test}/{inputs,targets}` image folders.
///
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// dataset root
    #[arg(short, long)]
    data: PathBuf,

    /// bundle directory of the trained VQ-VAE
    #[arg(short, long)]
    autoencoder: PathBuf,

    /// bundle directory for the prior; images are written below it
    #[arg(short, long, default_value = ".out/prior")]
    output: PathBuf,

    /// JSON experiment replacing the sprite preset
    #[arg(long)]
    config: Option<PathBuf>,

    /// use the PixelCNN without the context encoder
    #[arg(long)]
    plain: bool,

    /// run on the CPU instead of the GPU
    #[arg(long)]
    cpu: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// train, then evaluate on the test split and draw samples
    Train,
    /// test loss, accuracy and decoded predictions
    Evaluate,
    /// unconditioned samples
    Sample,
    /// complete test images with a hidden block
    Inpaint,
}

fn load_autoencoder<B: Backend>(dir: &Path, image_size: usize, device: &B::Device) -> color_eyre::Result<VqVae<B>> {
    let config: VqVaeConfig = checkpoint::load_config(dir)?;
    ensure!(
        config.input_image_dimensions == image_size,
        "images are loaded at {0}x{0} but the autoencoder expects {1}x{1}",
        image_size,
        config.input_image_dimensions
    );

    Ok(checkpoint::load_model(dir, config.init(device)?, device)?)
}

fn dataset(cli: &Cli, split: &str, experiment: &PriorExperiment) -> imagemodel::Result<InpaintingDataset> {
    let training = &experiment.training;
    InpaintingDataset::load(cli.data.join(split), training.image_size, training.image_channels)
}

/// Evaluation, sampling and inpainting with a trained prior.
fn use_prior<B: Backend, P: Prior<B>>(
    cli: &Cli,
    command: Command,
    experiment: &PriorExperiment,
    model: &PriorTraining<B, P>,
    device: &B::Device,
) -> color_eyre::Result<()> {
    let training = &experiment.training;
    let mut rng = StdRng::seed_from_u64(training.seed);

    if matches!(command, Command::Train | Command::Evaluate) {
        let evaluation = evaluate_prior(model, dataset(cli, "test", experiment)?, training.batch_size, &cli.output, device)?;
        info!(loss = evaluation.loss, accuracy = evaluation.accuracy, "test split");
    }
    if matches!(command, Command::Train | Command::Sample) {
        generate_samples(
            &model.prior,
            model.autoencoder(),
            training.num_sample_batches,
            training.batch_size,
            &mut rng,
            &cli.output,
            device,
        )?;
    }
    if matches!(command, Command::Inpaint) {
        let mask_config = BlockMaskConfig::default();
        inpaint(model, dataset(cli, "test", experiment)?, training.batch_size, &mask_config, &mut rng, &cli.output, device)?;
    }

    Ok(())
}

fn run<B, PC>(cli: &Cli, experiment: &PriorExperiment, prior_config: PC, device: B::Device) -> color_eyre::Result<()>
where
    B: AutodiffBackend,
    PC: PriorConfig + Config,
    PC::Model<B>: AutodiffModule<B> + ModuleDisplay + 'static,
    <PC::Model<B> as AutodiffModule<B>>::InnerModule: Prior<B::InnerBackend> + ModuleDisplay,
{
    let training = &experiment.training;

    match cli.command {
        Command::Train => {
            let autoencoder = load_autoencoder::<B>(&cli.autoencoder, training.image_size, &device)?;
            let prior = prior_config.init::<B>(&device)?;
            let model = train_prior(
                &cli.output,
                prior,
                &prior_config,
                autoencoder,
                training,
                dataset(cli, "train", experiment)?,
                dataset(cli, "valid", experiment)?,
                device.clone(),
            )?;

            use_prior(cli, cli.command, experiment, &model, &device)
        }
        command => {
            let autoencoder = load_autoencoder::<B::InnerBackend>(&cli.autoencoder, training.image_size, &device)?;
            let prior_config: PC = checkpoint::load_config(&cli.output)?;
            let prior = checkpoint::load_model(&cli.output, prior_config.init::<B::InnerBackend>(&device)?, &device)?;
            let model = PriorTraining::new(prior, autoencoder, training.use_bits_per_dimension);

            use_prior(cli, command, experiment, &model, &device)
        }
    }
}

fn run_on<B>(cli: &Cli, experiment: &PriorExperiment, device: B::Device) -> color_eyre::Result<()>
where
    B: AutodiffBackend,
{
    if cli.plain {
        run::<B, _>(cli, experiment, experiment.prior.backbone.clone(), device)
    } else {
        run::<B, _>(cli, experiment, experiment.prior.clone(), device)
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let experiment = config::load_or(cli.config.as_deref(), sprites::prior_experiment)?;

    if cli.cpu {
        run_on::<Autodiff<NdArray>>(&cli, &experiment, NdArrayDevice::Cpu)
    } else {
        run_on::<Autodiff<Wgpu>>(&cli, &experiment, WgpuDevice::default())
    }
}
