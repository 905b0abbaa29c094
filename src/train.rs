//! The two training stages and what is done with a trained prior.

pub mod renderer;

use std::fmt::Display;
use std::path::Path;

use burn::config::Config;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, ModuleDisplay};
use burn::optim::AdamConfig;
use burn::prelude::{Backend, ElementConversion};
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::LossMetric;
use burn::train::{LearnerBuilder, TrainStep, ValidStep};
use rand::Rng;
use tracing::info;

use crate::checkpoint::{self, History};
use crate::config::TrainingConfig;
use crate::data::{ImageBatch, ImageBatcher, ImageItem, InpaintingBatcher, InpaintingItem};
use crate::error::{Error, Result};
use crate::io::write_images;
use crate::mask::block::{BlockMask, BlockMaskConfig};
use crate::mask::MaskingStrategy;
use crate::metric::accuracy::CodeAccuracyMetric;
use crate::metric::gradnorm::GradientNormMetric;
use crate::metric::history::LossHistory;
use crate::metric::loss_terms::{ReconstructionLossMetric, RegularizerMetric};
use crate::metric::perplexity::PerplexityMetric;
use crate::model::prior::Prior;
use crate::model::vqvae::VqVae;
use crate::task::autoencoder::ReconstructionOutput;
use crate::task::prior::PriorTraining;

use self::renderer::TracingRenderer;

pub const RECONSTRUCTED_DIR: &str = "reconstructed";
pub const GENERATED_DIR: &str = "generated";
pub const INPAINTED_DIR: &str = "inpainted";

/// Stage 1. Fits `model` to reconstruct images and stores the result as a
/// bundle in `artifact_dir`.
pub fn train_autoencoder<B, M, C>(
    artifact_dir: &Path,
    model: M,
    model_config: &C,
    training: &TrainingConfig,
    dataset_train: impl Dataset<ImageItem> + 'static,
    dataset_valid: impl Dataset<ImageItem> + 'static,
    device: B::Device,
) -> Result<M::InnerModule>
where
    B: AutodiffBackend,
    C: Config,
    M: AutodiffModule<B> + TrainStep<ImageBatch<B>, ReconstructionOutput<B>> + ModuleDisplay + Display + 'static,
    M::InnerModule: ValidStep<ImageBatch<B::InnerBackend>, ReconstructionOutput<B::InnerBackend>> + ModuleDisplay + Display,
{
    training.validate()?;
    B::seed(training.seed);
    info!(
        train = dataset_train.len(),
        valid = dataset_valid.len(),
        epochs = training.num_epochs,
        "training autoencoder"
    );

    let data_loader_train = DataLoaderBuilder::new(ImageBatcher::<B>::new(device.clone()))
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers)
        .build(dataset_train);
    let data_loader_valid = DataLoaderBuilder::new(ImageBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(training.batch_size)
        .num_workers(training.num_workers)
        .build(dataset_valid);

    let train_history = LossHistory::default();
    let valid_history = LossHistory::default();

    let builder = LearnerBuilder::new(&*artifact_dir.to_string_lossy())
        .devices(vec![device])
        // train metrics
        .metric_train_numeric(LossMetric::new())
        .metric_train_numeric(ReconstructionLossMetric::<B>::default())
        .metric_train_numeric(RegularizerMetric::<B>::default())
        .metric_train_numeric(PerplexityMetric::<B>::default())
        .metric_train_numeric(train_history.metric())
        // validation metrics
        .metric_valid_numeric(LossMetric::new())
        .metric_valid_numeric(ReconstructionLossMetric::<B>::default())
        .metric_valid_numeric(PerplexityMetric::<B>::default())
        .metric_valid_numeric(valid_history.metric())
        .with_file_checkpointer(CompactRecorder::new())
        .with_application_logger(None)
        .num_epochs(training.num_epochs)
        .summary();
    let builder = if training.dashboard {
        builder
    } else {
        builder.renderer(TracingRenderer)
    };
    let learner = builder.build(model, AdamConfig::new().init(), training.learning_rate);

    let trained = learner.fit(data_loader_train, data_loader_valid).valid();

    let history = History::from_losses(&train_history, &valid_history);
    checkpoint::save(artifact_dir, &trained, model_config, &history)?;

    Ok(trained)
}

/// Stage 2. Fits `prior` to the codes `autoencoder` assigns to the training
/// pairs; the autoencoder stays fixed.
#[allow(clippy::too_many_arguments)]
pub fn train_prior<B, P, C>(
    artifact_dir: &Path,
    prior: P,
    prior_config: &C,
    autoencoder: VqVae<B>,
    training: &TrainingConfig,
    dataset_train: impl Dataset<InpaintingItem> + 'static,
    dataset_valid: impl Dataset<InpaintingItem> + 'static,
    device: B::Device,
) -> Result<PriorTraining<B::InnerBackend, P::InnerModule>>
where
    B: AutodiffBackend,
    C: Config,
    P: Prior<B> + AutodiffModule<B> + ModuleDisplay + 'static,
    P::InnerModule: Prior<B::InnerBackend> + ModuleDisplay,
{
    training.validate()?;
    check_code_book(&prior, &autoencoder)?;
    B::seed(training.seed);
    info!(
        train = dataset_train.len(),
        valid = dataset_valid.len(),
        epochs = training.num_epochs,
        latent_size = autoencoder.latent_size(),
        "training prior"
    );

    let data_loader_train = DataLoaderBuilder::new(InpaintingBatcher::<B>::new(device.clone()))
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers)
        .build(dataset_train);
    let data_loader_valid = DataLoaderBuilder::new(InpaintingBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(training.batch_size)
        .num_workers(training.num_workers)
        .build(dataset_valid);

    let model = PriorTraining::new(prior, autoencoder, training.use_bits_per_dimension);
    let train_history = LossHistory::default();
    let valid_history = LossHistory::default();

    let builder = LearnerBuilder::new(&*artifact_dir.to_string_lossy())
        .devices(vec![device])
        // train metrics
        .metric_train_numeric(LossMetric::new())
        .metric_train_numeric(CodeAccuracyMetric::<B>::default())
        .metric_train_numeric(GradientNormMetric::<B>::default())
        .metric_train_numeric(train_history.metric())
        // validation metrics
        .metric_valid_numeric(LossMetric::new())
        .metric_valid_numeric(CodeAccuracyMetric::<B>::default())
        .metric_valid_numeric(valid_history.metric())
        .with_file_checkpointer(CompactRecorder::new())
        .with_application_logger(None)
        .num_epochs(training.num_epochs)
        .summary();
    let builder = if training.dashboard {
        builder
    } else {
        builder.renderer(TracingRenderer)
    };
    let learner = builder.build(model, AdamConfig::new().init(), training.learning_rate);

    let trained = learner.fit(data_loader_train, data_loader_valid).valid();

    let history = History::from_losses(&train_history, &valid_history);
    checkpoint::save(artifact_dir, &trained.prior, prior_config, &history)?;

    Ok(trained)
}

pub fn check_code_book<B: Backend, P: Prior<B>>(prior: &P, autoencoder: &VqVae<B>) -> Result<()> {
    if prior.num_classes() == autoencoder.num_embeddings() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "prior models {} classes but the code book has {} entries",
            prior.num_classes(),
            autoencoder.num_embeddings()
        )))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    /// Mean loss per example, in the unit the prior was trained with.
    pub loss: f64,
    pub accuracy: f64,
}

/// Test loss and accuracy. The argmax prediction for every pair is decoded
/// and written to `output_dir/reconstructed` under the pair's file name.
pub fn evaluate_prior<B: Backend, P: Prior<B>>(
    model: &PriorTraining<B, P>,
    dataset_test: impl Dataset<InpaintingItem> + 'static,
    batch_size: usize,
    output_dir: &Path,
    device: &B::Device,
) -> Result<Evaluation> {
    let data_loader = DataLoaderBuilder::new(InpaintingBatcher::<B>::new(device.clone()))
        .batch_size(batch_size)
        .build(dataset_test);
    let dir = output_dir.join(RECONSTRUCTED_DIR);

    let mut loss = 0.0;
    let mut examples = 0;
    let (mut correct, mut total) = (0, 0);

    for batch in data_loader.iter() {
        let names = batch.names.clone();
        let output = model.forward(batch);

        loss += output.loss.into_scalar().elem::<f64>() * output.batch_size as f64;
        examples += output.batch_size;
        correct += output.accuracy.correct;
        total += output.accuracy.total;

        let predictions = output.logits.argmax(1).squeeze::<3>(1);
        write_images(model.autoencoder().decode_codes(predictions)?, &names, &dir)?;
    }

    let evaluation = Evaluation {
        loss: loss / examples.max(1) as f64,
        accuracy: correct as f64 / total.max(1) as f64,
    };
    info!(loss = evaluation.loss, accuracy = evaluation.accuracy, examples, "evaluated prior");

    Ok(evaluation)
}

/// Draws `num_batches` batches of unconditioned code grids and writes the
/// decoded images to `output_dir/generated`. Returns the number of images.
pub fn generate_samples<B: Backend, P: Prior<B>, R: Rng>(
    prior: &P,
    autoencoder: &VqVae<B>,
    num_batches: usize,
    batch_size: usize,
    rng: &mut R,
    output_dir: &Path,
    device: &B::Device,
) -> Result<usize> {
    check_code_book(prior, autoencoder)?;
    let dir = output_dir.join(GENERATED_DIR);
    let side = autoencoder.latent_size();

    for index in 0..num_batches {
        let codes = prior.sample([batch_size, side, side], None, None, rng, device)?;
        let names = (0..batch_size)
            .map(|i| (index * batch_size + i).to_string())
            .collect::<Vec<_>>();

        write_images(autoencoder.decode_codes(codes)?, &names, &dir)?;
        info!(batch = index + 1, of = num_batches, "generated samples");
    }

    Ok(num_batches * batch_size)
}

/// Hides a random block of the test targets' codes, lets the prior fill it
/// in, and writes the decoded completions to `output_dir/inpainted`.
pub fn inpaint<B: Backend, P: Prior<B>, R: Rng>(
    model: &PriorTraining<B, P>,
    dataset_test: impl Dataset<InpaintingItem> + 'static,
    batch_size: usize,
    mask_config: &BlockMaskConfig,
    rng: &mut R,
    output_dir: &Path,
    device: &B::Device,
) -> Result<usize> {
    let data_loader = DataLoaderBuilder::new(InpaintingBatcher::<B>::new(device.clone()))
        .batch_size(batch_size)
        .build(dataset_test);
    let dir = output_dir.join(INPAINTED_DIR);
    let mut written = 0;

    for batch in data_loader.iter() {
        let codes = model.autoencoder().codes(batch.targets);
        let shape = codes.dims();
        let context = <BlockMask as MaskingStrategy<B>>::mask_codes(codes, mask_config, rng);

        let completed = model.prior.sample(shape, Some(context), None, rng, device)?;
        write_images(model.autoencoder().decode_codes(completed)?, &batch.names, &dir)?;
        written += batch.names.len();
    }

    info!(images = written, dir = %dir.display(), "inpainted test images");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use burn::backend::NdArray;
    use burn::data::dataset::InMemDataset;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use burn::backend::Autodiff;

    use crate::config::tiny;
    use crate::io::list_images;
    use crate::model::prior::pixelcnn::PixelCnnConfig;
    use crate::model::prior::PriorConfig;

    type B = NdArray;
    type AB = Autodiff<NdArray>;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = env::temp_dir().join(format!("imagemodel-train-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn image(name: String, shade: f32) -> ImageItem {
        let side = tiny::IMAGE_SIZE;
        ImageItem {
            name,
            pixels: vec![shade; 3 * side * side],
            channels: 3,
            size: side,
        }
    }

    fn images(count: usize) -> InMemDataset<ImageItem> {
        InMemDataset::new(
            (0..count)
                .map(|i| image(format!("{i}.png"), i as f32 / count as f32))
                .collect(),
        )
    }

    fn pairs(count: usize) -> InMemDataset<InpaintingItem> {
        InMemDataset::new(
            (0..count)
                .map(|i| InpaintingItem {
                    input: image(format!("{i}.png"), 0.0),
                    target: image(format!("{i}.png"), i as f32 / count as f32),
                })
                .collect(),
        )
    }

    fn headless(num_epochs: usize) -> TrainingConfig {
        tiny::training().with_num_epochs(num_epochs).with_dashboard(false)
    }

    fn model(device: &<B as Backend>::Device) -> PriorTraining<B, crate::model::prior::inpainting::InpaintingPixelCnn<B>> {
        let prior = tiny::prior().init::<B>(device).unwrap();
        let autoencoder = tiny::vqvae().init::<B>(device).unwrap();
        PriorTraining::new(prior, autoencoder, false)
    }

    #[test]
    fn autoencoder_fit_records_every_epoch() {
        let device = Default::default();
        let dir = scratch("fit-autoencoder");
        let config = tiny::vqvae();
        let model = config.init::<AB>(&device).unwrap();

        train_autoencoder::<AB, _, _>(&dir, model, &config, &headless(2), images(4), images(2), device).unwrap();

        let history = History::load(&dir).unwrap();
        assert_eq!(history.epoch, 2);
        assert_eq!(history.train_loss.len(), 2);
        assert_eq!(history.valid_loss.len(), 2);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn prior_fit_records_every_epoch() {
        let device = Default::default();
        let dir = scratch("fit-prior");
        let config = tiny::prior();
        let prior = config.init::<AB>(&device).unwrap();
        let autoencoder = tiny::vqvae().init::<AB>(&device).unwrap();

        let trained =
            train_prior::<AB, _, _>(&dir, prior, &config, autoencoder, &headless(2), pairs(4), pairs(2), device).unwrap();

        let history = History::load(&dir).unwrap();
        assert_eq!(history.epoch, 2);
        assert_eq!(history.train_loss.len(), 2);
        assert_eq!(history.valid_loss.len(), 2);
        assert_eq!(trained.prior.num_classes(), 8);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn zero_workers_fail_before_fitting() {
        let device = Default::default();
        let dir = scratch("fit-zero-workers");
        let config = tiny::vqvae();
        let model = config.init::<AB>(&device).unwrap();
        let training = headless(1).with_num_workers(0);

        let result = train_autoencoder::<AB, _, _>(&dir, model, &config, &training, images(2), images(2), device);

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!dir.exists());
    }

    #[test]
    fn evaluation_writes_one_reconstruction_per_pair() {
        let device = Default::default();
        let dir = scratch("evaluate");

        let evaluation = evaluate_prior(&model(&device), pairs(3), 2, &dir, &device).unwrap();

        assert!(evaluation.loss > 0.0);
        assert!((0.0..=1.0).contains(&evaluation.accuracy));
        assert_eq!(list_images(&dir.join(RECONSTRUCTED_DIR)).unwrap().len(), 3);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn samples_are_written_per_batch() {
        let device = Default::default();
        let dir = scratch("generate");
        let model = model(&device);
        let mut rng = StdRng::seed_from_u64(42);

        let written = generate_samples(&model.prior, model.autoencoder(), 2, 2, &mut rng, &dir, &device).unwrap();

        assert_eq!(written, 4);
        assert_eq!(list_images(&dir.join(GENERATED_DIR)).unwrap().len(), 4);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn inpainting_covers_the_test_split() {
        let device = Default::default();
        let dir = scratch("inpaint");
        let mut rng = StdRng::seed_from_u64(1);

        let written = inpaint(&model(&device), pairs(3), 2, &BlockMaskConfig::default(), &mut rng, &dir, &device).unwrap();

        assert_eq!(written, 3);
        assert_eq!(list_images(&dir.join(INPAINTED_DIR)).unwrap().len(), 3);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn mismatched_code_book_is_rejected() {
        let device = Default::default();
        let prior = PixelCnnConfig::new(3).with_hidden_channels(4).init::<B>(&device).unwrap();
        let autoencoder = tiny::vqvae().init::<B>(&device).unwrap();

        assert!(matches!(check_code_book(&prior, &autoencoder), Err(Error::Config(_))));
    }
}
