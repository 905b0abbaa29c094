//! Stage 2: fitting a prior to the codes of a frozen VQ-VAE.

use burn::module::{AutodiffModule, Module, ModuleDisplay};
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::prelude::{Backend, ElementConversion, Int, Tensor};
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{Adaptor, LossInput};
use burn::train::{TrainOutput, TrainStep, ValidStep};

use crate::data::InpaintingBatch;
use crate::metric::accuracy::CodeAccuracyInput;
use crate::metric::gradnorm::{GradientNorm, GradientNormInput};
use crate::metric::history::LossHistoryInput;
use crate::model::loss::{bits_per_dimension, flatten_positions};
use crate::model::prior::{CodeContext, Prior, PriorInput};
use crate::model::vqvae::VqVae;

/// A prior together with the autoencoder whose codes it models.
///
/// The autoencoder never receives gradients; only the prior is optimized.
#[derive(Module, Debug)]
pub struct PriorTraining<B: Backend, P> {
    pub prior: P,
    autoencoder: VqVae<B>,
    loss: CrossEntropyLoss<B>,
    use_bits_per_dimension: bool,
}

pub struct PriorStepOutput<B: Backend> {
    /// Cross-entropy in nats, or in bits per dimension when enabled.
    pub loss: Tensor<B, 1>,
    /// N x K x H x W
    pub logits: Tensor<B, 4>,
    /// N x H x W
    pub targets: Tensor<B, 3, Int>,
    pub accuracy: CodeAccuracyInput,
    pub gradient_norm: Option<f32>,
    pub batch_size: usize,
}

impl<B: Backend, P: Prior<B>> PriorTraining<B, P> {
    pub fn new(prior: P, autoencoder: VqVae<B>, use_bits_per_dimension: bool) -> Self {
        let device = autoencoder.devices().into_iter().next().unwrap_or_default();

        Self {
            prior,
            autoencoder: autoencoder.no_grad(),
            loss: CrossEntropyLossConfig::new().init(&device),
            use_bits_per_dimension,
        }
    }

    pub fn autoencoder(&self) -> &VqVae<B> {
        &self.autoencoder
    }

    /// Codes of the masked inputs and of the full targets.
    pub fn encode(&self, batch: &InpaintingBatch<B>) -> (Tensor<B, 3, Int>, Tensor<B, 3, Int>) {
        (
            self.autoencoder.codes(batch.inputs.clone()),
            self.autoencoder.codes(batch.targets.clone()),
        )
    }

    /// Logits for the target codes of a batch.
    pub fn predict(&self, input_codes: Tensor<B, 3, Int>, target_codes: Tensor<B, 3, Int>) -> Tensor<B, 4> {
        let input = if self.prior.conditions_on_context() {
            PriorInput::new(target_codes.clone())
                .with_context(Some(CodeContext::from_pair(input_codes, target_codes)))
        } else {
            PriorInput::new(input_codes)
        };

        self.prior.forward(input)
    }

    pub fn forward(&self, batch: InpaintingBatch<B>) -> PriorStepOutput<B> {
        let (input_codes, target_codes) = self.encode(&batch);
        self.score(input_codes, target_codes, batch.batch_size())
    }

    /// Loss and accuracy of the prior on already encoded pairs.
    pub fn score(
        &self,
        input_codes: Tensor<B, 3, Int>,
        target_codes: Tensor<B, 3, Int>,
        batch_size: usize,
    ) -> PriorStepOutput<B> {
        let logits = self.predict(input_codes, target_codes.clone());

        let (flat_logits, flat_targets) = flatten_positions(logits.clone(), target_codes.clone());
        let nll = self.loss.forward(flat_logits, flat_targets);
        let loss = if self.use_bits_per_dimension {
            bits_per_dimension(nll)
        } else {
            nll
        };

        PriorStepOutput {
            accuracy: CodeAccuracyInput::from_logits(logits.clone(), target_codes.clone()),
            loss,
            logits,
            targets: target_codes,
            gradient_norm: None,
            batch_size,
        }
    }
}

impl<B: AutodiffBackend, P: Prior<B>> PriorTraining<B, P> {
    /// Like [`Self::encode`], with the autoencoder in inference mode so its
    /// batch norm keeps using and never updates the running statistics.
    pub fn encode_frozen(&self, batch: &InpaintingBatch<B>) -> (Tensor<B, 3, Int>, Tensor<B, 3, Int>) {
        let autoencoder = self.autoencoder.valid();

        (
            Tensor::from_inner(autoencoder.codes(batch.inputs.clone().inner())),
            Tensor::from_inner(autoencoder.codes(batch.targets.clone().inner())),
        )
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for PriorStepOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

impl<B: Backend> Adaptor<LossHistoryInput> for PriorStepOutput<B> {
    fn adapt(&self) -> LossHistoryInput {
        LossHistoryInput {
            value: self.loss.clone().into_scalar().elem::<f64>(),
            batch_size: self.batch_size,
        }
    }
}

impl<B: Backend> Adaptor<CodeAccuracyInput> for PriorStepOutput<B> {
    fn adapt(&self) -> CodeAccuracyInput {
        self.accuracy
    }
}

impl<B: Backend> Adaptor<GradientNormInput> for PriorStepOutput<B> {
    fn adapt(&self) -> GradientNormInput {
        GradientNormInput {
            value: self.gradient_norm.unwrap_or_default(),
        }
    }
}

impl<B, P> TrainStep<InpaintingBatch<B>, PriorStepOutput<B>> for PriorTraining<B, P>
where
    B: AutodiffBackend,
    P: Prior<B> + AutodiffModule<B> + ModuleDisplay,
    P::InnerModule: ModuleDisplay,
{
    fn step(&self, batch: InpaintingBatch<B>) -> TrainOutput<PriorStepOutput<B>> {
        let (input_codes, target_codes) = self.encode_frozen(&batch);
        let mut output = self.score(input_codes, target_codes, batch.batch_size());
        let grads = output.loss.backward();
        output.gradient_norm = Some(GradientNorm::of(&self.prior, &grads));

        TrainOutput::new(self, grads, output)
    }
}

impl<B: Backend, P: Prior<B>> ValidStep<InpaintingBatch<B>, PriorStepOutput<B>> for PriorTraining<B, P> {
    fn step(&self, batch: InpaintingBatch<B>) -> PriorStepOutput<B> {
        self.forward(batch)
    }
}
