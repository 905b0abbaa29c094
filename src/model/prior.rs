//! Autoregressive priors over code grids.

use burn::module::Module;
use burn::nn::Embedding;
use burn::prelude::{Backend, Int};
use burn::tensor::{Bool, Tensor};
use rand::Rng;

use crate::error::{check_shape, Result};

pub mod conv;
pub mod gated;
pub mod inpainting;
pub mod pixelcnn;
pub mod sample;

pub trait PriorConfig {
    type Model<B>: Prior<B, Config = Self>
    where
        B: Backend;

    fn num_classes(&self) -> usize;

    fn init<B: Backend>(&self, device: &B::Device) -> Result<Self::Model<B>>
    where
        Self: Sized,
    {
        <Self::Model<B> as Prior<B>>::new(self, device)
    }
}

pub trait Prior<B: Backend>: Module<B> + Sized {
    type Config: PriorConfig;

    fn new(config: &Self::Config, device: &B::Device) -> Result<Self>;

    /// N x K x H x W logits for every position of `input.codes`.
    fn forward(&self, input: PriorInput<B>) -> Tensor<B, 4>;

    fn num_classes(&self) -> usize;

    /// Whether the logits of a row depend only on that row and the rows above,
    /// so sampling may run on the grid cropped below the current row.
    fn is_row_causal(&self) -> bool;

    /// Whether the prior reads `PriorInput::context`. Such priors are trained
    /// on the full grid with the masked grid as context; the others learn to
    /// continue the masked grid directly.
    fn conditions_on_context(&self) -> bool {
        false
    }

    /// Draws a grid in raster order, one forward pass per position.
    fn sample<R: Rng>(
        &self,
        shape: [usize; 3],
        context: Option<CodeContext<B>>,
        labels: Option<Tensor<B, 1, Int>>,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<Tensor<B, 3, Int>> {
        sample::ancestral(self, shape, context, labels, rng, device)
    }
}

/// Known codes for conditional generation.
#[derive(Clone, Debug)]
pub struct CodeContext<B: Backend> {
    /// N x H x W, ignored where `known` is false
    pub codes: Tensor<B, 3, Int>,
    /// N x H x W
    pub known: Tensor<B, 3, Bool>,
}

impl<B: Backend> CodeContext<B> {
    pub fn new(codes: Tensor<B, 3, Int>, known: Tensor<B, 3, Bool>) -> Result<Self> {
        check_shape("context mask", &codes.dims(), &known.dims())?;
        Ok(Self { codes, known })
    }

    /// Codes of a masked image, known wherever they agree with the full image.
    pub fn from_pair(input_codes: Tensor<B, 3, Int>, target_codes: Tensor<B, 3, Int>) -> Self {
        let known = input_codes.clone().equal(target_codes);
        Self {
            codes: input_codes,
            known,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.codes.dims()
    }
}

pub struct PriorInput<B: Backend> {
    /// N x H x W codes in raster-scan order
    pub codes: Tensor<B, 3, Int>,
    pub context: Option<CodeContext<B>>,
    /// One class label per example
    pub labels: Option<Tensor<B, 1, Int>>,
}

impl<B: Backend> PriorInput<B> {
    pub fn new(codes: Tensor<B, 3, Int>) -> Self {
        Self {
            codes,
            context: None,
            labels: None,
        }
    }

    pub fn with_context(mut self, context: Option<CodeContext<B>>) -> Self {
        self.context = context;
        self
    }

    pub fn with_labels(mut self, labels: Option<Tensor<B, 1, Int>>) -> Self {
        self.labels = labels;
        self
    }
}

/// N x H x W codes to N x C x H x W embeddings.
pub(crate) fn embed_codes<B: Backend>(embedding: &Embedding<B>, codes: Tensor<B, 3, Int>) -> Tensor<B, 4> {
    let [batch, height, width] = codes.dims();
    let embedded = embedding.forward(codes.reshape([batch, height * width]));
    let [_, _, channels] = embedded.dims();

    embedded
        .reshape([batch, height, width, channels])
        .permute([0, 3, 1, 2])
}
