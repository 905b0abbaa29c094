use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig};
use burn::prelude::{Backend, Int};
use burn::tensor::Tensor;

use crate::error::{Error, Result};
use crate::model::prior::gated::{GatedStack, GatedStackSpec};
use crate::model::prior::{embed_codes, Prior, PriorConfig, PriorInput};

#[derive(Config, Debug)]
pub struct PixelCnnConfig {
    /// Code book size of the autoencoder the prior models.
    pub num_classes: usize,
    #[config(default = 128)]
    pub hidden_channels: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = true)]
    pub use_dilation: bool,
    /// Enables class conditioning with this many labels.
    pub num_labels: Option<usize>,
}

impl PixelCnnConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_classes == 0 || self.hidden_channels == 0 {
            return Err(Error::Config(
                "prior needs at least one class and one hidden channel".to_string(),
            ));
        }

        Ok(())
    }

    pub(crate) fn stack_spec(&self, context_channels: Option<usize>) -> GatedStackSpec {
        GatedStackSpec {
            hidden_channels: self.hidden_channels,
            num_classes: self.num_classes,
            kernel_size: self.kernel_size,
            use_dilation: self.use_dilation,
            num_labels: self.num_labels,
            context_channels,
        }
    }
}

impl PriorConfig for PixelCnnConfig {
    type Model<B> = PixelCnn<B> where B: Backend;

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Unconditioned gated PixelCNN over code grids.
#[derive(Module, Debug)]
pub struct PixelCnn<B: Backend> {
    embedding: Embedding<B>,
    stack: GatedStack<B>,
    num_classes: usize,
}

impl<B: Backend> PixelCnn<B> {
    /// Logits for an already embedded N x C x H x W grid.
    pub fn forward_embedded(&self, embedded: Tensor<B, 4>, labels: Option<Tensor<B, 1, Int>>) -> Tensor<B, 4> {
        self.stack.forward(embedded, labels, None)
    }

    pub fn embed(&self, codes: Tensor<B, 3, Int>) -> Tensor<B, 4> {
        embed_codes(&self.embedding, codes)
    }
}

impl<B: Backend> Prior<B> for PixelCnn<B> {
    type Config = PixelCnnConfig;

    fn new(config: &Self::Config, device: &B::Device) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            embedding: EmbeddingConfig::new(config.num_classes, config.hidden_channels).init(device),
            stack: GatedStack::new(&config.stack_spec(None), device)?,
            num_classes: config.num_classes,
        })
    }

    fn forward(&self, input: PriorInput<B>) -> Tensor<B, 4> {
        self.forward_embedded(self.embed(input.codes), input.labels)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn is_row_causal(&self) -> bool {
        true
    }
}
