//! Gated PixelCNN conditioned on a partially known code grid.
//!
//! The causal stacks see the grid being generated; a small unmasked
//! convolutional encoder looks at the known codes anywhere in the grid and
//! its features are added to both stacks of every gated layer.

use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Embedding, EmbeddingConfig, PaddingConfig2d};
use burn::prelude::{Backend, Int};
use burn::tensor::activation::relu;
use burn::tensor::Tensor;

use crate::error::{Error, Result};
use crate::model::prior::gated::GatedStack;
use crate::model::prior::pixelcnn::PixelCnnConfig;
use crate::model::prior::{embed_codes, CodeContext, Prior, PriorConfig, PriorInput};

const CONTEXT_DILATIONS: [usize; 3] = [1, 2, 4];

#[derive(Config, Debug)]
pub struct InpaintingPixelCnnConfig {
    pub backbone: PixelCnnConfig,
    #[config(default = 64)]
    pub context_channels: usize,
}

impl PriorConfig for InpaintingPixelCnnConfig {
    type Model<B> = InpaintingPixelCnn<B> where B: Backend;

    fn num_classes(&self) -> usize {
        self.backbone.num_classes
    }
}

#[derive(Module, Debug)]
pub struct ContextEncoder<B: Backend> {
    convs: Vec<Conv2d<B>>,
}

impl<B: Backend> ContextEncoder<B> {
    pub fn new(input_channels: usize, output_channels: usize, device: &B::Device) -> Self {
        let convs = CONTEXT_DILATIONS
            .iter()
            .enumerate()
            .map(|(i, &dilation)| {
                let channels_in = if i == 0 { input_channels } else { output_channels };
                Conv2dConfig::new([channels_in, output_channels], [3, 3])
                    .with_dilation([dilation, dilation])
                    .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
                    .init(device)
            })
            .collect();

        Self { convs }
    }

    pub fn forward(&self, mut hidden: Tensor<B, 4>) -> Tensor<B, 4> {
        for conv in &self.convs {
            hidden = relu(conv.forward(hidden));
        }

        hidden
    }
}

#[derive(Module, Debug)]
pub struct InpaintingPixelCnn<B: Backend> {
    embedding: Embedding<B>,
    context_encoder: ContextEncoder<B>,
    stack: GatedStack<B>,
    num_classes: usize,
    hidden_channels: usize,
}

impl<B: Backend> InpaintingPixelCnn<B> {
    pub fn embed(&self, codes: Tensor<B, 3, Int>) -> Tensor<B, 4> {
        embed_codes(&self.embedding, codes)
    }

    /// Features of the known codes; an absent context means nothing is known.
    pub fn encode_context(&self, context: Option<CodeContext<B>>, shape: [usize; 3]) -> Tensor<B, 4> {
        let [batch, height, width] = shape;

        let input = match context {
            Some(context) => {
                let known = context.known.float().unsqueeze_dim::<4>(1);
                let codes = self.embed(context.codes)
                    * known.clone().expand([batch, self.hidden_channels, height, width]);
                Tensor::cat(vec![codes, known], 1)
            }
            None => Tensor::zeros([batch, self.hidden_channels + 1, height, width], &self.embedding.weight.val().device()),
        };

        self.context_encoder.forward(input)
    }

    pub fn forward_embedded(
        &self,
        embedded: Tensor<B, 4>,
        context: Option<CodeContext<B>>,
        labels: Option<Tensor<B, 1, Int>>,
    ) -> Tensor<B, 4> {
        let [batch, _, height, width] = embedded.dims();
        let context = self.encode_context(context, [batch, height, width]);

        self.stack.forward(embedded, labels, Some(context))
    }
}

impl<B: Backend> Prior<B> for InpaintingPixelCnn<B> {
    type Config = InpaintingPixelCnnConfig;

    fn new(config: &Self::Config, device: &B::Device) -> Result<Self> {
        let backbone = &config.backbone;
        backbone.validate()?;
        if config.context_channels == 0 {
            return Err(Error::Config("context encoder needs at least one channel".to_string()));
        }

        Ok(Self {
            embedding: EmbeddingConfig::new(backbone.num_classes, backbone.hidden_channels).init(device),
            context_encoder: ContextEncoder::new(backbone.hidden_channels + 1, config.context_channels, device),
            stack: GatedStack::new(&backbone.stack_spec(Some(config.context_channels)), device)?,
            num_classes: backbone.num_classes,
            hidden_channels: backbone.hidden_channels,
        })
    }

    fn forward(&self, input: PriorInput<B>) -> Tensor<B, 4> {
        let embedded = self.embed(input.codes);
        self.forward_embedded(embedded, input.context, input.labels)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn is_row_causal(&self) -> bool {
        false
    }

    fn conditions_on_context(&self) -> bool {
        true
    }
}
