use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Int};
use burn::tensor::Tensor;

use crate::error::{check_shape, Result};
use crate::model::codebook::{CodeBook, CodeBookConfig, Quantized};
use crate::model::layer::{self, Activation, ConvStack, LayerSpec};

#[derive(Config, Debug)]
pub struct VqVaeConfig {
    #[config(default = 3)]
    pub image_channels: usize,
    #[config(default = 512)]
    pub max_filters: usize,
    #[config(default = 4)]
    pub num_layers: usize,
    #[config(default = 2)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub stride: usize,
    #[config(default = 0)]
    pub padding: usize,
    #[config(default = 96)]
    pub input_image_dimensions: usize,
    /// Adds a leading 1x1 convolution that does not downsample.
    #[config(default = false)]
    pub small_conv: bool,
    #[config(default = 64)]
    pub embedding_dim: usize,
    #[config(default = 512)]
    pub num_embeddings: usize,
    #[config(default = 0.25)]
    pub commitment_cost: f64,
    /// Grow the encoder to `max_filters` and project down to the embedding
    /// dimension with a 1x1 convolution. Otherwise the encoder tops out at the
    /// embedding dimension directly.
    #[config(default = true)]
    pub use_max_filters: bool,
}

impl VqVaeConfig {
    fn top_channels(&self) -> usize {
        if self.use_max_filters {
            self.max_filters
        } else {
            self.embedding_dim
        }
    }

    fn channel_sizes(&self) -> Vec<(usize, usize)> {
        let num_layers = self.num_layers + self.small_conv as usize;
        layer::channel_sizes(self.image_channels, self.top_channels(), num_layers)
    }

    pub fn encoder_layers(&self) -> Vec<LayerSpec> {
        layer::encoder_layers(
            &self.channel_sizes(),
            self.kernel_size,
            self.stride,
            self.padding,
            self.small_conv,
        )
    }

    pub fn decoder_layers(&self) -> Vec<LayerSpec> {
        layer::decoder_layers(
            &self.channel_sizes(),
            self.kernel_size,
            self.stride,
            self.padding,
            self.small_conv,
            Activation::Sigmoid,
        )
    }

    /// Side length of the code grid for `input_image_dimensions` sized images.
    pub fn latent_size(&self) -> Result<usize> {
        layer::round_trip(&self.encoder_layers(), &self.decoder_layers(), self.input_image_dimensions)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<VqVae<B>> {
        let encoder_layers = self.encoder_layers();
        let decoder_layers = self.decoder_layers();
        let latent_size = layer::round_trip(&encoder_layers, &decoder_layers, self.input_image_dimensions)?;

        let top = self.top_channels();
        let (pre_quantization, post_quantization) = if self.use_max_filters {
            (
                Some(Conv2dConfig::new([top, self.embedding_dim], [1, 1]).init(device)),
                Some(Conv2dConfig::new([self.embedding_dim, top], [1, 1]).init(device)),
            )
        } else {
            (None, None)
        };

        Ok(VqVae {
            encoder: ConvStack::compile(&encoder_layers, device)?,
            pre_quantization,
            codebook: CodeBookConfig::new(self.num_embeddings, self.embedding_dim)
                .with_commitment_cost(self.commitment_cost)
                .init(device),
            post_quantization,
            decoder: ConvStack::compile(&decoder_layers, device)?,
            latent_size,
        })
    }
}

/// Image autoencoder with a discrete bottleneck.
#[derive(Module, Debug)]
pub struct VqVae<B: Backend> {
    encoder: ConvStack<B>,
    pre_quantization: Option<Conv2d<B>>,
    codebook: CodeBook<B>,
    post_quantization: Option<Conv2d<B>>,
    decoder: ConvStack<B>,
    latent_size: usize,
}

pub struct QuantizedGrid<B: Backend> {
    /// N x D x H x W
    pub quantized: Tensor<B, 4>,
    /// N x H x W
    pub codes: Tensor<B, 3, Int>,
    pub commitment_loss: Tensor<B, 1>,
    pub perplexity: Tensor<B, 1>,
}

pub struct VqVaeOutput<B: Backend> {
    pub reconstruction: Tensor<B, 4>,
    pub commitment_loss: Tensor<B, 1>,
    pub perplexity: Tensor<B, 1>,
    pub codes: Tensor<B, 3, Int>,
}

impl<B: Backend> VqVae<B> {
    pub fn codebook(&self) -> &CodeBook<B> {
        &self.codebook
    }

    pub fn latent_size(&self) -> usize {
        self.latent_size
    }

    pub fn num_embeddings(&self) -> usize {
        self.codebook.num_embeddings()
    }

    pub fn embedding_dim(&self) -> usize {
        self.codebook.embedding_dim()
    }

    /// N x C x S x S images to N x D x H x W continuous features.
    pub fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let hidden = self.encoder.forward(images);

        match &self.pre_quantization {
            Some(conv) => conv.forward(hidden),
            None => hidden,
        }
    }

    pub fn quantize(&self, features: Tensor<B, 4>) -> QuantizedGrid<B> {
        let [batch, dim, height, width] = features.dims();

        // channels last so every row is one grid cell
        let flat = features.permute([0, 2, 3, 1]).reshape([batch * height * width, dim]);

        let Quantized {
            quantized,
            indices,
            commitment_loss,
            perplexity,
        } = self.codebook.quantize(flat);

        QuantizedGrid {
            quantized: quantized
                .reshape([batch, height, width, dim])
                .permute([0, 3, 1, 2]),
            codes: indices.reshape([batch, height, width]),
            commitment_loss,
            perplexity,
        }
    }

    pub fn decode(&self, quantized: Tensor<B, 4>) -> Tensor<B, 4> {
        let hidden = match &self.post_quantization {
            Some(conv) => conv.forward(quantized),
            None => quantized,
        };

        self.decoder.forward(hidden)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> VqVaeOutput<B> {
        let QuantizedGrid {
            quantized,
            codes,
            commitment_loss,
            perplexity,
        } = self.quantize(self.encode(images));

        VqVaeOutput {
            reconstruction: self.decode(quantized),
            commitment_loss,
            perplexity,
            codes,
        }
    }

    /// Code grid for a batch of images.
    pub fn codes(&self, images: Tensor<B, 4>) -> Tensor<B, 3, Int> {
        let features = self.encode(images);
        let [batch, dim, height, width] = features.dims();

        let flat = features.permute([0, 2, 3, 1]).reshape([batch * height * width, dim]);
        self.codebook.nearest(flat).reshape([batch, height, width])
    }

    /// Decodes a flat index tensor laid out as `target_shape`
    /// (`[batch, height, width, embedding_dim]`).
    pub fn quantize_and_decode(&self, indices: Tensor<B, 1, Int>, target_shape: [usize; 4]) -> Result<Tensor<B, 4>> {
        let quantized = self.codebook.lookup_grid(indices, target_shape)?;
        Ok(self.decode(quantized.permute([0, 3, 1, 2])))
    }

    /// Decodes an N x H x W code grid produced by the encoder or a prior.
    pub fn decode_codes(&self, codes: Tensor<B, 3, Int>) -> Result<Tensor<B, 4>> {
        let [batch, height, width] = codes.dims();
        check_shape(
            "code grid",
            &[self.latent_size, self.latent_size],
            &[height, width],
        )?;

        self.quantize_and_decode(
            codes.reshape([batch * height * width]),
            [batch, height, width, self.embedding_dim()],
        )
    }
}
