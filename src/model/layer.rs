//! Declarative convolution stacks.
//!
//! Encoders and decoders are described as a flat list of [`LayerSpec`] values,
//! checked once by [`validate`] and compiled into a [`ConvStack`]. Every size or
//! channel computation works on the typed spec, so nothing downstream has to
//! inspect a built layer to find out what it is.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::{relu, sigmoid};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, tensor: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => relu(tensor),
            Activation::Sigmoid => sigmoid(tensor),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub bias: bool,
}

impl ConvSpec {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize, stride: usize, padding: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            bias: false,
        }
    }

    /// 1x1 convolution with bias, used for the small-conv entry/exit layers and projections.
    pub fn pointwise(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 1,
            stride: 1,
            padding: 0,
            bias: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerSpec {
    Conv(ConvSpec),
    ConvTranspose(ConvSpec),
    Norm { channels: usize },
    Activation(Activation),
}

impl LayerSpec {
    /// Spatial size after this layer for a square input of `size`, or `None`
    /// when the input is too small for the kernel.
    pub fn output_size(&self, size: usize) -> Option<usize> {
        match self {
            LayerSpec::Conv(conv) => (size + 2 * conv.padding)
                .checked_sub(conv.kernel_size)?
                .checked_div(conv.stride)
                .map(|steps| steps + 1),
            LayerSpec::ConvTranspose(conv) => size
                .checked_sub(1)?
                .checked_mul(conv.stride)?
                .checked_add(conv.kernel_size)?
                .checked_sub(2 * conv.padding),
            LayerSpec::Norm { .. } | LayerSpec::Activation(_) => Some(size),
        }
    }

    pub fn output_channels(&self) -> Option<usize> {
        match self {
            LayerSpec::Conv(conv) | LayerSpec::ConvTranspose(conv) => Some(conv.out_channels),
            LayerSpec::Norm { .. } | LayerSpec::Activation(_) => None,
        }
    }
}

/// `(in, out)` channel pairs for a stack of `num_layers` convolutions that
/// starts at `max_filters / 2^(num_layers - 1)` and doubles up to `max_filters`.
pub fn channel_sizes(image_channels: usize, max_filters: usize, num_layers: usize) -> Vec<(usize, usize)> {
    let first = max_filters >> (num_layers.max(1) - 1);

    let mut sizes = vec![(image_channels, first)];
    for _ in 1..num_layers {
        let prev = sizes[sizes.len() - 1].1;
        sizes.push((prev, prev * 2));
    }

    sizes
}

pub fn output_size(layers: &[LayerSpec], input_size: usize) -> Option<usize> {
    layers
        .iter()
        .try_fold(input_size, |size, layer| layer.output_size(size))
}

/// Side of the encoder's feature map for `image_size` images, provided the
/// decoder maps it back to `image_size`.
pub fn round_trip(encoder: &[LayerSpec], decoder: &[LayerSpec], image_size: usize) -> Result<usize> {
    let latent = output_size(encoder, image_size).filter(|&size| size > 0);
    let restored = latent.and_then(|size| output_size(decoder, size));

    match (latent, restored) {
        (Some(latent), Some(restored)) if restored == image_size => Ok(latent),
        _ => Err(Error::Config(format!(
            "{image_size}x{image_size} images do not survive the encoder/decoder round trip (got {restored:?})"
        ))),
    }
}

pub fn output_channels(layers: &[LayerSpec]) -> Option<usize> {
    layers.iter().rev().find_map(LayerSpec::output_channels)
}

/// Conv -> BatchNorm -> ReLU for every channel pair. With `small_conv` the
/// first pair becomes a 1x1 convolution that keeps the resolution.
pub fn encoder_layers(
    channels: &[(usize, usize)],
    kernel_size: usize,
    stride: usize,
    padding: usize,
    small_conv: bool,
) -> Vec<LayerSpec> {
    let mut layers = Vec::with_capacity(channels.len() * 3);

    for (i, &(in_channels, out_channels)) in channels.iter().enumerate() {
        let conv = if small_conv && i == 0 {
            ConvSpec::pointwise(in_channels, out_channels)
        } else {
            ConvSpec::new(in_channels, out_channels, kernel_size, stride, padding)
        };

        layers.push(LayerSpec::Conv(conv));
        layers.push(LayerSpec::Norm { channels: out_channels });
        layers.push(LayerSpec::Activation(Activation::Relu));
    }

    layers
}

/// Mirror of [`encoder_layers`] built from transposed convolutions. The last
/// layer ends in `final_activation` instead of ReLU.
pub fn decoder_layers(
    channels: &[(usize, usize)],
    kernel_size: usize,
    stride: usize,
    padding: usize,
    small_conv: bool,
    final_activation: Activation,
) -> Vec<LayerSpec> {
    let num_layers = channels.len();
    let mut layers = Vec::with_capacity(num_layers * 3);

    for (i, &(out_channels, in_channels)) in channels.iter().rev().enumerate() {
        let last = i == num_layers - 1;
        let conv = if small_conv && last {
            ConvSpec::pointwise(in_channels, out_channels)
        } else {
            ConvSpec::new(in_channels, out_channels, kernel_size, stride, padding)
        };

        layers.push(LayerSpec::ConvTranspose(conv));
        layers.push(LayerSpec::Norm { channels: out_channels });
        layers.push(LayerSpec::Activation(if last {
            final_activation
        } else {
            Activation::Relu
        }));
    }

    layers
}

/// Checks that channels chain through the list and that every norm or
/// activation belongs to a preceding convolution.
pub fn validate(layers: &[LayerSpec]) -> Result<()> {
    let mut channels: Option<usize> = None;
    let mut norm_seen = false;
    let mut activation_seen = false;

    for (i, layer) in layers.iter().enumerate() {
        match layer {
            LayerSpec::Conv(conv) | LayerSpec::ConvTranspose(conv) => {
                if conv.kernel_size == 0 || conv.stride == 0 {
                    return Err(Error::Config(format!("layer {i}: kernel size and stride must be positive")));
                }
                if let Some(current) = channels {
                    if current != conv.in_channels {
                        return Err(Error::Config(format!(
                            "layer {i}: expects {} input channels but receives {current}",
                            conv.in_channels
                        )));
                    }
                }
                channels = Some(conv.out_channels);
                norm_seen = false;
                activation_seen = false;
            }
            LayerSpec::Norm { channels: norm_channels } => {
                match channels {
                    Some(current) if current == *norm_channels && !norm_seen && !activation_seen => {}
                    Some(current) if current != *norm_channels => {
                        return Err(Error::Config(format!(
                            "layer {i}: norm over {norm_channels} channels after a {current} channel convolution"
                        )))
                    }
                    _ => return Err(Error::Config(format!("layer {i}: norm must directly follow a convolution"))),
                }
                norm_seen = true;
            }
            LayerSpec::Activation(_) => {
                if channels.is_none() || activation_seen {
                    return Err(Error::Config(format!("layer {i}: activation must follow a convolution")));
                }
                activation_seen = true;
            }
        }
    }

    Ok(())
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Option<Conv2d<B>>,
    transposed: Option<ConvTranspose2d<B>>,
    norm: Option<BatchNorm<B, 2>>,
    activation: Ignored<Option<Activation>>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(conv: &LayerSpec, device: &B::Device) -> Self {
        let (conv, transposed) = match conv {
            LayerSpec::Conv(spec) => (
                Some(
                    Conv2dConfig::new([spec.in_channels, spec.out_channels], [spec.kernel_size; 2])
                        .with_stride([spec.stride; 2])
                        .with_padding(PaddingConfig2d::Explicit(spec.padding, spec.padding))
                        .with_bias(spec.bias)
                        .init(device),
                ),
                None,
            ),
            LayerSpec::ConvTranspose(spec) => (
                None,
                Some(
                    ConvTranspose2dConfig::new([spec.in_channels, spec.out_channels], [spec.kernel_size; 2])
                        .with_stride([spec.stride; 2])
                        .with_padding([spec.padding; 2])
                        .with_bias(spec.bias)
                        .init(device),
                ),
            ),
            LayerSpec::Norm { .. } | LayerSpec::Activation(_) => (None, None),
        };

        Self {
            conv,
            transposed,
            norm: None,
            activation: Ignored(None),
        }
    }

    pub fn forward(&self, hidden: Tensor<B, 4>) -> Tensor<B, 4> {
        let hidden = match (&self.conv, &self.transposed) {
            (Some(conv), _) => conv.forward(hidden),
            (None, Some(transposed)) => transposed.forward(hidden),
            (None, None) => hidden,
        };

        let hidden = match &self.norm {
            Some(norm) => norm.forward(hidden),
            None => hidden,
        };

        match self.activation.0 {
            Some(activation) => activation.forward(hidden),
            None => hidden,
        }
    }
}

/// A validated layer list compiled into conv/norm/activation blocks.
#[derive(Module, Debug)]
pub struct ConvStack<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
}

impl<B: Backend> ConvStack<B> {
    pub fn compile(layers: &[LayerSpec], device: &B::Device) -> Result<Self> {
        validate(layers)?;

        let mut blocks: Vec<ConvBlock<B>> = Vec::new();
        for layer in layers {
            match layer {
                LayerSpec::Conv(_) | LayerSpec::ConvTranspose(_) => {
                    blocks.push(ConvBlock::new(layer, device));
                }
                LayerSpec::Norm { channels } => {
                    if let Some(block) = blocks.last_mut() {
                        block.norm = Some(BatchNormConfig::new(*channels).init(device));
                    }
                }
                LayerSpec::Activation(activation) => {
                    if let Some(block) = blocks.last_mut() {
                        block.activation = Ignored(Some(*activation));
                    }
                }
            }
        }

        Ok(Self { blocks })
    }

    pub fn forward(&self, mut hidden: Tensor<B, 4>) -> Tensor<B, 4> {
        for block in &self.blocks {
            hidden = block.forward(hidden);
        }

        hidden
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    #[test]
    fn channel_sizes_double_up_to_max_filters() {
        assert_eq!(
            channel_sizes(3, 512, 4),
            vec![(3, 64), (64, 128), (128, 256), (256, 512)]
        );
        assert_eq!(channel_sizes(3, 512, 1), vec![(3, 512)]);
    }

    #[test]
    fn encoder_and_decoder_sizes_mirror() {
        let channels = channel_sizes(3, 64, 3);
        let encoder = encoder_layers(&channels, 2, 2, 0, false);
        let decoder = decoder_layers(&channels, 2, 2, 0, false, Activation::Sigmoid);

        assert_eq!(output_size(&encoder, 32), Some(4));
        assert_eq!(output_channels(&encoder), Some(64));
        assert_eq!(output_size(&decoder, 4), Some(32));
        assert_eq!(round_trip(&encoder, &decoder, 32).unwrap(), 4);
        assert_eq!(output_channels(&decoder), Some(3));
    }

    #[test]
    fn small_conv_keeps_resolution_on_first_layer() {
        let channels = channel_sizes(3, 64, 2);
        let encoder = encoder_layers(&channels, 2, 2, 0, true);

        assert_eq!(output_size(&encoder, 16), Some(8));
        assert_eq!(encoder[0], LayerSpec::Conv(ConvSpec::pointwise(3, 32)));
    }

    #[test]
    fn images_smaller_than_the_kernel_are_a_config_error() {
        let channels = channel_sizes(3, 16, 2);
        let encoder = encoder_layers(&channels, 3, 2, 0, false);
        let decoder = decoder_layers(&channels, 3, 2, 0, false, Activation::Sigmoid);

        assert_eq!(output_size(&encoder, 1), None);
        assert_eq!(LayerSpec::ConvTranspose(ConvSpec::new(4, 4, 2, 2, 0)).output_size(0), None);
        assert!(matches!(round_trip(&encoder, &decoder, 1), Err(Error::Config(_))));
        assert!(matches!(round_trip(&encoder, &decoder, 2), Err(Error::Config(_))));
    }

    #[test]
    fn validate_rejects_broken_channel_chain() {
        let layers = vec![
            LayerSpec::Conv(ConvSpec::new(3, 8, 2, 2, 0)),
            LayerSpec::Conv(ConvSpec::new(4, 8, 2, 2, 0)),
        ];
        assert!(matches!(validate(&layers), Err(Error::Config(_))));

        let layers = vec![LayerSpec::Activation(Activation::Relu)];
        assert!(validate(&layers).is_err());

        let layers = vec![
            LayerSpec::Conv(ConvSpec::new(3, 8, 2, 2, 0)),
            LayerSpec::Norm { channels: 4 },
        ];
        assert!(validate(&layers).is_err());
    }

    #[test]
    fn compiled_stack_matches_spec_shapes() {
        let device = Default::default();
        let channels = channel_sizes(1, 16, 2);
        let layers = encoder_layers(&channels, 2, 2, 0, false);
        let stack = ConvStack::<NdArray>::compile(&layers, &device).unwrap();

        assert_eq!(stack.num_blocks(), 2);

        let input = Tensor::<NdArray, 4>::random([2, 1, 8, 8], Distribution::Default, &device);
        let output = stack.forward(input);
        assert_eq!(output.dims(), [2, 16, 2, 2]);
    }
}
