//! Gated vertical/horizontal stack shared by both priors.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Embedding, EmbeddingConfig};
use burn::prelude::{Backend, Int};
use burn::tensor::activation::{sigmoid, tanh};
use burn::tensor::Tensor;

use crate::error::Result;
use crate::model::prior::conv::{KernelMask, MaskedConv2d, Stack};

/// Dilation schedule of the gated layers.
pub fn dilations(use_dilation: bool) -> [usize; 7] {
    if use_dilation {
        [1, 2, 1, 4, 1, 2, 1]
    } else {
        [1; 7]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GatedStackSpec {
    pub hidden_channels: usize,
    pub num_classes: usize,
    pub kernel_size: usize,
    pub use_dilation: bool,
    pub num_labels: Option<usize>,
    /// Channels of the conditioning feature map added to every layer, if any.
    pub context_channels: Option<usize>,
}

#[derive(Module, Debug)]
pub struct GatedMaskedConv<B: Backend> {
    conv_vert: MaskedConv2d<B>,
    conv_horiz: MaskedConv2d<B>,
    vert_to_horiz: Conv2d<B>,
    horiz_out: Conv2d<B>,
    label: Option<Embedding<B>>,
    context_vert: Option<Conv2d<B>>,
    context_horiz: Option<Conv2d<B>>,
    channels: usize,
}

impl<B: Backend> GatedMaskedConv<B> {
    pub fn new(spec: &GatedStackSpec, dilation: usize, device: &B::Device) -> Result<Self> {
        let c = spec.hidden_channels;
        let vertical = KernelMask::new(Stack::Vertical, spec.kernel_size, false)?;
        let horizontal = KernelMask::new(Stack::Horizontal, spec.kernel_size, false)?;

        Ok(Self {
            conv_vert: MaskedConv2d::new([c, 2 * c], vertical, dilation, device),
            conv_horiz: MaskedConv2d::new([c, 2 * c], horizontal, dilation, device),
            vert_to_horiz: Conv2dConfig::new([2 * c, 2 * c], [1, 1]).init(device),
            horiz_out: Conv2dConfig::new([c, c], [1, 1]).init(device),
            label: spec
                .num_labels
                .map(|labels| EmbeddingConfig::new(labels, 2 * c).init(device)),
            context_vert: spec
                .context_channels
                .map(|channels| Conv2dConfig::new([channels, 2 * c], [1, 1]).init(device)),
            context_horiz: spec
                .context_channels
                .map(|channels| Conv2dConfig::new([channels, 2 * c], [1, 1]).init(device)),
            channels: c,
        })
    }

    pub fn forward(
        &self,
        vertical: Tensor<B, 4>,
        horizontal: Tensor<B, 4>,
        labels: Option<Tensor<B, 1, Int>>,
        context: Option<Tensor<B, 4>>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, _, height, width] = vertical.dims();

        let mut v_feat = self.conv_vert.forward(vertical);
        let mut h_feat = self.conv_horiz.forward(horizontal.clone()) + self.vert_to_horiz.forward(v_feat.clone());

        if let (Some(embedding), Some(labels)) = (&self.label, labels) {
            let shift = embedding
                .forward(labels.reshape([batch, 1]))
                .reshape([batch, 2 * self.channels, 1, 1])
                .expand([batch, 2 * self.channels, height, width]);
            v_feat = v_feat + shift.clone();
            h_feat = h_feat + shift;
        }

        if let (Some(context_vert), Some(context_horiz), Some(context)) =
            (&self.context_vert, &self.context_horiz, context)
        {
            v_feat = v_feat + context_vert.forward(context.clone());
            h_feat = h_feat + context_horiz.forward(context);
        }

        let vertical = gate(v_feat, self.channels);
        let horizontal = self.horiz_out.forward(gate(h_feat, self.channels)) + horizontal;

        (vertical, horizontal)
    }
}

/// `tanh(value) * sigmoid(gate)` over the two channel halves.
fn gate<B: Backend>(features: Tensor<B, 4>, channels: usize) -> Tensor<B, 4> {
    let value = features.clone().narrow(1, 0, channels);
    let gate = features.narrow(1, channels, channels);

    tanh(value) * sigmoid(gate)
}

fn elu<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 4> {
    let negative = features.clone().clamp_max(0.0).exp() - 1.0;
    features.clamp_min(0.0) + negative
}

/// First masked convolutions, the gated layers and the logit head.
#[derive(Module, Debug)]
pub struct GatedStack<B: Backend> {
    conv_vstack: MaskedConv2d<B>,
    conv_hstack: MaskedConv2d<B>,
    layers: Vec<GatedMaskedConv<B>>,
    conv_out: Conv2d<B>,
}

impl<B: Backend> GatedStack<B> {
    pub fn new(spec: &GatedStackSpec, device: &B::Device) -> Result<Self> {
        let c = spec.hidden_channels;
        let vertical = KernelMask::new(Stack::Vertical, spec.kernel_size, true)?;
        let horizontal = KernelMask::new(Stack::Horizontal, spec.kernel_size, true)?;

        let layers = dilations(spec.use_dilation)
            .into_iter()
            .map(|dilation| GatedMaskedConv::new(spec, dilation, device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            conv_vstack: MaskedConv2d::new([c, c], vertical, 1, device),
            conv_hstack: MaskedConv2d::new([c, c], horizontal, 1, device),
            layers,
            conv_out: Conv2dConfig::new([c, spec.num_classes], [1, 1]).init(device),
        })
    }

    /// Embedded N x C x H x W grid to N x K x H x W logits.
    pub fn forward(
        &self,
        embedded: Tensor<B, 4>,
        labels: Option<Tensor<B, 1, Int>>,
        context: Option<Tensor<B, 4>>,
    ) -> Tensor<B, 4> {
        let mut vertical = self.conv_vstack.forward(embedded.clone());
        let mut horizontal = self.conv_hstack.forward(embedded);

        for layer in &self.layers {
            (vertical, horizontal) = layer.forward(vertical, horizontal, labels.clone(), context.clone());
        }

        self.conv_out.forward(elu(horizontal))
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    use super::*;

    type B = NdArray;

    fn spec() -> GatedStackSpec {
        GatedStackSpec {
            hidden_channels: 4,
            num_classes: 6,
            kernel_size: 3,
            use_dilation: true,
            num_labels: Some(3),
            context_channels: Some(5),
        }
    }

    #[test]
    fn dilation_schedule() {
        assert_eq!(dilations(true), [1, 2, 1, 4, 1, 2, 1]);
        assert_eq!(dilations(false), [1; 7]);
    }

    #[test]
    fn gated_layer_keeps_shapes() {
        let device = Default::default();
        let layer = GatedMaskedConv::<B>::new(&spec(), 4, &device).unwrap();

        let vertical = Tensor::<B, 4>::random([2, 4, 5, 5], Distribution::Default, &device);
        let horizontal = Tensor::<B, 4>::random([2, 4, 5, 5], Distribution::Default, &device);
        let context = Tensor::<B, 4>::random([2, 5, 5, 5], Distribution::Default, &device);
        let labels = Tensor::<B, 1, Int>::from_ints([0, 2], &device);

        let (vertical, horizontal) = layer.forward(vertical, horizontal, Some(labels), Some(context));
        assert_eq!(vertical.dims(), [2, 4, 5, 5]);
        assert_eq!(horizontal.dims(), [2, 4, 5, 5]);
    }

    #[test]
    fn stack_outputs_class_logits() {
        let device = Default::default();
        let stack = GatedStack::<B>::new(&spec(), &device).unwrap();

        let embedded = Tensor::<B, 4>::random([3, 4, 4, 6], Distribution::Default, &device);
        assert_eq!(stack.forward(embedded, None, None).dims(), [3, 6, 4, 6]);
    }

    #[test]
    fn labels_change_the_logits() {
        let device = Default::default();
        let stack = GatedStack::<B>::new(&spec(), &device).unwrap();
        let embedded = Tensor::<B, 4>::random([1, 4, 4, 4], Distribution::Default, &device);

        let first = stack.forward(embedded.clone(), Some(Tensor::from_ints([0], &device)), None);
        let second = stack.forward(embedded, Some(Tensor::from_ints([1], &device)), None);

        let difference = (first - second).abs().sum().into_scalar();
        assert!(difference > 0.0);
    }
}
