//! Continuous-latent convolutional autoencoders.
//!
//! Both models share the conv encoder/decoder stacks of the VQ-VAE but squeeze
//! the feature map through a dense bottleneck of `latent_dim` units.

use burn::config::Config;
use burn::module::{Module, ModuleMapper, ParamId};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::Backend;
use burn::tensor::activation::sigmoid;
use burn::tensor::{Distribution, Tensor};

use crate::error::Result;
use crate::model::layer::{self, Activation, ConvStack, LayerSpec};
use crate::model::loss::VaeLossWeights;

#[derive(Config, Debug)]
pub struct AutoencoderConfig {
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
    #[config(default = 128)]
    pub latent_dim: usize,
    #[config(default = 96)]
    pub input_image_dimensions: usize,
    #[config(default = false)]
    pub small_conv: bool,
    /// VAE only: sum instead of average the loss terms over the batch.
    #[config(default = true)]
    pub use_sum: bool,
    #[config(default = 1.0)]
    pub reconstruction_weight: f64,
    #[config(default = 1.0)]
    pub kl_weight: f64,
}

struct Stacks<B: Backend> {
    encoder: ConvStack<B>,
    decoder: ConvStack<B>,
    hidden_dim: usize,
    feature_size: usize,
}

impl AutoencoderConfig {
    fn channel_sizes(&self) -> Vec<(usize, usize)> {
        let num_layers = self.num_layers + self.small_conv as usize;
        layer::channel_sizes(self.image_channels, self.max_filters, num_layers)
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

    /// Flattened encoder output size and the side length of its feature map.
    pub fn flattened_size(&self) -> Result<(usize, usize)> {
        let layers = self.encoder_layers();
        let size = layer::round_trip(&layers, &self.decoder_layers(), self.input_image_dimensions)?;
        let filters = layer::output_channels(&layers).unwrap_or(self.image_channels);

        Ok((filters * size * size, size))
    }

    fn stacks<B: Backend>(&self, device: &B::Device) -> Result<Stacks<B>> {
        let (hidden_dim, feature_size) = self.flattened_size()?;

        Ok(Stacks {
            encoder: ConvStack::compile(&self.encoder_layers(), device)?,
            decoder: ConvStack::compile(&self.decoder_layers(), device)?,
            hidden_dim,
            feature_size,
        })
    }

    pub fn init_ae<B: Backend>(&self, device: &B::Device) -> Result<ConvolutionalAe<B>> {
        let stacks = self.stacks(device)?;

        Ok(ConvolutionalAe {
            encoder: stacks.encoder,
            to_latent: LinearConfig::new(stacks.hidden_dim, self.latent_dim).init(device),
            from_latent: LinearConfig::new(self.latent_dim, stacks.hidden_dim).init(device),
            decoder: stacks.decoder,
            max_filters: self.max_filters,
            feature_size: stacks.feature_size,
        })
    }

    pub fn init_vae<B: Backend>(&self, device: &B::Device) -> Result<ConvolutionalVae<B>> {
        let stacks = self.stacks(device)?;

        Ok(ConvolutionalVae {
            encoder: stacks.encoder,
            fc_mu: LinearConfig::new(stacks.hidden_dim, self.latent_dim).init(device),
            fc_log_var: LinearConfig::new(stacks.hidden_dim, self.latent_dim).init(device),
            from_latent: LinearConfig::new(self.latent_dim, stacks.hidden_dim).init(device),
            decoder: stacks.decoder,
            max_filters: self.max_filters,
            feature_size: stacks.feature_size,
            use_sum: self.use_sum,
            reconstruction_weight: self.reconstruction_weight,
            kl_weight: self.kl_weight,
        })
    }
}

#[derive(Module, Debug)]
pub struct ConvolutionalAe<B: Backend> {
    encoder: ConvStack<B>,
    to_latent: Linear<B>,
    from_latent: Linear<B>,
    decoder: ConvStack<B>,
    max_filters: usize,
    feature_size: usize,
}

impl<B: Backend> ConvolutionalAe<B> {
    pub fn encode(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let hidden = self.encoder.forward(images).flatten(1, 3);
        sigmoid(self.to_latent.forward(hidden))
    }

    pub fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch, _] = latent.dims();
        let hidden = sigmoid(self.from_latent.forward(latent));
        let hidden = hidden.reshape([batch, self.max_filters, self.feature_size, self.feature_size]);

        self.decoder.forward(hidden)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.decode(self.encode(images))
    }

    /// Stops (or resumes) gradient tracking for every convolution and norm
    /// parameter; the dense bottleneck stays trainable.
    pub fn set_convolutions_trainable(mut self, trainable: bool) -> Self {
        self.encoder = set_trainable(self.encoder, trainable);
        self.decoder = set_trainable(self.decoder, trainable);
        self
    }

    pub fn freeze_convolutions(self) -> Self {
        self.set_convolutions_trainable(false)
    }
}

#[derive(Module, Debug)]
pub struct ConvolutionalVae<B: Backend> {
    encoder: ConvStack<B>,
    fc_mu: Linear<B>,
    fc_log_var: Linear<B>,
    from_latent: Linear<B>,
    decoder: ConvStack<B>,
    max_filters: usize,
    feature_size: usize,
    use_sum: bool,
    reconstruction_weight: f64,
    kl_weight: f64,
}

pub struct VaeOutput<B: Backend> {
    pub reconstruction: Tensor<B, 4>,
    pub mu: Tensor<B, 2>,
    pub log_var: Tensor<B, 2>,
}

impl<B: Backend> ConvolutionalVae<B> {
    pub fn loss_weights(&self) -> VaeLossWeights {
        VaeLossWeights {
            use_sum: self.use_sum,
            reconstruction: self.reconstruction_weight,
            kl: self.kl_weight,
        }
    }

    /// Mean and log-variance of the posterior.
    pub fn encode(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let hidden = self.encoder.forward(images).flatten(1, 3);
        (self.fc_mu.forward(hidden.clone()), self.fc_log_var.forward(hidden))
    }

    pub fn reparameterize(&self, mu: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 2> {
        let std = (log_var * 0.5).exp();
        let epsilon = Tensor::random_like(&mu, Distribution::Normal(0.0, 1.0));

        mu + epsilon * std
    }

    pub fn decode(&self, latent: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch, _] = latent.dims();
        let hidden = self.from_latent.forward(latent);
        let hidden = hidden.reshape([batch, self.max_filters, self.feature_size, self.feature_size]);

        self.decoder.forward(hidden)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> VaeOutput<B> {
        let (mu, log_var) = self.encode(images);
        let latent = self.reparameterize(mu.clone(), log_var.clone());

        VaeOutput {
            reconstruction: self.decode(latent),
            mu,
            log_var,
        }
    }

    pub fn set_convolutions_trainable(mut self, trainable: bool) -> Self {
        self.encoder = set_trainable(self.encoder, trainable);
        self.decoder = set_trainable(self.decoder, trainable);
        self
    }

    pub fn freeze_convolutions(self) -> Self {
        self.set_convolutions_trainable(false)
    }
}

struct RequireGrad {
    require_grad: bool,
}

impl<B: Backend> ModuleMapper<B> for RequireGrad {
    fn map_float<const D: usize>(&mut self, _id: &ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.set_require_grad(self.require_grad)
    }
}

fn set_trainable<B: Backend, M: Module<B>>(module: M, trainable: bool) -> M {
    module.map(&mut RequireGrad {
        require_grad: trainable,
    })
}

#[cfg(test)]
mod tests {
    use burn::backend::{Autodiff, NdArray};

    use super::*;
    use crate::error::Error;

    type B = NdArray;

    fn config() -> AutoencoderConfig {
        AutoencoderConfig::new()
            .with_max_filters(16)
            .with_num_layers(2)
            .with_latent_dim(6)
            .with_input_image_dimensions(8)
    }

    #[test]
    fn flattened_size_follows_the_layer_spec() {
        assert_eq!(config().flattened_size().unwrap(), (16 * 2 * 2, 2));
        assert_eq!(config().with_small_conv(true).flattened_size().unwrap(), (16 * 2 * 2, 2));
        assert!(matches!(
            config().with_input_image_dimensions(1).flattened_size(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn autoencoder_round_trips_shape() {
        let device = Default::default();
        let model = config().init_ae::<B>(&device).unwrap();
        let images = Tensor::<B, 4>::random([2, 3, 8, 8], Distribution::Default, &device);

        assert_eq!(model.encode(images.clone()).dims(), [2, 6]);
        assert_eq!(model.forward(images).dims(), [2, 3, 8, 8]);
    }

    #[test]
    fn vae_reports_posterior_parameters() {
        let device = Default::default();
        let model = config().with_small_conv(true).init_vae::<B>(&device).unwrap();
        let images = Tensor::<B, 4>::random([3, 3, 8, 8], Distribution::Default, &device);

        let output = model.forward(images);
        assert_eq!(output.reconstruction.dims(), [3, 3, 8, 8]);
        assert_eq!(output.mu.dims(), [3, 6]);
        assert_eq!(output.log_var.dims(), [3, 6]);
    }

    #[test]
    fn frozen_convolutions_receive_no_gradients() {
        type AB = Autodiff<NdArray>;

        #[derive(Default)]
        struct GradCount<'a> {
            grads: Option<&'a <AB as burn::tensor::backend::AutodiffBackend>::Gradients>,
            with_grad: usize,
        }

        impl<'a> burn::module::ModuleVisitor<AB> for GradCount<'a> {
            fn visit_float<const D: usize>(&mut self, _id: &ParamId, tensor: &Tensor<AB, D>) {
                if let Some(grads) = self.grads {
                    if tensor.grad(grads).is_some() {
                        self.with_grad += 1;
                    }
                }
            }
        }

        let device = Default::default();
        let model = config().init_ae::<AB>(&device).unwrap().freeze_convolutions();
        let images = Tensor::<AB, 4>::random([2, 3, 8, 8], Distribution::Default, &device);

        let grads = model.forward(images).sum().backward();

        let mut convs = GradCount {
            grads: Some(&grads),
            ..Default::default()
        };
        model.encoder.visit(&mut convs);
        model.decoder.visit(&mut convs);
        assert_eq!(convs.with_grad, 0);

        let mut dense = GradCount {
            grads: Some(&grads),
            ..Default::default()
        };
        model.to_latent.visit(&mut dense);
        model.from_latent.visit(&mut dense);
        assert_eq!(dense.with_grad, 4);
    }
}
