//! The two halves of a stage-1 loss, reported separately.

use std::marker::PhantomData;

use burn::prelude::Backend;
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use burn::train::metric::state::{FormatOptions, NumericMetricState};

pub struct LossTermInput {
    pub value: f32,
    pub batch_size: usize,
}

#[derive(Default)]
pub struct ReconstructionLossMetric<B: Backend> {
    pub state: NumericMetricState,
    _phantom: PhantomData<B>,
}

pub struct ReconstructionLossInput(pub LossTermInput);

impl<B: Backend> Metric for ReconstructionLossMetric<B> {
    const NAME: &'static str = "Reconstruction Loss";
    type Input = ReconstructionLossInput;

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        let LossTermInput { value, batch_size } = item.0;
        self.state
            .update(value as f64, batch_size, FormatOptions::new(Self::NAME).precision(4))
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for ReconstructionLossMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

/// Commitment loss for the VQ-VAE, KL divergence for the VAE.
#[derive(Default)]
pub struct RegularizerMetric<B: Backend> {
    pub state: NumericMetricState,
    _phantom: PhantomData<B>,
}

pub struct RegularizerInput(pub LossTermInput);

impl<B: Backend> Metric for RegularizerMetric<B> {
    const NAME: &'static str = "Regularizer";
    type Input = RegularizerInput;

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        let LossTermInput { value, batch_size } = item.0;
        self.state
            .update(value as f64, batch_size, FormatOptions::new(Self::NAME).precision(4))
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for RegularizerMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
