use std::marker::PhantomData;

use burn::prelude::Backend;
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use burn::train::metric::state::{FormatOptions, NumericMetricState};

/// Average code book perplexity over the batches of an epoch.
#[derive(Default)]
pub struct PerplexityMetric<B: Backend> {
    pub state: NumericMetricState,
    _phantom: PhantomData<B>,
}

pub struct PerplexityInput {
    pub value: f32,
    pub batch_size: usize,
}

impl<B: Backend> Metric for PerplexityMetric<B> {
    const NAME: &'static str = "Code Perplexity";
    type Input = PerplexityInput;

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        self.state.update(
            item.value as f64,
            item.batch_size,
            FormatOptions::new(Self::NAME).precision(2),
        )
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for PerplexityMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}
