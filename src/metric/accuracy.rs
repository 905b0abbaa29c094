use std::marker::PhantomData;

use burn::prelude::{Backend, ElementConversion, Int, Tensor};
use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use burn::train::metric::state::{FormatOptions, NumericMetricState};

/// Share of code positions whose most likely class is the target code.
#[derive(Default)]
pub struct CodeAccuracyMetric<B: Backend> {
    pub state: NumericMetricState,
    _phantom: PhantomData<B>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeAccuracyInput {
    pub correct: usize,
    pub total: usize,
}

impl CodeAccuracyInput {
    /// Counts matches of the argmax of N x K x H x W logits against N x H x W targets.
    pub fn from_logits<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Self {
        let predictions = logits.argmax(1).squeeze::<3>(1);
        let total = targets.shape().num_elements();
        let correct = predictions.equal(targets).int().sum().into_scalar().elem::<u32>();

        Self {
            correct: correct as usize,
            total,
        }
    }
}

impl<B: Backend> Metric for CodeAccuracyMetric<B> {
    const NAME: &'static str = "Code Accuracy";
    type Input = CodeAccuracyInput;

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        let accuracy = if item.total == 0 {
            0.0
        } else {
            100.0 * item.correct as f64 / item.total as f64
        };

        self.state
            .update(accuracy, item.total, FormatOptions::new(Self::NAME).unit("%").precision(2))
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for CodeAccuracyMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    use super::*;

    #[test]
    fn counts_matching_argmax() {
        let device = Default::default();
        // two classes on a 1 x 2 x 2 grid; class 1 wins at the first two cells
        let logits = Tensor::<NdArray, 4>::from_data(
            TensorData::new(vec![0.0f32, 0.0, 5.0, 5.0, 1.0, 1.0, 0.0, 0.0], [1, 2, 2, 2]),
            &device,
        );
        let targets = Tensor::<NdArray, 3, Int>::from_ints([[[1, 0], [0, 1]]], &device);

        let input = CodeAccuracyInput::from_logits(logits, targets);
        assert_eq!(input, CodeAccuracyInput { correct: 2, total: 4 });
    }
}
