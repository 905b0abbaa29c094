//! Per-epoch loss history shared between the learner and the checkpoint writer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use burn::train::metric::{Metric, MetricEntry, MetricMetadata, Numeric};
use burn::train::metric::state::{FormatOptions, NumericMetricState};

/// Handle to the epoch means recorded by a [`LossHistoryMetric`].
#[derive(Clone, Debug, Default)]
pub struct LossHistory {
    epochs: Arc<Mutex<Vec<f64>>>,
}

impl LossHistory {
    pub fn metric(&self) -> LossHistoryMetric {
        LossHistoryMetric {
            state: NumericMetricState::default(),
            history: self.clone(),
            sum: 0.0,
            count: 0,
        }
    }

    pub fn epochs(&self) -> Vec<f64> {
        self.lock().clone()
    }

    fn push(&self, mean: f64) {
        self.lock().push(mean);
    }

    // A panic while holding the lock cannot leave the vector half-written,
    // so a poisoned lock still holds every recorded epoch.
    fn lock(&self) -> MutexGuard<'_, Vec<f64>> {
        self.epochs.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::warn!("loss history lock was poisoned, recovering recorded epochs");
            poisoned.into_inner()
        })
    }
}

pub struct LossHistoryInput {
    pub value: f64,
    pub batch_size: usize,
}

/// Mean loss of the running epoch; appends it to the history when the
/// learner clears the metric at the end of the epoch.
pub struct LossHistoryMetric {
    state: NumericMetricState,
    history: LossHistory,
    sum: f64,
    count: usize,
}

impl Metric for LossHistoryMetric {
    const NAME: &'static str = "Epoch Loss";
    type Input = LossHistoryInput;

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        self.sum += item.value * item.batch_size as f64;
        self.count += item.batch_size;

        let mean = self.sum / self.count as f64;
        self.state
            .update(mean, item.batch_size, FormatOptions::new(Self::NAME).precision(4))
    }

    fn clear(&mut self) {
        if self.count > 0 {
            self.history.push(self.sum / self.count as f64);
        }

        self.sum = 0.0;
        self.count = 0;
        self.state.reset();
    }
}

impl Numeric for LossHistoryMetric {
    fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
