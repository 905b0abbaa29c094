//! Learner progress routed through `tracing` instead of the terminal dashboard.

use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};
use tracing::{debug, info};

/// Logs metric updates at debug level and one line per finished epoch split.
#[derive(Debug, Default)]
pub struct TracingRenderer;

impl TracingRenderer {
    fn progress(split: &'static str, item: TrainingProgress) {
        let progress = item.progress;
        if progress.items_total > 0 && progress.items_processed >= progress.items_total {
            info!(split, epoch = item.epoch, of = item.epoch_total, "epoch split done");
        }
    }

    fn metric(split: &'static str, state: MetricState) {
        match state {
            MetricState::Generic(entry) => debug!(split, metric = %entry.name, value = %entry.formatted),
            MetricState::Numeric(entry, value) => debug!(split, metric = %entry.name, value),
        }
    }
}

impl MetricsRenderer for TracingRenderer {
    fn update_train(&mut self, state: MetricState) {
        Self::metric("train", state);
    }

    fn update_valid(&mut self, state: MetricState) {
        Self::metric("valid", state);
    }

    fn render_train(&mut self, item: TrainingProgress) {
        Self::progress("train", item);
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        Self::progress("valid", item);
    }
}
