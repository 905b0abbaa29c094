//! Model bundles: a directory with the model record, its configuration and
//! the per-epoch loss history.

use std::fs;
use std::path::Path;

use burn::config::Config;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{CompactRecorder, Recorder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::metric::history::LossHistory;

const MODEL_FILE: &str = "model";
const CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "history.json";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Number of completed epochs.
    pub epoch: usize,
    pub train_loss: Vec<f64>,
    pub valid_loss: Vec<f64>,
}

impl History {
    pub fn from_losses(train: &LossHistory, valid: &LossHistory) -> Self {
        let train_loss = train.epochs();
        let valid_loss = valid.epochs();

        Self {
            epoch: train_loss.len(),
            train_loss,
            valid_loss,
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(dir.join(HISTORY_FILE))?)?)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(HISTORY_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub fn save<B: Backend, M: Module<B>, C: Config>(dir: &Path, model: &M, config: &C, history: &History) -> Result<()> {
    fs::create_dir_all(dir)?;

    CompactRecorder::new().record(model.clone().into_record(), dir.join(MODEL_FILE))?;
    fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(config)?)?;
    history.save(dir)?;

    info!(dir = %dir.display(), epoch = history.epoch, "saved checkpoint");
    Ok(())
}

pub fn load_config<C: Config>(dir: &Path) -> Result<C> {
    Ok(serde_json::from_str(&fs::read_to_string(dir.join(CONFIG_FILE))?)?)
}

/// Loads the stored weights into `model`, which must have the bundle's architecture.
pub fn load_model<B: Backend, M: Module<B>>(dir: &Path, model: M, device: &B::Device) -> Result<M> {
    let record = CompactRecorder::new().load(dir.join(MODEL_FILE), device)?;
    info!(dir = %dir.display(), "loaded checkpoint");

    Ok(model.load_record(record))
}
