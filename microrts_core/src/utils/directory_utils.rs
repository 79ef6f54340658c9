// Directory utilities - output layout of a training run
use std::fs;
use std::path::{Path, PathBuf};

use crate::trainers::settings::RunConfig;

/// `<output>/<N>x<N>/{runs,models}/<timestamp>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    base: PathBuf,
    timestamp: String,
}

impl RunLayout {
    pub fn new(output_folder: &Path, map_dims: &str, timestamp: &str) -> Self {
        Self {
            base: output_folder.join(map_dims),
            timestamp: timestamp.to_string(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(&config.output_folder, &config.map_size.dims(), &config.timestamp)
    }

    /// Tensorboard logs, resolved configuration and evaluation history.
    pub fn run_logs_dir(&self) -> PathBuf {
        self.base.join("runs").join(&self.timestamp)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.base.join("models")
    }

    /// Directory handed to the tracking callback for its own snapshots.
    pub fn model_save_path(&self) -> PathBuf {
        self.models_dir().join(&self.timestamp)
    }

    pub fn final_checkpoint(&self) -> PathBuf {
        self.models_dir().join(format!("{}.zip", self.timestamp))
    }

    pub fn configuration_file(&self) -> PathBuf {
        self.run_logs_dir().join("configuration.yaml")
    }

    pub fn evaluations_file(&self) -> PathBuf {
        self.run_logs_dir().join("evaluations.json")
    }

    pub fn tracking_dir(&self) -> PathBuf {
        self.run_logs_dir().join("tracking")
    }
}

pub fn create_directory_if_not_exists(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}
