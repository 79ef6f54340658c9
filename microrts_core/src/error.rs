use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Errors surfaced by the training pipeline. Every variant aborts the run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("could not load checkpoint {path:?}: {reason}")]
    CheckpointLoad { path: PathBuf, reason: String },

    #[error("could not start {n_envs} instance(s) of {env_id}: {reason}")]
    EnvironmentConstruction {
        env_id: String,
        n_envs: usize,
        reason: String,
    },

    #[error("training failed: {0}")]
    TrainingFailure(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Converts a clap parse failure into `InvalidArgument`, keeping clap's message.
    pub fn from_clap(err: clap::Error) -> Self {
        Error::InvalidArgument(err.to_string().trim_end().to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
