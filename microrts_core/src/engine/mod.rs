//! The external training engine.
//!
//! Environments, agents and the PPO run loop all live behind [`Engine`]. The
//! pipeline only ever talks to this trait; [`ProcessEngine`] is the production
//! implementation that drives an engine executable over stdio.

pub mod process;
pub mod protocol;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::env::{EnvHandle, EnvSpec, Spaces};
use crate::trainers::callbacks::CallbackList;
use crate::trainers::settings::{AgentSettings, BackendSettings};

pub use process::ProcessEngine;
pub use protocol::RemoteErrorKind;

/// Scalar metrics keyed by logger name (`rollout/ep_rew_mean`, ...).
pub type Metrics = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Ppo,
    MaskablePpo,
}

impl Algorithm {
    pub fn is_mask_aware(self) -> bool {
        matches!(self, Algorithm::MaskablePpo)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Ppo => write!(f, "PPO"),
            Algorithm::MaskablePpo => write!(f, "MaskablePPO"),
        }
    }
}

/// Engine-side agent, bound to the environment it was built or restored with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    pub id: u32,
    pub algorithm: Algorithm,
    pub env: EnvHandle,
    pub spaces: Spaces,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnRequest {
    pub total_timesteps: u64,
    /// Only sent to algorithms that need an explicit opt-in.
    pub use_masking: Option<bool>,
    pub reset_num_timesteps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnOutcome {
    pub num_timesteps: u64,
    /// A callback asked the loop to stop before the budget was spent.
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluateRequest {
    pub n_eval_episodes: u32,
    pub deterministic: bool,
    pub use_masking: bool,
}

/// Per-episode results of one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub episode_rewards: Vec<f64>,
    pub episode_lengths: Vec<u64>,
}

impl Evaluation {
    pub fn mean_reward(&self) -> f64 {
        mean(&self.episode_rewards)
    }

    pub fn std_reward(&self) -> f64 {
        if self.episode_rewards.is_empty() {
            return 0.0;
        }
        let mean = self.mean_reward();
        let var = self
            .episode_rewards
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / self.episode_rewards.len() as f64;
        var.sqrt()
    }

    pub fn mean_length(&self) -> f64 {
        let lengths: Vec<f64> = self.episode_lengths.iter().map(|l| *l as f64).collect();
        mean(&lengths)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to start engine {command:?}: {source}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed engine message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("engine closed the connection")]
    Disconnected,

    #[error("unexpected engine response to {request}: {response}")]
    Unexpected {
        request: &'static str,
        response: String,
    },

    #[error("{kind} error reported by engine: {message}")]
    Remote {
        kind: RemoteErrorKind,
        message: String,
    },

    #[error("callback failed: {0}")]
    Callback(Box<crate::error::Error>),
}

/// The training framework and simulation backend, seen from the launcher.
///
/// Every method blocks until the engine answers. `learn` drives `callbacks`
/// between steps and lends the engine itself to them so they can evaluate or
/// snapshot the agent.
pub trait Engine {
    /// Applies numeric backend flags before anything is allocated.
    fn configure(&mut self, settings: &BackendSettings) -> Result<(), EngineError>;

    fn make_vec_env(&mut self, spec: &EnvSpec) -> Result<EnvHandle, EngineError>;

    fn close_env(&mut self, env: &EnvHandle) -> Result<(), EngineError>;

    fn create_agent(
        &mut self,
        algorithm: Algorithm,
        env: &EnvHandle,
        settings: &AgentSettings,
    ) -> Result<AgentHandle, EngineError>;

    fn load_agent(
        &mut self,
        algorithm: Algorithm,
        path: &Path,
        env: &EnvHandle,
    ) -> Result<AgentHandle, EngineError>;

    fn learn(
        &mut self,
        agent: &AgentHandle,
        request: &LearnRequest,
        callbacks: &mut CallbackList,
    ) -> Result<LearnOutcome, EngineError>;

    fn evaluate(
        &mut self,
        agent: &AgentHandle,
        env: &EnvHandle,
        request: &EvaluateRequest,
    ) -> Result<Evaluation, EngineError>;

    /// Copies observation statistics so a frozen normalizer tracks training.
    fn sync_normalization(&mut self, from: &EnvHandle, to: &EnvHandle) -> Result<(), EngineError>;

    fn save_agent(&mut self, agent: &AgentHandle, path: &Path) -> Result<(), EngineError>;

    fn shutdown(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}
