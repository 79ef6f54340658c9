// Settings module - run configuration and the fixed PPO hyperparameter set
use chrono::Local;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// CLI defaults. Entropy coefficient follows https://arxiv.org/pdf/2006.14171.pdf
pub struct Defaults;

impl Defaults {
    pub const TOTAL_TIMESTEPS: u64 = 1_500_000;
    pub const EVAL_FREQ: u64 = 10_000;
    pub const EVAL_EPISODES: u32 = 10;
    pub const SEED: u64 = 42;
    pub const ENTROPY_COEF: f64 = 0.01;
    /// `0` saves tracking snapshots only at training end.
    pub const MODEL_SAVE_FREQ: u64 = 0;
    pub const ENGINE_COMMAND: &'static str = "microrts-engine";
}

pub const N_TRAIN_ENVS: usize = 16;
pub const N_EVAL_ENVS: usize = 10;

pub const GAMMA: f64 = 0.99;
pub const GAE_LAMBDA: f64 = 0.95;
pub const CLIP_COEF: f64 = 0.1;
pub const MAX_GRAD_NORM: f64 = 0.5;
pub const LEARNING_RATE: f64 = 2.5e-4;

/// Supported square map sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
pub enum MapSize {
    #[value(name = "4")]
    #[serde(rename = "4")]
    Four,
    #[value(name = "10")]
    #[serde(rename = "10")]
    Ten,
}

impl MapSize {
    pub fn side(self) -> u32 {
        match self {
            MapSize::Four => 4,
            MapSize::Ten => 10,
        }
    }

    /// `"4x4"` / `"10x10"`, used in environment ids and output paths.
    pub fn dims(self) -> String {
        format!("{0}x{0}", self.side())
    }

    pub fn env_id(self) -> String {
        format!("MicrortsMining{}F9-v0", self.dims())
    }

    pub fn feature_extractor(self) -> FeatureExtractor {
        FeatureExtractor {
            name: "microrts_extractor".to_string(),
            map_size: self.side(),
        }
    }
}

impl fmt::Display for MapSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.side())
    }
}

/// Numeric backend flags. Passed explicitly to the engine so independent runs
/// never share process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Deterministic convolution kernels. Some scatter kernels stay non-deterministic.
    pub deterministic: bool,
    pub seed: u64,
}

/// How to launch the external engine process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: PathBuf::from(Defaults::ENGINE_COMMAND),
            args: Vec::new(),
        }
    }
}

/// Immutable configuration of a single training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub output_folder: PathBuf,
    pub map_size: MapSize,
    pub n_train_envs: usize,
    pub n_eval_envs: usize,
    pub seed: u64,
    pub total_timesteps: u64,
    pub eval_freq: u64,
    pub eval_episodes: u32,
    pub torch_deterministic: bool,
    pub entropy_coef: f64,
    pub mask: bool,
    pub use_wandb: bool,
    /// Callback calls between numbered tracking snapshots.
    #[serde(default)]
    pub model_save_freq: u64,
    pub load_path: Option<PathBuf>,
    pub timestamp: String,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl RunConfig {
    /// Configuration with every option at its default and a fresh timestamp.
    pub fn new(output_folder: impl Into<PathBuf>, map_size: MapSize) -> Self {
        Self {
            output_folder: output_folder.into(),
            map_size,
            n_train_envs: N_TRAIN_ENVS,
            n_eval_envs: N_EVAL_ENVS,
            seed: Defaults::SEED,
            total_timesteps: Defaults::TOTAL_TIMESTEPS,
            eval_freq: Defaults::EVAL_FREQ,
            eval_episodes: Defaults::EVAL_EPISODES,
            torch_deterministic: true,
            entropy_coef: Defaults::ENTROPY_COEF,
            mask: false,
            use_wandb: false,
            model_save_freq: Defaults::MODEL_SAVE_FREQ,
            load_path: None,
            timestamp: run_timestamp(),
            engine: EngineSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_timesteps == 0 {
            return Err(Error::InvalidArgument(
                "--total-timesteps must be positive".to_string(),
            ));
        }
        if self.eval_freq == 0 {
            return Err(Error::InvalidArgument("--eval-freq must be positive".to_string()));
        }
        if self.eval_episodes == 0 {
            return Err(Error::InvalidArgument(
                "--eval-episodes must be positive".to_string(),
            ));
        }
        if !self.entropy_coef.is_finite() || self.entropy_coef < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "--entropy-coef must be a non-negative number, got {}",
                self.entropy_coef
            )));
        }
        if self.n_train_envs == 0 || self.n_eval_envs == 0 {
            return Err(Error::InvalidArgument(
                "environment counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            deterministic: self.torch_deterministic,
            seed: self.seed,
        }
    }

    /// Evaluation cadence in callback calls. Each call advances all training envs.
    pub fn eval_callback_freq(&self) -> u64 {
        (self.eval_freq / self.n_train_envs as u64).max(1)
    }

    pub fn as_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Local time, ISO-8601 with seconds precision.
pub fn run_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Learning rate as a function of the fraction of training remaining.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Linear { initial_value: f64 },
}

impl Schedule {
    /// `progress_remaining` goes from 1.0 at the start of training to 0.0 at the end.
    pub fn value(&self, progress_remaining: f64) -> f64 {
        match *self {
            Schedule::Linear { initial_value } => progress_remaining.clamp(0.0, 1.0) * initial_value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
}

/// Map-size keyed feature extractor implemented by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureExtractor {
    pub name: String,
    pub map_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    pub policy: String,
    pub net_arch: Vec<usize>,
    pub activation_fn: Activation,
    pub ortho_init: bool,
    pub features_extractor: FeatureExtractor,
}

impl PolicySettings {
    pub fn for_map(map_size: MapSize) -> Self {
        Self {
            policy: "MlpPolicy".to_string(),
            net_arch: vec![128],
            activation_fn: Activation::Relu,
            ortho_init: true,
            features_extractor: map_size.feature_extractor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpoHyperparameters {
    pub n_steps: usize,
    pub batch_size: usize,
    pub n_epochs: usize,
    pub gamma: f64,
    pub gae_lambda: f64,
    pub clip_range: f64,
    pub clip_range_vf: Option<f64>,
    pub ent_coef: f64,
    pub max_grad_norm: f64,
    pub learning_rate: Schedule,
    pub verbose: u8,
}

impl PpoHyperparameters {
    pub fn with_entropy_coef(ent_coef: f64) -> Self {
        Self {
            n_steps: 128,
            batch_size: 256,
            n_epochs: 4,
            gamma: GAMMA,
            gae_lambda: GAE_LAMBDA,
            clip_range: CLIP_COEF,
            clip_range_vf: Some(CLIP_COEF),
            ent_coef,
            max_grad_norm: MAX_GRAD_NORM,
            learning_rate: Schedule::Linear {
                initial_value: LEARNING_RATE,
            },
            verbose: 1,
        }
    }
}

/// Everything needed to construct a fresh agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub hyperparameters: PpoHyperparameters,
    pub policy: PolicySettings,
    pub seed: u64,
    pub tensorboard_log: Option<PathBuf>,
}
