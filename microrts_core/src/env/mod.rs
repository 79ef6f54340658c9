//! Environment specs and handles.
//!
//! The simulation itself runs inside the engine. This module describes what to
//! build (`EnvSpec`) and what came back (`EnvHandle`).

use serde::{Deserialize, Serialize};

use crate::trainers::settings::MapSize;

/// Attribute read from each instance when building the action mask.
pub const ACTION_MASK_ATTRIBUTE: &str = "action_mask";

/// Registered environment id, e.g. `MicrortsMining10x10F9-v0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn for_map(map_size: MapSize) -> Self {
        TaskId(map_size.env_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-instance adapter exposing a boolean mask over the discrete actions.
/// All other environment operations pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMaskerSpec {
    pub mask_attribute: String,
}

impl Default for ActionMaskerSpec {
    fn default() -> Self {
        Self {
            mask_attribute: ACTION_MASK_ATTRIBUTE.to_string(),
        }
    }
}

/// Running-statistics normalizer wrapped around the whole vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeSettings {
    /// `false` freezes the statistics: they are applied but never updated.
    pub training: bool,
    pub norm_obs: bool,
    pub norm_reward: bool,
}

impl NormalizeSettings {
    pub fn training() -> Self {
        Self {
            training: true,
            norm_obs: true,
            norm_reward: false,
        }
    }

    pub fn frozen() -> Self {
        Self {
            training: false,
            ..Self::training()
        }
    }
}

/// Everything the engine needs to build one vectorized environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSpec {
    pub env_id: TaskId,
    pub n_envs: usize,
    pub action_masker: Option<ActionMaskerSpec>,
    /// Episode statistics wrapper on every instance.
    pub monitor: bool,
    pub normalize: NormalizeSettings,
}

impl EnvSpec {
    pub fn new(map_size: MapSize, n_envs: usize, mask: bool, normalize: NormalizeSettings) -> Self {
        Self {
            env_id: TaskId::for_map(map_size),
            n_envs,
            action_masker: mask.then(ActionMaskerSpec::default),
            monitor: true,
            normalize,
        }
    }

    pub fn is_masked(&self) -> bool {
        self.action_masker.is_some()
    }

    /// Same task and wrappers, ignoring instance count and normalizer mode.
    pub fn is_comparable_to(&self, other: &EnvSpec) -> bool {
        self.env_id == other.env_id
            && self.action_masker == other.action_masker
            && self.monitor == other.monitor
            && self.normalize.norm_obs == other.normalize.norm_obs
            && self.normalize.norm_reward == other.normalize.norm_reward
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpace {
    Discrete { n: u32 },
    MultiDiscrete { nvec: Vec<u32> },
}

impl ActionSpace {
    /// Length of the boolean mask: one entry per discrete action.
    pub fn mask_len(&self) -> usize {
        match self {
            ActionSpace::Discrete { n } => *n as usize,
            ActionSpace::MultiDiscrete { nvec } => nvec.iter().map(|n| *n as usize).sum(),
        }
    }
}

/// Observation and action spaces shared by an environment and its agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spaces {
    pub observation_shape: Vec<usize>,
    pub action_space: ActionSpace,
}

impl Spaces {
    /// Describes the first difference between two space pairs, if any.
    pub fn mismatch(&self, other: &Spaces) -> Option<String> {
        if self.observation_shape != other.observation_shape {
            return Some(format!(
                "observation shape {:?} does not match {:?}",
                self.observation_shape, other.observation_shape
            ));
        }
        if self.action_space != other.action_space {
            return Some(format!(
                "action space {:?} does not match {:?}",
                self.action_space, other.action_space
            ));
        }
        None
    }
}

/// Engine-side vectorized environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvHandle {
    pub id: u32,
    pub spec: EnvSpec,
    /// Instances the engine actually started, which may fall short of `spec.n_envs`.
    pub n_envs: usize,
    pub spaces: Spaces,
}

impl EnvHandle {
    pub fn num_envs(&self) -> usize {
        self.n_envs
    }

    pub fn action_mask_len(&self) -> Option<usize> {
        self.spec
            .action_masker
            .as_ref()
            .map(|_| self.spaces.action_space.mask_len())
    }
}
