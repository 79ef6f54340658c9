// Engine wire protocol: one JSON object per line in each direction
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::{Algorithm, Evaluation, Metrics};
use crate::env::{EnvSpec, Spaces};
use crate::trainers::settings::{AgentSettings, BackendSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Configure {
        backend: BackendSettings,
    },
    MakeVecEnv {
        spec: EnvSpec,
    },
    CloseEnv {
        env: u32,
    },
    CreateAgent {
        algorithm: Algorithm,
        env: u32,
        settings: AgentSettings,
    },
    LoadAgent {
        algorithm: Algorithm,
        path: PathBuf,
        env: u32,
    },
    Learn {
        agent: u32,
        total_timesteps: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        use_masking: Option<bool>,
        reset_num_timesteps: bool,
    },
    /// Reply to every `event` emitted during `learn`.
    Resume {
        proceed: bool,
    },
    Evaluate {
        agent: u32,
        env: u32,
        n_eval_episodes: u32,
        deterministic: bool,
        use_masking: bool,
    },
    SyncNormalization {
        from: u32,
        to: u32,
    },
    SaveAgent {
        agent: u32,
        path: PathBuf,
    },
    Shutdown,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Configure { .. } => "configure",
            Request::MakeVecEnv { .. } => "make_vec_env",
            Request::CloseEnv { .. } => "close_env",
            Request::CreateAgent { .. } => "create_agent",
            Request::LoadAgent { .. } => "load_agent",
            Request::Learn { .. } => "learn",
            Request::Resume { .. } => "resume",
            Request::Evaluate { .. } => "evaluate",
            Request::SyncNormalization { .. } => "sync_normalization",
            Request::SaveAgent { .. } => "save_agent",
            Request::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    EnvCreated {
        env: u32,
        n_envs: usize,
        spaces: Spaces,
    },
    AgentReady {
        agent: u32,
        spaces: Spaces,
    },
    Evaluation {
        episode_rewards: Vec<f64>,
        episode_lengths: Vec<u64>,
    },
    Event {
        event: CallbackEvent,
    },
    LearnFinished {
        num_timesteps: u64,
        #[serde(default)]
        stopped_early: bool,
    },
    Error {
        kind: RemoteErrorKind,
        message: String,
    },
}

impl Response {
    pub fn into_evaluation(self) -> Option<Evaluation> {
        match self {
            Response::Evaluation {
                episode_rewards,
                episode_lengths,
            } => Some(Evaluation {
                episode_rewards,
                episode_lengths,
            }),
            _ => None,
        }
    }
}

/// Points in the run loop where callbacks are invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackEvent {
    TrainingStart {
        num_timesteps: u64,
        total_timesteps: u64,
    },
    Step {
        num_timesteps: u64,
    },
    RolloutEnd {
        num_timesteps: u64,
        #[serde(default)]
        metrics: Metrics,
    },
    TrainingEnd {
        num_timesteps: u64,
    },
}

impl CallbackEvent {
    pub fn num_timesteps(&self) -> u64 {
        match self {
            CallbackEvent::TrainingStart { num_timesteps, .. }
            | CallbackEvent::Step { num_timesteps }
            | CallbackEvent::RolloutEnd { num_timesteps, .. }
            | CallbackEvent::TrainingEnd { num_timesteps } => *num_timesteps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    Environment,
    Checkpoint,
    Training,
    Protocol,
    #[serde(other)]
    Other,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteErrorKind::Environment => "environment",
            RemoteErrorKind::Checkpoint => "checkpoint",
            RemoteErrorKind::Training => "training",
            RemoteErrorKind::Protocol => "protocol",
            RemoteErrorKind::Other => "unclassified",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{ActionSpace, NormalizeSettings};
    use crate::trainers::settings::MapSize;
    use serde_json::json;

    #[test]
    fn test_learn_request_omits_masking_for_standard_ppo() {
        let request = Request::Learn {
            agent: 1,
            total_timesteps: 100,
            use_masking: None,
            reset_num_timesteps: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"op": "learn", "agent": 1, "total_timesteps": 100, "reset_num_timesteps": true})
        );
    }

    #[test]
    fn test_make_vec_env_wire_shape() {
        let spec = crate::env::EnvSpec::new(MapSize::Ten, 10, true, NormalizeSettings::frozen());
        let value = serde_json::to_value(Request::MakeVecEnv { spec }).unwrap();
        assert_eq!(value["op"], "make_vec_env");
        assert_eq!(value["spec"]["env_id"], "MicrortsMining10x10F9-v0");
        assert_eq!(value["spec"]["action_masker"]["mask_attribute"], "action_mask");
        assert_eq!(value["spec"]["normalize"]["training"], false);
        assert_eq!(value["spec"]["normalize"]["norm_reward"], false);
    }

    #[test]
    fn test_parse_env_created() {
        let line = r#"{"type":"env_created","env":3,"n_envs":16,"spaces":{"observation_shape":[4,4,27],"action_space":{"type":"multi_discrete","nvec":[16,6,4]}}}"#;
        let response: Response = serde_json::from_str(line).unwrap();
        match response {
            Response::EnvCreated { env, n_envs, spaces } => {
                assert_eq!(env, 3);
                assert_eq!(n_envs, 16);
                assert_eq!(spaces.observation_shape, vec![4, 4, 27]);
                assert_eq!(spaces.action_space, ActionSpace::MultiDiscrete { nvec: vec![16, 6, 4] });
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_parse_event_and_unknown_error_kind() {
        let line = r#"{"type":"event","event":{"kind":"rollout_end","num_timesteps":2048,"metrics":{"rollout/ep_rew_mean":1.5}}}"#;
        let response: Response = serde_json::from_str(line).unwrap();
        let Response::Event { event } = response else {
            panic!("expected an event");
        };
        assert_eq!(event.num_timesteps(), 2048);

        let line = r#"{"type":"error","kind":"cuda","message":"out of memory"}"#;
        let response: Response = serde_json::from_str(line).unwrap();
        assert_eq!(
            response,
            Response::Error { kind: RemoteErrorKind::Other, message: "out of memory".to_string() }
        );
    }

    #[test]
    fn test_shutdown_is_bare_tag() {
        assert_eq!(serde_json::to_string(&Request::Shutdown).unwrap(), r#"{"op":"shutdown"}"#);
    }
}
