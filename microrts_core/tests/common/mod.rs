// In-process engine double that records every call and replays a scripted run loop
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use microrts_core::engine::protocol::CallbackEvent;
use microrts_core::engine::{
    AgentHandle, Algorithm, Engine, EngineError, EvaluateRequest, Evaluation, LearnOutcome,
    LearnRequest, Metrics, RemoteErrorKind,
};
use microrts_core::env::{ActionSpace, EnvHandle, EnvSpec, Spaces};
use microrts_core::trainers::callbacks::{CallbackContext, CallbackList, InterruptFlag};
use microrts_core::trainers::settings::{AgentSettings, BackendSettings, MapSize};

pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn spaces_for(map_size: MapSize) -> Spaces {
    let side = map_size.side() as usize;
    Spaces {
        observation_shape: vec![side, side, 27],
        action_space: ActionSpace::MultiDiscrete {
            nvec: vec![(side * side) as u32, 6, 4, 4, 4, 4, 7, 49],
        },
    }
}

pub struct StubEngine {
    pub log: CallLog,
    pub spaces: Spaces,
    pub backend: Option<BackendSettings>,
    pub env_specs: Vec<EnvSpec>,
    pub closes: BTreeMap<u32, usize>,
    pub agent_settings: Option<AgentSettings>,
    pub algorithm: Option<Algorithm>,
    pub learn_requests: Vec<LearnRequest>,
    pub evaluations: Vec<EvaluateRequest>,
    pub syncs: Vec<(u32, u32)>,
    pub saved: Vec<PathBuf>,
    /// Spaces reported by any loaded checkpoint. Defaults to the env's own.
    pub checkpoint_spaces: Option<Spaces>,
    pub fail_learn: bool,
    /// Refuse to build the evaluation (frozen normalizer) environment.
    pub fail_eval_env: bool,
    /// Start only this many instances of every environment.
    pub started_envs: Option<usize>,
    /// Raise the flag once this many timesteps have been collected.
    pub interrupt_at: Option<(u64, InterruptFlag)>,
    pub shut_down: bool,
    next_id: u32,
}

impl StubEngine {
    pub fn new(map_size: MapSize) -> Self {
        Self::with_log(map_size, CallLog::default())
    }

    pub fn with_log(map_size: MapSize, log: CallLog) -> Self {
        Self {
            log,
            spaces: spaces_for(map_size),
            backend: None,
            env_specs: Vec::new(),
            closes: BTreeMap::new(),
            agent_settings: None,
            algorithm: None,
            learn_requests: Vec::new(),
            evaluations: Vec::new(),
            syncs: Vec::new(),
            saved: Vec::new(),
            checkpoint_spaces: None,
            fail_learn: false,
            fail_eval_env: false,
            started_envs: None,
            interrupt_at: None,
            shut_down: false,
            next_id: 0,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn called(&self, op: &str) -> bool {
        self.log.borrow().iter().any(|c| c == op)
    }

    fn record(&self, op: &str) {
        self.log.borrow_mut().push(op.to_string());
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn dispatch(
        &mut self,
        agent: &AgentHandle,
        callbacks: &mut CallbackList,
        event: CallbackEvent,
    ) -> Result<bool, EngineError> {
        let num_timesteps = event.num_timesteps();
        callbacks
            .dispatch(&mut CallbackContext::new(self, agent, num_timesteps), &event)
            .map_err(|e| EngineError::Callback(Box::new(e)))
    }
}

impl Engine for StubEngine {
    fn configure(&mut self, settings: &BackendSettings) -> Result<(), EngineError> {
        self.record("configure");
        self.backend = Some(*settings);
        Ok(())
    }

    fn make_vec_env(&mut self, spec: &EnvSpec) -> Result<EnvHandle, EngineError> {
        self.record("make_vec_env");
        self.env_specs.push(spec.clone());
        if self.fail_eval_env && !spec.normalize.training {
            return Err(EngineError::Remote {
                kind: RemoteErrorKind::Environment,
                message: "microrts JVM failed to start".to_string(),
            });
        }
        Ok(EnvHandle {
            id: self.next_id(),
            spec: spec.clone(),
            n_envs: self.started_envs.unwrap_or(spec.n_envs),
            spaces: self.spaces.clone(),
        })
    }

    fn close_env(&mut self, env: &EnvHandle) -> Result<(), EngineError> {
        self.record("close_env");
        *self.closes.entry(env.id).or_insert(0) += 1;
        Ok(())
    }

    fn create_agent(
        &mut self,
        algorithm: Algorithm,
        env: &EnvHandle,
        settings: &AgentSettings,
    ) -> Result<AgentHandle, EngineError> {
        self.record("create_agent");
        self.algorithm = Some(algorithm);
        self.agent_settings = Some(settings.clone());
        Ok(AgentHandle {
            id: self.next_id(),
            algorithm,
            env: env.clone(),
            spaces: env.spaces.clone(),
        })
    }

    fn load_agent(
        &mut self,
        algorithm: Algorithm,
        path: &Path,
        env: &EnvHandle,
    ) -> Result<AgentHandle, EngineError> {
        self.record("load_agent");
        if !path.is_file() {
            return Err(EngineError::Remote {
                kind: RemoteErrorKind::Checkpoint,
                message: format!("{} not found", path.display()),
            });
        }
        self.algorithm = Some(algorithm);
        Ok(AgentHandle {
            id: self.next_id(),
            algorithm,
            env: env.clone(),
            spaces: self.checkpoint_spaces.clone().unwrap_or_else(|| env.spaces.clone()),
        })
    }

    fn learn(
        &mut self,
        agent: &AgentHandle,
        request: &LearnRequest,
        callbacks: &mut CallbackList,
    ) -> Result<LearnOutcome, EngineError> {
        self.record("learn");
        self.learn_requests.push(request.clone());

        let total_timesteps = request.total_timesteps;
        self.dispatch(agent, callbacks, CallbackEvent::TrainingStart {
            num_timesteps: 0,
            total_timesteps,
        })?;
        if self.fail_learn {
            return Err(EngineError::Remote {
                kind: RemoteErrorKind::Training,
                message: "loss is NaN".to_string(),
            });
        }

        let n_envs = agent.env.num_envs() as u64;
        let rollout = 128 * n_envs;
        let mut num_timesteps = 0;
        let mut stopped_early = false;
        while num_timesteps < total_timesteps {
            num_timesteps += n_envs;
            if let Some((at, flag)) = &self.interrupt_at {
                if num_timesteps >= *at {
                    flag.raise();
                }
            }
            let proceed = self.dispatch(agent, callbacks, CallbackEvent::Step { num_timesteps })?;
            if num_timesteps % rollout == 0 {
                let mut metrics = Metrics::new();
                metrics.insert("rollout/ep_rew_mean".to_string(), num_timesteps as f64 / 1000.0);
                self.dispatch(agent, callbacks, CallbackEvent::RolloutEnd {
                    num_timesteps,
                    metrics,
                })?;
            }
            if !proceed {
                stopped_early = true;
                break;
            }
        }

        self.dispatch(agent, callbacks, CallbackEvent::TrainingEnd { num_timesteps })?;
        Ok(LearnOutcome {
            num_timesteps,
            stopped_early,
        })
    }

    fn evaluate(
        &mut self,
        _agent: &AgentHandle,
        _env: &EnvHandle,
        request: &EvaluateRequest,
    ) -> Result<Evaluation, EngineError> {
        self.record("evaluate");
        self.evaluations.push(*request);
        let score = self.evaluations.len() as f64;
        Ok(Evaluation {
            episode_rewards: vec![score; request.n_eval_episodes as usize],
            episode_lengths: vec![100; request.n_eval_episodes as usize],
        })
    }

    fn sync_normalization(&mut self, from: &EnvHandle, to: &EnvHandle) -> Result<(), EngineError> {
        self.record("sync_normalization");
        self.syncs.push((from.id, to.id));
        Ok(())
    }

    fn save_agent(&mut self, _agent: &AgentHandle, path: &Path) -> Result<(), EngineError> {
        self.record("save_agent");
        fs::write(path, b"agent")?;
        self.saved.push(path.to_path_buf());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.record("shutdown");
        self.shut_down = true;
        Ok(())
    }
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("microrts-it-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn zip_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "zip"))
        .collect();
    files.sort();
    files
}
