// Callbacks invoked by the engine's run loop
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::protocol::CallbackEvent;
use crate::engine::{AgentHandle, Engine, EvaluateRequest, Metrics};
use crate::env::EnvHandle;
use crate::error::Result;

/// What a callback sees while the run loop is paused.
pub struct CallbackContext<'a> {
    pub engine: &'a mut dyn Engine,
    pub agent: &'a AgentHandle,
    pub num_timesteps: u64,
}

impl<'a> CallbackContext<'a> {
    pub fn new(engine: &'a mut dyn Engine, agent: &'a AgentHandle, num_timesteps: u64) -> Self {
        Self {
            engine,
            agent,
            num_timesteps,
        }
    }

    pub fn training_env(&self) -> &EnvHandle {
        &self.agent.env
    }
}

pub trait Callback {
    fn name(&self) -> &str;

    fn on_training_start(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after every vectorized step. Returning `false` stops training.
    fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool>;

    fn on_rollout_end(&mut self, _ctx: &mut CallbackContext<'_>, _metrics: &Metrics) -> Result<()> {
        Ok(())
    }

    fn on_training_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Ordered callbacks. Every callback sees every event, even after one asked to stop.
#[derive(Default)]
pub struct CallbackList {
    callbacks: Vec<Box<dyn Callback>>,
}

impl CallbackList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, callback: Box<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|c| c.name()).collect()
    }

    /// Routes one run-loop event; the result is whether training should continue.
    pub fn dispatch(&mut self, ctx: &mut CallbackContext<'_>, event: &CallbackEvent) -> Result<bool> {
        match event {
            CallbackEvent::TrainingStart { .. } => {
                for callback in &mut self.callbacks {
                    callback.on_training_start(ctx)?;
                }
                Ok(true)
            }
            CallbackEvent::Step { .. } => {
                let mut proceed = true;
                for callback in &mut self.callbacks {
                    proceed = callback.on_step(ctx)? && proceed;
                }
                Ok(proceed)
            }
            CallbackEvent::RolloutEnd { metrics, .. } => {
                for callback in &mut self.callbacks {
                    callback.on_rollout_end(ctx, metrics)?;
                }
                Ok(true)
            }
            CallbackEvent::TrainingEnd { .. } => {
                for callback in &mut self.callbacks {
                    callback.on_training_end(ctx)?;
                }
                Ok(true)
            }
        }
    }
}

/// Shared flag raised on Ctrl-C.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stops the run loop at the next step once the flag is raised.
pub struct InterruptCallback {
    flag: InterruptFlag,
    reported: bool,
}

impl InterruptCallback {
    pub fn new(flag: InterruptFlag) -> Self {
        Self {
            flag,
            reported: false,
        }
    }
}

impl Callback for InterruptCallback {
    fn name(&self) -> &str {
        "interrupt"
    }

    fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool> {
        if !self.flag.is_raised() {
            return Ok(true);
        }
        if !self.reported {
            warn!(num_timesteps = ctx.num_timesteps, "Interrupted, stopping training");
            self.reported = true;
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    Standard,
    Masked,
}

impl EvaluationMode {
    pub fn is_mask_aware(self) -> bool {
        matches!(self, EvaluationMode::Masked)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationHistory {
    pub timesteps: Vec<u64>,
    pub results: Vec<Vec<f64>>,
    pub ep_lengths: Vec<Vec<u64>>,
}

/// Periodic evaluation on the frozen evaluation environment.
///
/// Built only through [`AlgorithmVariant::eval_callback`](super::variant::AlgorithmVariant::eval_callback)
/// so its evaluation mode always matches the agent's algorithm.
pub struct EvalCallback {
    eval_env: EnvHandle,
    eval_freq: u64,
    n_eval_episodes: u32,
    deterministic: bool,
    mode: EvaluationMode,
    n_calls: u64,
    best_mean_reward: f64,
    history: EvaluationHistory,
    log_path: Option<PathBuf>,
}

impl EvalCallback {
    pub(crate) fn new(eval_env: EnvHandle, eval_freq: u64, n_eval_episodes: u32, mode: EvaluationMode) -> Self {
        Self {
            eval_env,
            eval_freq,
            n_eval_episodes,
            deterministic: true,
            mode,
            n_calls: 0,
            best_mean_reward: f64::NEG_INFINITY,
            history: EvaluationHistory::default(),
            log_path: None,
        }
    }

    /// Writes the evaluation history as JSON at training end.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn eval_freq(&self) -> u64 {
        self.eval_freq
    }

    pub fn n_eval_episodes(&self) -> u32 {
        self.n_eval_episodes
    }

    pub fn best_mean_reward(&self) -> f64 {
        self.best_mean_reward
    }

    fn evaluate(&mut self, ctx: &mut CallbackContext<'_>) -> Result<()> {
        ctx.engine.sync_normalization(&ctx.agent.env, &self.eval_env)?;

        let request = EvaluateRequest {
            n_eval_episodes: self.n_eval_episodes,
            deterministic: self.deterministic,
            use_masking: self.mode.is_mask_aware(),
        };
        let evaluation = ctx.engine.evaluate(ctx.agent, &self.eval_env, &request)?;
        if evaluation.episode_rewards.len() != self.n_eval_episodes as usize {
            warn!(
                expected = self.n_eval_episodes,
                got = evaluation.episode_rewards.len(),
                "Evaluation returned an unexpected number of episodes"
            );
        }

        let mean_reward = evaluation.mean_reward();
        info!(
            "Eval num_timesteps={}, episode_reward={:.2} +/- {:.2}",
            ctx.num_timesteps,
            mean_reward,
            evaluation.std_reward()
        );
        info!("Episode length: {:.2}", evaluation.mean_length());

        self.history.timesteps.push(ctx.num_timesteps);
        self.history.results.push(evaluation.episode_rewards);
        self.history.ep_lengths.push(evaluation.episode_lengths);

        if mean_reward > self.best_mean_reward {
            info!("New best mean reward!");
            self.best_mean_reward = mean_reward;
        }
        Ok(())
    }
}

impl Callback for EvalCallback {
    fn name(&self) -> &str {
        match self.mode {
            EvaluationMode::Standard => "eval",
            EvaluationMode::Masked => "maskable_eval",
        }
    }

    fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool> {
        self.n_calls += 1;
        if self.eval_freq > 0 && self.n_calls % self.eval_freq == 0 {
            self.evaluate(ctx)?;
        }
        Ok(true)
    }

    fn on_training_end(&mut self, _ctx: &mut CallbackContext<'_>) -> Result<()> {
        if let Some(path) = &self.log_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&self.history)?)?;
        }
        Ok(())
    }
}
