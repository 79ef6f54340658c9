// TrainerController - runs the engine's learn loop, saves the final agent, tears down
use std::path::PathBuf;

use tracing::{info, warn};

use crate::engine::{AgentHandle, Engine, EngineError, LearnRequest};
use crate::error::{Error, Result};
use crate::trainers::callbacks::CallbackList;
use crate::trainers::environment_factory::EnvironmentSession;
use crate::trainers::variant::AlgorithmVariant;
use crate::utils::{create_directory_if_not_exists, RunLayout};

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub checkpoint: PathBuf,
    pub num_timesteps: u64,
    /// Training ended before the budget was spent (interrupt or callback).
    pub stopped_early: bool,
}

pub struct TrainerController<'a> {
    layout: &'a RunLayout,
    variant: AlgorithmVariant,
    total_timesteps: u64,
}

impl<'a> TrainerController<'a> {
    pub fn new(layout: &'a RunLayout, variant: AlgorithmVariant, total_timesteps: u64) -> Self {
        Self {
            layout,
            variant,
            total_timesteps,
        }
    }

    pub fn learn_request(&self) -> LearnRequest {
        LearnRequest {
            total_timesteps: self.total_timesteps,
            use_masking: self.variant.learn_masking(),
            reset_num_timesteps: true,
        }
    }

    /// Consumes the session: environments are closed whether or not training succeeds.
    pub fn start_learning<E: Engine + ?Sized>(
        &self,
        mut session: EnvironmentSession<'_, E>,
        agent: &AgentHandle,
        callbacks: &mut CallbackList,
    ) -> Result<RunSummary> {
        info!(
            algorithm = %agent.algorithm,
            total_timesteps = self.total_timesteps,
            callbacks = ?callbacks.names(),
            "Starting training"
        );

        let outcome = session
            .engine()
            .learn(agent, &self.learn_request(), callbacks)
            .map_err(training_error)?;

        if outcome.stopped_early {
            warn!(
                num_timesteps = outcome.num_timesteps,
                "Training stopped before the step budget was spent"
            );
        } else {
            info!(num_timesteps = outcome.num_timesteps, "Training finished");
        }

        let checkpoint = self.layout.final_checkpoint();
        create_directory_if_not_exists(&self.layout.models_dir())?;
        session.engine().save_agent(agent, &checkpoint)?;
        info!("Saved final agent to {}", checkpoint.display());

        session.close()?;

        Ok(RunSummary {
            checkpoint,
            num_timesteps: outcome.num_timesteps,
            stopped_early: outcome.stopped_early,
        })
    }
}

fn training_error(err: EngineError) -> Error {
    match err {
        EngineError::Callback(inner) => *inner,
        other => Error::TrainingFailure(other.to_string()),
    }
}
