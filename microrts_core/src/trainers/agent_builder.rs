// Agent builder - fresh PPO agents or checkpoints restored onto the training env
use std::path::{Path, PathBuf};

use tracing::info;

use crate::engine::{AgentHandle, Engine};
use crate::env::EnvHandle;
use crate::error::{Error, Result};
use crate::trainers::settings::{AgentSettings, PolicySettings, PpoHyperparameters, RunConfig};
use crate::trainers::variant::AlgorithmVariant;
use crate::utils::RunLayout;

pub struct AgentBuilder<'a> {
    config: &'a RunConfig,
    layout: &'a RunLayout,
}

impl<'a> AgentBuilder<'a> {
    pub fn new(config: &'a RunConfig, layout: &'a RunLayout) -> Self {
        Self { config, layout }
    }

    /// Fixed hyperparameters, the configured entropy coefficient and the run seed.
    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            hyperparameters: PpoHyperparameters::with_entropy_coef(self.config.entropy_coef),
            policy: PolicySettings::for_map(self.config.map_size),
            seed: self.config.seed,
            tensorboard_log: Some(self.layout.run_logs_dir()),
        }
    }

    pub fn build<E: Engine + ?Sized>(
        &self,
        engine: &mut E,
        variant: AlgorithmVariant,
        env: &EnvHandle,
    ) -> Result<AgentHandle> {
        match &self.config.load_path {
            Some(path) => self.restore(engine, variant, path, env),
            None => {
                let agent = engine.create_agent(variant.algorithm(), env, &self.agent_settings())?;
                info!(
                    algorithm = %agent.algorithm,
                    seed = self.config.seed,
                    ent_coef = self.config.entropy_coef,
                    "Created agent"
                );
                Ok(agent)
            }
        }
    }

    fn restore<E: Engine + ?Sized>(
        &self,
        engine: &mut E,
        variant: AlgorithmVariant,
        path: &Path,
        env: &EnvHandle,
    ) -> Result<AgentHandle> {
        let checkpoint = resolve_checkpoint(path)?;
        let agent = engine
            .load_agent(variant.algorithm(), &checkpoint, env)
            .map_err(|e| Error::CheckpointLoad {
                path: checkpoint.clone(),
                reason: e.to_string(),
            })?;

        if let Some(reason) = agent.spaces.mismatch(&env.spaces) {
            return Err(Error::CheckpointLoad {
                path: checkpoint,
                reason,
            });
        }

        info!(algorithm = %agent.algorithm, "Loaded agent from {}", checkpoint.display());
        Ok(agent)
    }
}

/// The path as given, or with `.zip` appended.
pub fn resolve_checkpoint(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let mut zipped = path.as_os_str().to_owned();
    zipped.push(".zip");
    let zipped = PathBuf::from(zipped);
    if zipped.is_file() {
        return Ok(zipped);
    }
    Err(Error::CheckpointLoad {
        path: path.to_path_buf(),
        reason: "no such file".to_string(),
    })
}
