// Environment factory - training/evaluation specs and the scoped session that owns them
use tracing::{info, warn};

use crate::engine::{Engine, EngineError};
use crate::env::{EnvHandle, EnvSpec, NormalizeSettings};
use crate::error::{Error, Result};
use crate::trainers::settings::{MapSize, RunConfig};

/// Builds the training and evaluation specs from one map size and masking flag,
/// so the two always describe the same task.
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentFactory {
    map_size: MapSize,
    mask: bool,
    n_train_envs: usize,
    n_eval_envs: usize,
}

impl EnvironmentFactory {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            map_size: config.map_size,
            mask: config.mask,
            n_train_envs: config.n_train_envs,
            n_eval_envs: config.n_eval_envs,
        }
    }

    pub fn training_spec(&self) -> EnvSpec {
        EnvSpec::new(self.map_size, self.n_train_envs, self.mask, NormalizeSettings::training())
    }

    pub fn evaluation_spec(&self) -> EnvSpec {
        EnvSpec::new(self.map_size, self.n_eval_envs, self.mask, NormalizeSettings::frozen())
    }
}

/// Owns every environment opened during a run and closes each exactly once,
/// on success, on error and when training is interrupted.
pub struct EnvironmentSession<'e, E: Engine + ?Sized> {
    engine: &'e mut E,
    open: Vec<EnvHandle>,
}

impl<'e, E: Engine + ?Sized> EnvironmentSession<'e, E> {
    pub fn new(engine: &'e mut E) -> Self {
        Self {
            engine,
            open: Vec::new(),
        }
    }

    pub fn engine(&mut self) -> &mut E {
        &mut *self.engine
    }

    pub fn make_vec_env(&mut self, spec: &EnvSpec) -> Result<EnvHandle> {
        let handle = self
            .engine
            .make_vec_env(spec)
            .map_err(|e| construction_error(spec, e))?;
        if handle.num_envs() != spec.n_envs {
            // Still ours to close even though it is unusable.
            self.open.push(handle.clone());
            return Err(Error::EnvironmentConstruction {
                env_id: spec.env_id.as_str().to_string(),
                n_envs: spec.n_envs,
                reason: format!("engine started {} instance(s)", handle.num_envs()),
            });
        }
        info!(
            env_id = spec.env_id.as_str(),
            n_envs = handle.num_envs(),
            mask_len = ?handle.action_mask_len(),
            training = spec.normalize.training,
            "Environment ready"
        );
        self.open.push(handle.clone());
        Ok(handle)
    }

    /// Closes everything, reporting the first failure after attempting all.
    pub fn close(mut self) -> Result<()> {
        match self.close_all().into_iter().next() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn close_all(&mut self) -> Vec<EngineError> {
        let mut errors = Vec::new();
        for env in self.open.drain(..).rev() {
            match self.engine.close_env(&env) {
                Ok(()) => info!(env = env.id, "Environment closed"),
                Err(e) => {
                    warn!(env = env.id, "Failed to close environment: {}", e);
                    errors.push(e);
                }
            }
        }
        errors
    }
}

impl<E: Engine + ?Sized> Drop for EnvironmentSession<'_, E> {
    fn drop(&mut self) {
        if !self.open.is_empty() {
            self.close_all();
        }
    }
}

fn construction_error(spec: &EnvSpec, err: EngineError) -> Error {
    Error::EnvironmentConstruction {
        env_id: spec.env_id.as_str().to_string(),
        n_envs: spec.n_envs,
        reason: err.to_string(),
    }
}
