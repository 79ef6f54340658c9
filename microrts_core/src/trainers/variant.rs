// Algorithm variant - masked and standard PPO come as a matched pair
use crate::engine::Algorithm;
use crate::env::EnvHandle;
use crate::trainers::callbacks::{EvalCallback, EvaluationMode};

/// Picks the agent algorithm and the evaluation callback together, so a
/// mask-aware agent can never be paired with a mask-naive evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmVariant {
    Standard,
    Masked,
}

impl AlgorithmVariant {
    pub fn select(mask: bool) -> Self {
        if mask {
            AlgorithmVariant::Masked
        } else {
            AlgorithmVariant::Standard
        }
    }

    pub fn algorithm(self) -> Algorithm {
        match self {
            AlgorithmVariant::Standard => Algorithm::Ppo,
            AlgorithmVariant::Masked => Algorithm::MaskablePpo,
        }
    }

    pub fn eval_callback(self, eval_env: EnvHandle, eval_freq: u64, n_eval_episodes: u32) -> EvalCallback {
        let mode = match self {
            AlgorithmVariant::Standard => EvaluationMode::Standard,
            AlgorithmVariant::Masked => EvaluationMode::Masked,
        };
        EvalCallback::new(eval_env, eval_freq, n_eval_episodes, mode)
    }

    /// Masked advantage computation must be requested explicitly from the run loop.
    pub fn learn_masking(self) -> Option<bool> {
        match self {
            AlgorithmVariant::Standard => None,
            AlgorithmVariant::Masked => Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{ActionSpace, EnvSpec, NormalizeSettings, Spaces};
    use crate::trainers::settings::MapSize;

    fn eval_env(mask: bool) -> EnvHandle {
        EnvHandle {
            id: 2,
            spec: EnvSpec::new(MapSize::Four, 10, mask, NormalizeSettings::frozen()),
            n_envs: 10,
            spaces: Spaces {
                observation_shape: vec![4, 4, 27],
                action_space: ActionSpace::MultiDiscrete { nvec: vec![16, 6, 4] },
            },
        }
    }

    #[test]
    fn test_variant_pairs_always_match() {
        for mask in [false, true] {
            let variant = AlgorithmVariant::select(mask);
            let callback = variant.eval_callback(eval_env(mask), 625, 10);
            assert_eq!(variant.algorithm().is_mask_aware(), mask);
            assert_eq!(callback.mode().is_mask_aware(), mask);
            assert_eq!(variant.learn_masking().is_some(), mask);
        }
    }

    #[test]
    fn test_eval_callback_keeps_cadence() {
        let callback = AlgorithmVariant::Masked.eval_callback(eval_env(true), 625, 7);
        assert_eq!(callback.eval_freq(), 625);
        assert_eq!(callback.n_eval_episodes(), 7);
        assert_eq!(callback.best_mean_reward(), f64::NEG_INFINITY);
    }
}
