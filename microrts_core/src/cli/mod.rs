// Command-Line Interface for microrts-train
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::trainers::settings::{Defaults, EngineSettings, MapSize, RunConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "microrts-train")]
#[command(version)]
#[command(about = "Train a PPO agent on the Microrts mining task", long_about = None)]
pub struct Cli {
    /// Directory that receives runs/ and models/ for this map size
    #[arg(value_name = "OUTPUT_FOLDER")]
    pub output_folder: PathBuf,

    /// Side of the square map
    #[arg(value_name = "MAP_SIZE", value_enum)]
    pub map_size: MapSize,

    /// Saved agent to continue training from (".zip" may be omitted)
    #[arg(short = 'l', long = "load", value_name = "PATH")]
    pub load: Option<PathBuf>,

    /// Seed for the agent's random number generators
    #[arg(long, default_value_t = Defaults::SEED)]
    pub seed: u64,

    /// Total environment steps to train for
    #[arg(long = "total-timesteps", default_value_t = Defaults::TOTAL_TIMESTEPS)]
    pub total_timesteps: u64,

    /// Environment steps between evaluations
    #[arg(long = "eval-freq", default_value_t = Defaults::EVAL_FREQ)]
    pub eval_freq: u64,

    /// Episodes per evaluation
    #[arg(long = "eval-episodes", default_value_t = Defaults::EVAL_EPISODES)]
    pub eval_episodes: u32,

    /// Request deterministic backend kernels (default)
    #[arg(long = "torch-deterministic", overrides_with = "no_torch_deterministic")]
    pub torch_deterministic: bool,

    /// Allow non-deterministic backend kernels
    #[arg(long = "no-torch-deterministic", overrides_with = "torch_deterministic")]
    pub no_torch_deterministic: bool,

    /// Entropy bonus coefficient
    #[arg(
        long = "entropy-coef",
        default_value_t = Defaults::ENTROPY_COEF,
        allow_negative_numbers = true
    )]
    pub entropy_coef: f64,

    /// Train with invalid-action masking
    #[arg(long, overrides_with = "no_mask")]
    pub mask: bool,

    /// Train without masking (default)
    #[arg(long = "no-mask", overrides_with = "mask")]
    pub no_mask: bool,

    /// Enable experiment tracking
    #[arg(long, overrides_with = "no_wandb")]
    pub wandb: bool,

    /// Disable experiment tracking (default)
    #[arg(long = "no-wandb", overrides_with = "wandb")]
    pub no_wandb: bool,

    /// Callback calls between numbered tracking snapshots (0 = final snapshot only)
    #[arg(long = "model-save-freq", default_value_t = Defaults::MODEL_SAVE_FREQ)]
    pub model_save_freq: u64,

    /// Engine executable that hosts the environments and the PPO implementation
    #[arg(long, value_name = "PATH", default_value = Defaults::ENGINE_COMMAND)]
    pub engine: PathBuf,

    /// Extra argument forwarded to the engine (repeatable)
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Enable debug-level logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Cli {
    /// Parses `args` (program name first) without exiting the process.
    pub fn resolve_from<I, T>(args: I) -> Result<RunConfig>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(args).map_err(Error::from_clap)?.resolve()
    }

    /// Builds the immutable run configuration. Nothing is written or spawned here.
    pub fn resolve(&self) -> Result<RunConfig> {
        let mut config = RunConfig::new(&self.output_folder, self.map_size);
        config.seed = self.seed;
        config.total_timesteps = self.total_timesteps;
        config.eval_freq = self.eval_freq;
        config.eval_episodes = self.eval_episodes;
        config.torch_deterministic = !self.no_torch_deterministic;
        config.entropy_coef = self.entropy_coef;
        config.mask = self.mask;
        config.use_wandb = self.wandb;
        config.model_save_freq = self.model_save_freq;
        config.load_path = self.load.clone();
        config.engine = EngineSettings {
            command: self.engine.clone(),
            args: self.engine_args.clone(),
        };
        config.validate()?;
        Ok(config)
    }
}

pub fn print_banner() {
    println!(
        r#"
╔══════════════════════════════════════════════╗
║                                              ║
║       Microrts PPO Trainer  v{:<16}║
║                                              ║
╚══════════════════════════════════════════════╝
"#,
        env!("CARGO_PKG_VERSION")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_small_map() {
        let config = Cli::resolve_from(["microrts-train", "results", "4"]).unwrap();
        assert_eq!(config.map_size, MapSize::Four);
        assert_eq!(config.total_timesteps, 1_500_000);
        assert_eq!(config.eval_freq, 10_000);
        assert_eq!(config.eval_episodes, 10);
        assert_eq!(config.seed, 42);
        assert_eq!(config.entropy_coef, 0.01);
        assert!(config.torch_deterministic);
        assert!(!config.mask);
        assert!(!config.use_wandb);
        assert_eq!(config.model_save_freq, 0);
        assert!(config.load_path.is_none());
        assert_eq!(config.engine.command, PathBuf::from("microrts-engine"));
    }

    #[test]
    fn test_unsupported_map_size() {
        let err = Cli::resolve_from(["microrts-train", "results", "7"]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_last_flag_of_a_pair_wins() {
        let config = Cli::resolve_from([
            "microrts-train",
            "results",
            "10",
            "--mask",
            "--no-mask",
            "--no-torch-deterministic",
            "--torch-deterministic",
            "--no-wandb",
            "--wandb",
        ])
        .unwrap();
        assert!(!config.mask);
        assert!(config.torch_deterministic);
        assert!(config.use_wandb);

        let config =
            Cli::resolve_from(["microrts-train", "results", "10", "--no-torch-deterministic"]).unwrap();
        assert!(!config.torch_deterministic);
    }

    #[test]
    fn test_options_and_engine_args() {
        let config = Cli::resolve_from([
            "microrts-train",
            "out",
            "10",
            "-l",
            "models/prev",
            "--seed",
            "3",
            "--model-save-freq",
            "500",
            "--entropy-coef",
            "0.05",
            "--engine",
            "/opt/engine",
            "--engine-arg",
            "--device=cpu",
            "--engine-arg",
            "-v",
        ])
        .unwrap();
        assert_eq!(config.load_path, Some(PathBuf::from("models/prev")));
        assert_eq!(config.seed, 3);
        assert_eq!(config.model_save_freq, 500);
        assert_eq!(config.entropy_coef, 0.05);
        assert_eq!(config.engine.command, PathBuf::from("/opt/engine"));
        assert_eq!(config.engine.args, vec!["--device=cpu", "-v"]);
    }

    #[test]
    fn test_non_positive_values_rejected() {
        for args in [
            ["microrts-train", "out", "4", "--total-timesteps", "0"],
            ["microrts-train", "out", "4", "--eval-freq", "0"],
            ["microrts-train", "out", "4", "--eval-episodes", "0"],
            ["microrts-train", "out", "4", "--entropy-coef", "-0.1"],
            ["microrts-train", "out", "4", "--seed", "-1"],
        ] {
            assert!(matches!(Cli::resolve_from(args), Err(Error::InvalidArgument(_))));
        }
    }
}
