// Microrts Core Library - launcher for PPO training runs on the Microrts mining task

pub mod cli;
pub mod engine;
pub mod env;
pub mod error;
pub mod trainers;
pub mod utils;

// Re-export main types
pub use engine::{Engine, EngineError, ProcessEngine};
pub use error::{Error, Result};
pub use trainers::{launch, run_cli, InterruptFlag, MapSize, RunConfig, RunSummary, TrainingRun};

#[cfg(test)]
mod tests {
    #[test]
    fn test_version_string() {
        let version = crate::trainers::learn::get_version_string();
        assert!(version.contains("microrts-train"));
    }
}
