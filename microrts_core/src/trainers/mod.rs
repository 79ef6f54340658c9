// Trainers module - run configuration, training pipeline and callbacks

pub mod settings;
pub mod environment_factory;
pub mod variant;
pub mod callbacks;
pub mod checkpoint;
pub mod tracking;
pub mod agent_builder;
pub mod trainer_controller;
pub mod learn;

pub use learn::{launch, run_cli, TrainingRun};
pub use trainer_controller::{RunSummary, TrainerController};
pub use settings::{MapSize, RunConfig};
pub use callbacks::{Callback, CallbackList, InterruptFlag};
pub use checkpoint::SnapshotManager;
