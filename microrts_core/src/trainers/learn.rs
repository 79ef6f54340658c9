// Learn module - main entry point for a Microrts training run
use std::ffi::OsString;
use std::fs;

use tracing::{debug, info, warn};

use crate::cli::Cli;
use crate::engine::{Engine, EngineError};
use crate::error::Result;
use crate::trainers::agent_builder::AgentBuilder;
use crate::trainers::callbacks::{CallbackList, InterruptCallback, InterruptFlag};
use crate::trainers::environment_factory::{EnvironmentFactory, EnvironmentSession};
use crate::trainers::settings::{EngineSettings, RunConfig};
use crate::trainers::trainer_controller::{RunSummary, TrainerController};
use crate::trainers::tracking::{LocalTracker, Tracker, TrackingCallback, TrackingRun};
use crate::trainers::variant::AlgorithmVariant;
use crate::utils::{create_directory_if_not_exists, RunLayout};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn get_version_string() -> String {
    format!("Version information:\n  microrts-train: {}", VERSION)
}

/// One training run, from tracker init to teardown.
pub struct TrainingRun<'c> {
    config: &'c RunConfig,
    layout: RunLayout,
    tracker: Option<Box<dyn Tracker>>,
    interrupt: InterruptFlag,
}

impl<'c> TrainingRun<'c> {
    pub fn new(config: &'c RunConfig) -> Self {
        Self {
            config,
            layout: RunLayout::from_config(config),
            tracker: None,
            interrupt: InterruptFlag::new(),
        }
    }

    /// Replaces the bundled `LocalTracker`. Only used when tracking is enabled.
    pub fn with_tracker(mut self, tracker: Box<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn run<E: Engine + ?Sized>(self, engine: &mut E) -> Result<RunSummary> {
        let TrainingRun {
            config,
            layout,
            tracker,
            interrupt,
        } = self;

        // Tracking must be live before anything else is built.
        let tracker = if config.use_wandb {
            let mut tracker: Box<dyn Tracker> = match tracker {
                Some(tracker) => tracker,
                None => Box::new(LocalTracker::new(layout.tracking_dir())),
            };
            tracker.init(&TrackingRun::for_config(config))?;
            Some(tracker)
        } else {
            None
        };

        write_run_options(&layout, config)?;

        let backend = config.backend_settings();
        engine.configure(&backend)?;
        debug!(deterministic = backend.deterministic, seed = backend.seed, "Backend configured");

        let mut session = EnvironmentSession::new(engine);
        let factory = EnvironmentFactory::from_config(config);
        let train_env = session.make_vec_env(&factory.training_spec())?;
        let eval_env = session.make_vec_env(&factory.evaluation_spec())?;

        let variant = AlgorithmVariant::select(config.mask);
        let eval_callback = variant
            .eval_callback(eval_env, config.eval_callback_freq(), config.eval_episodes)
            .with_log_path(layout.evaluations_file());

        let agent = AgentBuilder::new(config, &layout).build(session.engine(), variant, &train_env)?;

        let mut callbacks = CallbackList::new();
        callbacks.push(Box::new(InterruptCallback::new(interrupt)));
        callbacks.push(Box::new(eval_callback));
        if let Some(tracker) = tracker {
            let tracking = TrackingCallback::new(tracker, layout.model_save_path())?
                .with_model_save_freq(config.model_save_freq);
            callbacks.push(Box::new(tracking));
        }

        TrainerController::new(&layout, variant, config.total_timesteps).start_learning(
            session,
            &agent,
            &mut callbacks,
        )
    }
}

fn write_run_options(layout: &RunLayout, config: &RunConfig) -> Result<()> {
    create_directory_if_not_exists(&layout.run_logs_dir())?;
    let yaml_str = serde_yaml::to_string(config)?;
    fs::write(layout.configuration_file(), yaml_str)?;
    Ok(())
}

fn print_configuration(config: &RunConfig) {
    info!("{}", get_version_string());
    info!(
        map_size = %config.map_size,
        total_timesteps = config.total_timesteps,
        seed = config.seed,
        mask = config.mask,
        tracking = config.use_wandb,
        "Run {}",
        config.timestamp
    );
    if let Ok(json) = serde_json::to_string_pretty(&config.as_dict()) {
        debug!("Configuration: {}", json);
    }
}

/// Connects to the engine, runs training and shuts the engine down again.
pub fn run_cli<E, F>(config: RunConfig, connect: F, interrupt: InterruptFlag) -> Result<RunSummary>
where
    E: Engine,
    F: FnOnce(&EngineSettings) -> std::result::Result<E, EngineError>,
{
    print_configuration(&config);

    let mut engine = connect(&config.engine)?;
    let result = TrainingRun::new(&config)
        .with_interrupt(interrupt)
        .run(&mut engine);

    if let Err(e) = engine.shutdown() {
        warn!("Engine did not shut down cleanly: {}", e);
    }

    match &result {
        Ok(summary) => info!(
            num_timesteps = summary.num_timesteps,
            "Training completed, checkpoint at {}",
            summary.checkpoint.display()
        ),
        Err(e) => warn!("Training aborted: {}", e),
    }
    result
}

/// Parses `args` and runs. An invalid command line never reaches `connect`.
pub fn launch<I, T, E, F>(args: I, connect: F, interrupt: InterruptFlag) -> Result<RunSummary>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    E: Engine,
    F: FnOnce(&EngineSettings) -> std::result::Result<E, EngineError>,
{
    let config = Cli::resolve_from(args)?;
    run_cli(config, connect, interrupt)
}
