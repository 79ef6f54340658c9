// Experiment tracking - run descriptor, metric stream and agent snapshots
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use tracing::info;

use crate::engine::Metrics;
use crate::error::Result;
use crate::trainers::callbacks::{Callback, CallbackContext};
use crate::trainers::checkpoint::SnapshotManager;
use crate::trainers::settings::{Defaults, RunConfig};

pub const TRACKING_PROJECT: &str = "invalid-actions-sb3-10x10";
pub const DEFAULT_KEEP_SNAPSHOTS: usize = 5;

/// What the tracking service is told about the run when it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRun {
    pub project: String,
    /// Upload the framework's tensorboard metrics.
    pub sync_tensorboard: bool,
    /// Upload videos of agents playing.
    pub monitor_gym: bool,
    pub save_code: bool,
    pub anonymous: bool,
    pub config: serde_json::Value,
}

impl TrackingRun {
    pub fn for_config(config: &RunConfig) -> Self {
        Self {
            project: TRACKING_PROJECT.to_string(),
            sync_tensorboard: true,
            monitor_gym: true,
            save_code: true,
            anonymous: true,
            config: config.as_dict(),
        }
    }
}

pub trait Tracker {
    fn init(&mut self, run: &TrackingRun) -> Result<()>;

    fn log_metrics(&mut self, step: u64, metrics: &Metrics) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

#[derive(Serialize)]
struct MetricsRecord<'a> {
    step: u64,
    metrics: &'a Metrics,
}

/// Tracker that keeps everything on local disk: `run.json` plus `metrics.jsonl`.
pub struct LocalTracker {
    dir: PathBuf,
    metrics_file: Option<File>,
}

impl LocalTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            metrics_file: None,
        }
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join("metrics.jsonl")
    }
}

impl Tracker for LocalTracker {
    fn init(&mut self, run: &TrackingRun) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join("run.json"), serde_json::to_string_pretty(run)?)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.metrics_path())?;
        self.metrics_file = Some(file);
        info!(project = %run.project, dir = %self.dir.display(), "Tracking initialized");
        Ok(())
    }

    fn log_metrics(&mut self, step: u64, metrics: &Metrics) -> Result<()> {
        if let Some(file) = self.metrics_file.as_mut() {
            let line = serde_json::to_string(&MetricsRecord { step, metrics })?;
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.metrics_file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Forwards rollout metrics to the tracker and snapshots the agent.
pub struct TrackingCallback {
    tracker: Box<dyn Tracker>,
    snapshots: SnapshotManager,
    model_save_freq: u64,
    n_calls: u64,
}

impl TrackingCallback {
    pub fn new(tracker: Box<dyn Tracker>, model_save_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            tracker,
            snapshots: SnapshotManager::new(model_save_path, DEFAULT_KEEP_SNAPSHOTS)?,
            model_save_freq: Defaults::MODEL_SAVE_FREQ,
            n_calls: 0,
        })
    }

    /// Snapshot every `model_save_freq` calls; `0` disables numbered snapshots.
    pub fn with_model_save_freq(mut self, model_save_freq: u64) -> Self {
        self.model_save_freq = model_save_freq;
        self
    }
}

impl Callback for TrackingCallback {
    fn name(&self) -> &str {
        "tracking"
    }

    fn on_step(&mut self, ctx: &mut CallbackContext<'_>) -> Result<bool> {
        self.n_calls += 1;
        if self.model_save_freq > 0 && self.n_calls % self.model_save_freq == 0 {
            self.snapshots
                .save_snapshot(&mut *ctx.engine, ctx.agent, ctx.num_timesteps)?;
        }
        Ok(true)
    }

    fn on_rollout_end(&mut self, ctx: &mut CallbackContext<'_>, metrics: &Metrics) -> Result<()> {
        self.tracker.log_metrics(ctx.num_timesteps, metrics)
    }

    fn on_training_end(&mut self, ctx: &mut CallbackContext<'_>) -> Result<()> {
        self.snapshots.save_final(&mut *ctx.engine, ctx.agent)?;
        self.tracker.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainers::settings::MapSize;

    #[test]
    fn test_local_tracker_writes_run_and_metrics() {
        let dir = std::env::temp_dir().join(format!("microrts-tracking-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let config = RunConfig::new("out", MapSize::Ten);
        let mut tracker = LocalTracker::new(&dir);
        tracker.init(&TrackingRun::for_config(&config)).unwrap();

        let mut metrics = Metrics::new();
        metrics.insert("rollout/ep_rew_mean".to_string(), 0.5);
        tracker.log_metrics(2048, &metrics).unwrap();
        tracker.finish().unwrap();

        let run: TrackingRun =
            serde_json::from_str(&fs::read_to_string(dir.join("run.json")).unwrap()).unwrap();
        assert_eq!(run.project, TRACKING_PROJECT);
        assert!(run.anonymous);
        assert_eq!(run.config["map_size"], "10");

        let lines = fs::read_to_string(tracker.metrics_path()).unwrap();
        let record: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(record["step"], 2048);
        assert_eq!(record["metrics"]["rollout/ep_rew_mean"], 0.5);

        fs::remove_dir_all(&dir).ok();
    }
}
