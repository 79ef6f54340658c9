// Checkpoint management - agent snapshots written while training runs
use regex::Regex;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::engine::{AgentHandle, Engine};
use crate::error::Result;

const SNAPSHOT_PREFIX: &str = "model";

/// Numbered snapshots `model-<step>.zip` in one directory, keeping the newest few,
/// plus the unnumbered `model.zip` written at training end.
pub struct SnapshotManager {
    dir: PathBuf,
    keep_snapshots: usize,
    pattern: Regex,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>, keep_snapshots: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let pattern = Regex::new(&format!(r"^{}-(\d+)\.zip$", regex::escape(SNAPSHOT_PREFIX)))
            .expect("snapshot pattern is a valid regex");

        Ok(Self {
            dir,
            keep_snapshots,
            pattern,
        })
    }

    pub fn snapshot_path(&self, step: u64) -> PathBuf {
        self.dir.join(format!("{}-{}.zip", SNAPSHOT_PREFIX, step))
    }

    pub fn final_path(&self) -> PathBuf {
        self.dir.join(format!("{}.zip", SNAPSHOT_PREFIX))
    }

    pub fn save_snapshot(
        &self,
        engine: &mut dyn Engine,
        agent: &AgentHandle,
        step: u64,
    ) -> Result<PathBuf> {
        let path = self.snapshot_path(step);
        engine.save_agent(agent, &path)?;
        info!("Snapshot saved: {}", path.display());
        self.cleanup_old_snapshots()?;
        Ok(path)
    }

    pub fn save_final(&self, engine: &mut dyn Engine, agent: &AgentHandle) -> Result<PathBuf> {
        let path = self.final_path();
        engine.save_agent(agent, &path)?;
        info!("Snapshot saved: {}", path.display());
        Ok(path)
    }

    /// Numbered snapshots on disk, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let step = self
                .pattern
                .captures(name)
                .and_then(|captures| captures.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok());
            if let Some(step) = step {
                snapshots.push((step, entry.path()));
            }
        }
        snapshots.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(snapshots)
    }

    pub fn cleanup_old_snapshots(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for (_, path) in self.list_snapshots()?.into_iter().skip(self.keep_snapshots) {
            if path.exists() {
                fs::remove_file(&path)?;
                debug!("Removed old snapshot: {}", path.display());
                removed.push(path);
            }
        }
        Ok(removed)
    }
}
