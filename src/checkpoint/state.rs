//! Checkpoint state management for resumable extractions.
//!
//! Epistemic foundation:
//! - K_i: Checkpoints track the dumped value and the fitted trial count
//! - K_i: State is persisted to disk atomically (write-then-rename)
//! - B_i: Checkpoint file may not exist → Option
//! - I^B: Crash during write → backup file provides recovery

use crate::models::{OrmLeakError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Progress of one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpCheckpoint {
    /// Attack kind (e.g. prisma-contains)
    pub attack: String,
    /// Target URL
    pub target: String,
    /// Value dumped so far
    pub known_value: String,
    /// Trial count in effect (time-based attacks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trials: Option<usize>,
    /// Backtracks after path correction
    #[serde(default)]
    pub backtracks: usize,
    /// Whether the run finished
    #[serde(default)]
    pub complete: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl DumpCheckpoint {
    /// Create a new checkpoint state.
    pub fn new(attack: &str, target: &str, known_value: &str, trials: Option<usize>) -> Self {
        let now = Utc::now();
        Self {
            attack: attack.to_string(),
            target: target.to_string(),
            known_value: known_value.to_string(),
            trials,
            backtracks: 0,
            complete: false,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record the current dumped value and trial count.
    pub fn record(&mut self, known_value: &str, trials: Option<usize>) {
        self.known_value = known_value.to_string();
        if trials.is_some() {
            self.trials = trials;
        }
        self.updated_at = Utc::now();
    }

    /// Record a backtrack to a previously validated value.
    pub fn record_backtrack(&mut self, known_value: &str, trials: Option<usize>) {
        self.backtracks += 1;
        self.record(known_value, trials);
    }

    /// Mark the run as finished.
    pub fn mark_complete(&mut self, known_value: &str) {
        self.complete = true;
        self.record(known_value, None);
    }
}

/// Checkpoint manager for persisting and loading checkpoint state.
pub struct CheckpointManager {
    /// Directory for checkpoint files
    dir: PathBuf,
    /// Path to main checkpoint file
    checkpoint_path: PathBuf,
    /// Path to backup file
    backup_path: PathBuf,
    /// Current state
    state: Option<DumpCheckpoint>,
}

impl CheckpointManager {
    /// Create a new checkpoint manager.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| OrmLeakError::io("creating checkpoint dir", e))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            checkpoint_path: dir.join("checkpoint.json"),
            backup_path: dir.join("checkpoint.backup.json"),
            state: None,
        })
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.checkpoint_path.exists()
    }

    /// Initialize a new checkpoint or load the existing one.
    ///
    /// An existing checkpoint must belong to the same attack and target.
    pub fn init_or_load(
        &mut self,
        attack: &str,
        target: &str,
        prefix: &str,
        trials: Option<usize>,
    ) -> Result<&DumpCheckpoint> {
        let state = if self.exists() {
            let state = Self::read(&self.checkpoint_path)?;
            if state.attack != attack || state.target != target {
                return Err(OrmLeakError::InvalidInput(format!(
                    "checkpoint in {} belongs to {} on {}",
                    self.dir.display(),
                    state.attack,
                    state.target
                )));
            }
            info!(
                known_value = %state.known_value,
                trials = ?state.trials,
                "Resuming from checkpoint"
            );
            state
        } else {
            info!(attack = attack, "Created new checkpoint");
            DumpCheckpoint::new(attack, target, prefix, trials)
        };

        self.state = Some(state);
        self.save()?;
        self.state
            .as_ref()
            .ok_or_else(|| OrmLeakError::Internal("checkpoint state missing".to_string()))
    }

    /// Load checkpoint from disk.
    pub fn load(&mut self) -> Result<&DumpCheckpoint> {
        let state = Self::read(&self.checkpoint_path)?;
        Ok(self.state.insert(state))
    }

    fn read(path: &Path) -> Result<DumpCheckpoint> {
        let file = File::open(path).map_err(|e| OrmLeakError::io("opening checkpoint", e))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| OrmLeakError::ParseError(format!("Invalid checkpoint: {}", e)))
    }

    /// Save checkpoint to disk (atomic write).
    pub fn save(&self) -> Result<()> {
        let state = self.state.as_ref().ok_or_else(|| {
            OrmLeakError::Internal("No checkpoint state to save".to_string())
        })?;

        // Backup existing checkpoint
        if self.checkpoint_path.exists() {
            fs::copy(&self.checkpoint_path, &self.backup_path)
                .map_err(|e| OrmLeakError::io("backing up checkpoint", e))?;
        }

        // Write to temp file
        let temp_path = self.dir.join("checkpoint.tmp.json");
        let file = File::create(&temp_path)
            .map_err(|e| OrmLeakError::io("creating temp checkpoint", e))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, state)
            .map_err(|e| OrmLeakError::Internal(format!("Serializing checkpoint: {}", e)))?;

        // Atomic rename
        fs::rename(&temp_path, &self.checkpoint_path)
            .map_err(|e| OrmLeakError::io("renaming checkpoint", e))?;

        debug!("Checkpoint saved");
        Ok(())
    }

    /// Get reference to state.
    pub fn state(&self) -> Option<&DumpCheckpoint> {
        self.state.as_ref()
    }

    /// Record progress and save.
    pub fn record(&mut self, known_value: &str, trials: Option<usize>) -> Result<()> {
        if let Some(state) = &mut self.state {
            state.record(known_value, trials);
        }
        self.save()
    }

    /// Record a backtrack and save.
    pub fn record_backtrack(&mut self, known_value: &str, trials: Option<usize>) -> Result<()> {
        if let Some(state) = &mut self.state {
            state.record_backtrack(known_value, trials);
        }
        self.save()
    }

    /// Mark the run complete and save.
    pub fn mark_complete(&mut self, known_value: &str) -> Result<()> {
        if let Some(state) = &mut self.state {
            state.mark_complete(known_value);
        }
        self.save()
    }

    /// Get checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_checkpoint_is_saved() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(dir.path()).unwrap();
        assert!(!manager.exists());

        let state = manager
            .init_or_load("prisma-contains", "http://t/api", "ab", Some(10))
            .unwrap();
        assert_eq!(state.known_value, "ab");
        assert!(manager.exists());
    }

    #[test]
    fn test_resume_restores_progress() {
        let dir = TempDir::new().unwrap();
        {
            let mut manager = CheckpointManager::new(dir.path()).unwrap();
            manager.init_or_load("django-filter", "http://t", "", Some(10)).unwrap();
            manager.record("pbk", Some(15)).unwrap();
            manager.record_backtrack("pb", None).unwrap();
        }

        let mut manager = CheckpointManager::new(dir.path()).unwrap();
        let state = manager.init_or_load("django-filter", "http://t", "", Some(10)).unwrap();
        assert_eq!(state.known_value, "pb");
        assert_eq!(state.trials, Some(15));
        assert_eq!(state.backtracks, 1);
        assert!(dir.path().join("checkpoint.backup.json").exists());
    }

    #[test]
    fn test_refuses_checkpoint_of_another_target() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(dir.path()).unwrap();
        manager.init_or_load("json-blind", "http://a", "", None).unwrap();

        let mut other = CheckpointManager::new(dir.path()).unwrap();
        let result = other.init_or_load("json-blind", "http://b", "", None);
        assert!(matches!(result, Err(OrmLeakError::InvalidInput(_))));
    }
}
