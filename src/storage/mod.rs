//! Persistence layer.
//!
//! One JSON document per logical dataset under a common data directory.
//! Loads fall back to an empty dataset on any failure; saves are atomic
//! (write-temp-then-rename) and failures are logged and swallowed. These
//! statistics are advisory inputs to the decision engine, not its source
//! of truth, so availability wins over strict durability here.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Dataset file names, one per logical dataset.
pub const PENDING_OBSERVATIONS: &str = "pending_observations.json";
pub const CALIBRATION: &str = "calibration.json";
pub const ROLLING_STATS: &str = "rolling_stats.json";
pub const CORRELATIONS: &str = "correlations.json";
pub const TEMPORAL: &str = "temporal.json";
pub const SYNC_OUTBOX: &str = "sync_outbox.json";

/// JSON-document-per-dataset store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed.
    /// Directory creation failure is non-fatal; subsequent saves will log.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(dir = %base_dir.display(), error = %e, "Failed to create data directory");
        }
        Self { base_dir }
    }

    pub fn path_for(&self, dataset: &str) -> PathBuf {
        self.base_dir.join(dataset)
    }

    /// Load a dataset, falling back to its default on any failure.
    ///
    /// A missing file is a fresh start (info); a read or decode failure
    /// means that dataset's history is lost (warn) — never an error to
    /// the caller.
    pub fn load<T: DeserializeOwned + Default>(&self, dataset: &str) -> T {
        let path = self.path_for(dataset);
        if !path.exists() {
            info!(dataset, "No saved dataset found, starting fresh");
            return T::default();
        }
        match self.try_load(&path) {
            Ok(value) => {
                debug!(dataset, "Dataset loaded");
                value
            }
            Err(e) => {
                warn!(dataset, error = %e, "Failed to load dataset, resetting to empty");
                T::default()
            }
        }
    }

    /// Save a dataset. Failures are logged and dropped, never raised.
    pub fn save<T: Serialize>(&self, dataset: &str, value: &T) {
        if let Err(e) = self.try_save(dataset, value) {
            warn!(dataset, error = %e, "Failed to save dataset");
        } else {
            debug!(dataset, "Dataset saved");
        }
    }

    fn try_load<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Write to a temp file in the same directory, then rename over the
    /// target. Readers only ever see the last fully-written snapshot.
    fn try_save<T: Serialize>(&self, dataset: &str, value: &T) -> Result<()> {
        let path = self.path_for(dataset);
        let tmp = self.base_dir.join(format!("{dataset}.tmp"));

        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialise {dataset}"))?;
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
