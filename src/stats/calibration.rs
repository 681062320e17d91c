//! Calibration aggregator.
//!
//! Module × score-bracket × regime hit-rate bookkeeping. Measures how
//! often each scoring module was right, grouped by how confident it was
//! and by the market regime the decision was made in.

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::{JsonStore, CALIBRATION};
use crate::types::CalibrationData;

/// Owns the calibration dataset. All mutations are serialized through the
/// internal lock; the dataset is lazily loaded and persisted after every
/// mutation.
pub struct CalibrationBook {
    store: JsonStore,
    data: Mutex<Option<CalibrationData>>,
}

impl CalibrationBook {
    pub fn new(store: JsonStore) -> Self {
        Self {
            store,
            data: Mutex::new(None),
        }
    }

    /// Record one evaluated outcome at module × bracket and regime × module
    /// granularity.
    pub async fn record_outcome(&self, module: &str, bracket: &str, correct: bool, regime: &str) {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);

        data.modules
            .entry(module.to_string())
            .or_default()
            .brackets
            .entry(bracket.to_string())
            .or_default()
            .record(correct);

        data.regimes
            .entry(regime.to_string())
            .or_default()
            .record(module, correct);

        data.last_updated = Utc::now();
        self.store.save(CALIBRATION, data);

        debug!(module, bracket, correct, regime, "Calibration outcome recorded");
    }

    /// Hit rate for a module × bracket cell. None when no attempts yet.
    pub async fn hit_rate(&self, module: &str, bracket: &str) -> Option<f64> {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);
        data.modules.get(module)?.brackets.get(bracket)?.hit_rate()
    }

    /// Hit rate for a module within a regime. None when no attempts yet.
    pub async fn regime_hit_rate(&self, regime: &str, module: &str) -> Option<f64> {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);
        data.regimes.get(regime)?.hit_rate(module)
    }

    /// Full copy of the calibration dataset for reporting consumers.
    pub async fn snapshot(&self) -> CalibrationData {
        let mut guard = self.data.lock().await;
        self.ensure_loaded(&mut guard).clone()
    }

    fn ensure_loaded<'a>(
        &self,
        guard: &'a mut Option<CalibrationData>,
    ) -> &'a mut CalibrationData {
        guard.get_or_insert_with(|| self.store.load(CALIBRATION))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
