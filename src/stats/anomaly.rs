//! Anomaly detector.
//!
//! Tracks a rolling baseline per module and flags modules whose recent
//! scores deviate from their own history. "Hermes is scoring well below
//! its usual range" style alerts, ranked by z-score.
//!
//! Both windows are count-based (most-recent N entries), not calendar
//! windows. The recent window approximates the last week of decisions.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::{JsonStore, ROLLING_STATS};

/// All-time score window cap per module.
const ALL_TIME_WINDOW: usize = 100;
/// Recent (score, outcome) window cap per module.
const RECENT_WINDOW: usize = 50;
/// Minimum all-time samples before a module can be flagged.
const MIN_BASELINE_SAMPLES: usize = 20;
/// Baseline assumptions for thin data: scores are 0–100, so an unseen
/// module is treated as centred at 50 with a wide spread.
const DEFAULT_MEAN: f64 = 50.0;
const DEFAULT_STD: f64 = 10.0;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingData {
    pub modules: HashMap<String, ModuleRollingStats>,
    pub last_updated: DateTime<Utc>,
}

impl Default for RollingData {
    fn default() -> Self {
        Self {
            modules: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Rolling windows for one module. Oldest entries are evicted first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleRollingStats {
    pub all_time_scores: VecDeque<f64>,
    pub recent_scores: VecDeque<f64>,
    pub recent_outcomes: VecDeque<bool>,
}

impl ModuleRollingStats {
    pub fn push(&mut self, score: f64, correct: bool) {
        self.all_time_scores.push_back(score);
        if self.all_time_scores.len() > ALL_TIME_WINDOW {
            self.all_time_scores.pop_front();
        }
        self.recent_scores.push_back(score);
        self.recent_outcomes.push_back(correct);
        if self.recent_scores.len() > RECENT_WINDOW {
            self.recent_scores.pop_front();
            self.recent_outcomes.pop_front();
        }
    }

    pub fn all_time_avg(&self) -> f64 {
        if self.all_time_scores.is_empty() {
            return DEFAULT_MEAN;
        }
        self.all_time_scores.iter().sum::<f64>() / self.all_time_scores.len() as f64
    }

    /// Sample standard deviation (n−1). Defaults wide on thin data so a
    /// module with one or zero samples never alarms.
    pub fn all_time_std(&self) -> f64 {
        let n = self.all_time_scores.len();
        if n <= 1 {
            return DEFAULT_STD;
        }
        let avg = self.all_time_avg();
        let variance = self
            .all_time_scores
            .iter()
            .map(|s| (s - avg).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    }

    pub fn recent_avg(&self) -> f64 {
        if self.recent_scores.is_empty() {
            return self.all_time_avg();
        }
        self.recent_scores.iter().sum::<f64>() / self.recent_scores.len() as f64
    }

    pub fn recent_hit_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 0.5;
        }
        let wins = self.recent_outcomes.iter().filter(|c| **c).count();
        wins as f64 / self.recent_outcomes.len() as f64
    }

    pub fn deviation_percent(&self) -> f64 {
        let all = self.all_time_avg();
        if all <= 0.0 {
            return 0.0;
        }
        ((self.recent_avg() - all) / all) * 100.0
    }

    /// Z-score of the recent mean against the all-time baseline. A constant
    /// all-time window (std 0) yields 0 — such a module is never flagged,
    /// whatever its recent scores.
    pub fn z_score(&self) -> f64 {
        let std = self.all_time_std();
        if std <= 0.0 {
            return 0.0;
        }
        (self.recent_avg() - self.all_time_avg()) / std
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnomalyDirection {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyAlert {
    pub module: String,
    pub direction: AnomalyDirection,
    pub z_score: f64,
    pub deviation_percent: f64,
    pub recent_hit_rate: f64,
    pub all_time_avg: f64,
    pub recent_avg: f64,
}

impl AnomalyAlert {
    pub fn severity(&self) -> AlertSeverity {
        let z = self.z_score.abs();
        if z >= 2.5 {
            AlertSeverity::Critical
        } else if z >= 2.0 {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Owns the rolling-stats dataset.
pub struct AnomalyDetector {
    store: JsonStore,
    data: Mutex<Option<RollingData>>,
}

impl AnomalyDetector {
    pub fn new(store: JsonStore) -> Self {
        Self {
            store,
            data: Mutex::new(None),
        }
    }

    /// Record a module's score and outcome into both windows.
    pub async fn record(&self, module: &str, score: f64, correct: bool) {
        let key = module.to_lowercase();
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);

        data.modules.entry(key.clone()).or_default().push(score, correct);
        data.last_updated = Utc::now();
        self.store.save(ROLLING_STATS, data);

        debug!(module = %key, score, correct, "Rolling stats recorded");
    }

    /// Modules whose recent mean deviates from their baseline by at least
    /// `threshold_z` standard deviations, sorted by |z| descending. Modules
    /// with fewer than 20 all-time samples are never flagged.
    pub async fn detect_anomalies(&self, threshold_z: f64) -> Vec<AnomalyAlert> {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);

        let mut alerts: Vec<AnomalyAlert> = data
            .modules
            .iter()
            .filter(|(_, stats)| {
                stats.all_time_scores.len() >= MIN_BASELINE_SAMPLES
                    && stats.z_score().abs() >= threshold_z
            })
            .map(|(module, stats)| {
                let z = stats.z_score();
                AnomalyAlert {
                    module: module.clone(),
                    direction: if z > 0.0 {
                        AnomalyDirection::Above
                    } else {
                        AnomalyDirection::Below
                    },
                    z_score: z,
                    deviation_percent: stats.deviation_percent(),
                    recent_hit_rate: stats.recent_hit_rate(),
                    all_time_avg: stats.all_time_avg(),
                    recent_avg: stats.recent_avg(),
                }
            })
            .collect();

        alerts.sort_by(|a, b| {
            b.z_score
                .abs()
                .partial_cmp(&a.z_score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        alerts
    }

    /// Rolling stats for one module (lowercased key).
    pub async fn stats_for(&self, module: &str) -> Option<ModuleRollingStats> {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);
        data.modules.get(&module.to_lowercase()).cloned()
    }

    /// All module rolling stats.
    pub async fn all_stats(&self) -> HashMap<String, ModuleRollingStats> {
        let mut guard = self.data.lock().await;
        self.ensure_loaded(&mut guard).modules.clone()
    }

    fn ensure_loaded<'a>(&self, guard: &'a mut Option<RollingData>) -> &'a mut RollingData {
        guard.get_or_insert_with(|| self.store.load(ROLLING_STATS))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
