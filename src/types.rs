//! Shared types for the HINDSIGHT calibration loop.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that storage, engine, stats,
//! and outbox modules can depend on them without circular references.

use chrono::{DateTime, Days, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Decision action
// ---------------------------------------------------------------------------

/// Action taken by the decision engine at decision time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
    Abstain,
}

impl Action {
    /// Only BUY and SELL have a later outcome to judge.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Action::Buy | Action::Sell)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
            Action::Abstain => write!(f, "ABSTAIN"),
        }
    }
}

/// Attempt to parse a string into an Action (case-insensitive).
impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            "HOLD" => Ok(Action::Hold),
            "ABSTAIN" => Ok(Action::Abstain),
            other => Err(anyhow::anyhow!("Unknown action: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Score brackets
// ---------------------------------------------------------------------------

/// The five fixed score brackets used to group calibration statistics.
pub const BRACKETS: &[&str] = &["0-20", "20-40", "40-60", "60-80", "80-100"];

/// The two brackets considered when naming a "most reliable" module.
/// Low-confidence brackets are excluded so a loud-but-uncertain module
/// cannot top the ranking.
pub const HIGH_BRACKETS: &[&str] = &["60-80", "80-100"];

/// Map a module score (0–100) to its bracket label.
///
/// Lower bound inclusive, upper bound exclusive, except the top bracket
/// which includes 100. Out-of-range scores clamp into the edge brackets.
pub fn score_to_bracket(score: f64) -> &'static str {
    if score < 20.0 {
        "0-20"
    } else if score < 40.0 {
        "20-40"
    } else if score < 60.0 {
        "40-60"
    } else if score < 80.0 {
        "60-80"
    } else {
        "80-100"
    }
}

// ---------------------------------------------------------------------------
// Pending observation
// ---------------------------------------------------------------------------

/// One actionable decision awaiting outcome evaluation.
///
/// Created by `observe`, mutated in place as horizons mature, and dropped
/// from the pending list once every horizon has been evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingObservation {
    pub id: Uuid,
    pub symbol: String,
    pub decision_date: DateTime<Utc>,
    pub action: Action,
    /// Module name → score (0–100) at decision time.
    pub module_scores: HashMap<String, f64>,
    /// Market regime label at decision time (e.g. "risk_on").
    pub regime: String,
    pub price_at_decision: f64,
    /// Evaluation horizons in days, e.g. [7, 15].
    pub horizons: Vec<u32>,
    /// Subset of `horizons` already evaluated. Invariant: no duplicates.
    pub evaluated_horizons: Vec<u32>,
}

impl PendingObservation {
    pub fn new(
        symbol: &str,
        action: Action,
        module_scores: HashMap<String, f64>,
        regime: &str,
        price_at_decision: f64,
        horizons: Vec<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            decision_date: Utc::now(),
            action,
            module_scores,
            regime: regime.to_string(),
            price_at_decision,
            horizons,
            evaluated_horizons: Vec::new(),
        }
    }

    /// Whether `horizon` is ready to be evaluated at `now`.
    ///
    /// Calendar-day arithmetic: the target is the decision timestamp plus
    /// `horizon` days, not `horizon * 86400` elapsed seconds.
    pub fn is_horizon_mature(&self, horizon: u32, now: DateTime<Utc>) -> bool {
        let target = self
            .decision_date
            .checked_add_days(Days::new(horizon as u64))
            .unwrap_or(self.decision_date);
        now >= target && !self.evaluated_horizons.contains(&horizon)
    }

    /// Mark a horizon evaluated. Idempotent.
    pub fn mark_evaluated(&mut self, horizon: u32) {
        if !self.evaluated_horizons.contains(&horizon) {
            self.evaluated_horizons.push(horizon);
        }
    }

    /// All declared horizons evaluated?
    pub fn is_fully_evaluated(&self) -> bool {
        self.horizons
            .iter()
            .all(|h| self.evaluated_horizons.contains(h))
    }
}

// ---------------------------------------------------------------------------
// Calibration aggregates
// ---------------------------------------------------------------------------

/// Attempt/correct counters for one module × bracket cell.
/// Counters are monotone non-decreasing and `correct <= attempts` always.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BracketStats {
    pub attempts: u64,
    pub correct: u64,
}

impl BracketStats {
    pub fn record(&mut self, correct: bool) {
        self.attempts += 1;
        if correct {
            self.correct += 1;
        }
    }

    /// None when no attempts have been recorded.
    pub fn hit_rate(&self) -> Option<f64> {
        if self.attempts == 0 {
            None
        } else {
            Some(self.correct as f64 / self.attempts as f64)
        }
    }
}

/// Per-module calibration: bracket label → counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleCalibration {
    pub brackets: HashMap<String, BracketStats>,
}

/// Per-regime calibration: parallel attempt/correct counters keyed by module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeInsight {
    pub module_attempts: HashMap<String, u64>,
    pub module_correct: HashMap<String, u64>,
}

impl RegimeInsight {
    pub fn record(&mut self, module: &str, correct: bool) {
        *self.module_attempts.entry(module.to_string()).or_insert(0) += 1;
        if correct {
            *self.module_correct.entry(module.to_string()).or_insert(0) += 1;
        }
    }

    pub fn hit_rate(&self, module: &str) -> Option<f64> {
        let attempts = *self.module_attempts.get(module)?;
        if attempts == 0 {
            return None;
        }
        let correct = self.module_correct.get(module).copied().unwrap_or(0);
        Some(correct as f64 / attempts as f64)
    }
}

/// The full calibration dataset: module × bracket plus regime × module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationData {
    pub modules: HashMap<String, ModuleCalibration>,
    pub regimes: HashMap<String, RegimeInsight>,
    pub last_updated: DateTime<Utc>,
    pub version: String,
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self {
            modules: HashMap::new(),
            regimes: HashMap::new(),
            last_updated: Utc::now(),
            version: "1.0".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine snapshot (read-only view for reporting consumers)
// ---------------------------------------------------------------------------

/// Point-in-time view of the calibration state, served to dashboards and
/// insight generators.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub calibration: CalibrationData,
    pub pending_count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Minimum attempts before a module may be named most reliable or weakest.
const MIN_RANKING_SAMPLES: u64 = 5;

impl EngineSnapshot {
    /// Best-performing module across the two high-confidence brackets only.
    pub fn top_module(&self) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for (module, cal) in &self.calibration.modules {
            let (attempts, correct) = cal
                .brackets
                .iter()
                .filter(|(label, _)| HIGH_BRACKETS.contains(&label.as_str()))
                .fold((0u64, 0u64), |(a, c), (_, s)| (a + s.attempts, c + s.correct));
            if attempts < MIN_RANKING_SAMPLES {
                continue;
            }
            let rate = correct as f64 / attempts as f64;
            if best.as_ref().map_or(true, |(_, r)| rate > *r) {
                best = Some((module.clone(), rate));
            }
        }
        best
    }

    /// Worst-performing module across all brackets.
    pub fn weakest_module(&self) -> Option<(String, f64)> {
        let mut worst: Option<(String, f64)> = None;
        for (module, cal) in &self.calibration.modules {
            let (attempts, correct) = cal
                .brackets
                .values()
                .fold((0u64, 0u64), |(a, c), s| (a + s.attempts, c + s.correct));
            if attempts < MIN_RANKING_SAMPLES {
                continue;
            }
            let rate = correct as f64 / attempts as f64;
            if worst.as_ref().map_or(true, |(_, r)| rate < *r) {
                worst = Some((module.clone(), rate));
            }
        }
        worst
    }
}

// ---------------------------------------------------------------------------
// Outbox entry
// ---------------------------------------------------------------------------

/// A failed external-sync call queued for retry.
///
/// `retry_count` increases monotonically; the entry is removed only on
/// success or on reaching the retry ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSync {
    pub id: Uuid,
    pub namespace: String,
    pub document_id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl FailedSync {
    pub fn new(
        namespace: &str,
        document_id: &str,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            document_id: document_id.to_string(),
            text: text.to_string(),
            metadata,
            failed_at: Utc::now(),
            retry_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for HINDSIGHT.
#[derive(Debug, thiserror::Error)]
pub enum HindsightError {
    #[error("Sync error ({namespace}/{document_id}): {message}")]
    Sync {
        namespace: String,
        document_id: String,
        message: String,
    },

    #[error("Storage error ({dataset}): {message}")]
    Storage { dataset: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
