//! Calibration engine — observation scheduling and outcome fan-out.
//!
//! Records actionable decisions as pending observations, and on each
//! poll evaluates every horizon that has matured, feeding the result to
//! all four statistical aggregators. The aggregator updates are not
//! transactional with each other or with the pending list: each
//! statistic is independently advisory, so a crash between them costs
//! at most one data point in some of them.

pub mod evaluator;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::stats::anomaly::AnomalyDetector;
use crate::stats::calibration::CalibrationBook;
use crate::stats::correlation::CorrelationTracker;
use crate::stats::temporal::TemporalAnalyzer;
use crate::storage::{JsonStore, PENDING_OBSERVATIONS};
use crate::types::{score_to_bracket, Action, EngineSnapshot, PendingObservation};

use evaluator::evaluate_outcome;

/// Owns the pending-observations dataset and drives the maturation
/// pipeline. One instance per process.
pub struct CalibrationEngine {
    store: JsonStore,
    pending: Mutex<Option<Vec<PendingObservation>>>,
    horizons: Vec<u32>,
    calibration: Arc<CalibrationBook>,
    anomaly: Arc<AnomalyDetector>,
    correlation: Arc<CorrelationTracker>,
    temporal: Arc<TemporalAnalyzer>,
}

impl CalibrationEngine {
    pub fn new(
        store: JsonStore,
        horizons: Vec<u32>,
        calibration: Arc<CalibrationBook>,
        anomaly: Arc<AnomalyDetector>,
        correlation: Arc<CorrelationTracker>,
        temporal: Arc<TemporalAnalyzer>,
    ) -> Self {
        Self {
            store,
            pending: Mutex::new(None),
            horizons,
            calibration,
            anomaly,
            correlation,
            temporal,
        }
    }

    /// Record a new decision for future evaluation. HOLD/ABSTAIN are
    /// skipped — there is no later outcome to judge. Returns whether the
    /// decision was tracked.
    pub async fn observe(
        &self,
        symbol: &str,
        action: Action,
        module_scores: HashMap<String, f64>,
        regime: &str,
        price: f64,
    ) -> bool {
        if !action.is_actionable() {
            debug!(symbol, %action, "Non-actionable decision, not tracked");
            return false;
        }

        let observation = PendingObservation::new(
            symbol,
            action,
            module_scores,
            regime,
            price,
            self.horizons.clone(),
        );

        let mut guard = self.pending.lock().await;
        let pending = self.ensure_loaded(&mut guard);
        pending.push(observation);
        self.store.save(PENDING_OBSERVATIONS, pending);

        info!(symbol, %action, pending = pending.len(), "New observation recorded");
        true
    }

    /// Evaluate every pending observation × horizon that has matured and
    /// has a current price available. Horizons without a price are left
    /// for the next poll. Returns the number of horizon evaluations
    /// performed; fully-evaluated observations are dropped from the
    /// pending list, which is persisted once after the pass.
    pub async fn process_matured_decisions(
        &self,
        current_prices: &HashMap<String, f64>,
    ) -> usize {
        let now = Utc::now();
        let mut evaluated_count = 0;

        let mut guard = self.pending.lock().await;
        let pending = self.ensure_loaded(&mut guard);

        for observation in pending.iter_mut() {
            let horizons = observation.horizons.clone();
            for horizon in horizons {
                if !observation.is_horizon_mature(horizon, now) {
                    continue;
                }
                let Some(&current_price) = current_prices.get(&observation.symbol) else {
                    debug!(
                        symbol = %observation.symbol,
                        horizon,
                        "Matured but no price available, retrying next poll"
                    );
                    continue;
                };

                let correct = evaluate_outcome(
                    observation.action,
                    observation.price_at_decision,
                    current_price,
                );

                // Fan out to every aggregator, then mark the horizon
                // evaluated regardless of outcome.
                for (module, &score) in &observation.module_scores {
                    self.calibration
                        .record_outcome(module, score_to_bracket(score), correct, &observation.regime)
                        .await;
                    self.anomaly.record(module, score, correct).await;
                    self.temporal
                        .record_outcome(module, correct, observation.decision_date, &observation.symbol)
                        .await;
                }
                self.correlation
                    .record(&observation.module_scores, correct)
                    .await;

                observation.mark_evaluated(horizon);
                evaluated_count += 1;

                info!(
                    symbol = %observation.symbol,
                    horizon,
                    correct,
                    "Horizon evaluated"
                );
            }
        }

        pending.retain(|obs| !obs.is_fully_evaluated());
        self.store.save(PENDING_OBSERVATIONS, pending);

        info!(
            evaluated = evaluated_count,
            remaining = pending.len(),
            "Maturation pass complete"
        );
        evaluated_count
    }

    /// Number of observations still awaiting at least one horizon.
    pub async fn pending_count(&self) -> usize {
        let mut guard = self.pending.lock().await;
        self.ensure_loaded(&mut guard).len()
    }

    /// Point-in-time calibration view for reporting consumers.
    pub async fn current_stats(&self) -> EngineSnapshot {
        let calibration = self.calibration.snapshot().await;
        let pending_count = self.pending_count().await;
        EngineSnapshot {
            last_updated: calibration.last_updated,
            calibration,
            pending_count,
        }
    }

    fn ensure_loaded<'a>(
        &self,
        guard: &'a mut Option<Vec<PendingObservation>>,
    ) -> &'a mut Vec<PendingObservation> {
        guard.get_or_insert_with(|| self.store.load(PENDING_OBSERVATIONS))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
