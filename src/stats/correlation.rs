//! Correlation tracker.
//!
//! Measures hit rates when several modules score high on the same
//! decision. "When Orion 80+ AND Atlas 80+ agree, how often are we
//! right?" Keys are deterministic strings so the same combination always
//! lands on the same counter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::{JsonStore, CORRELATIONS};

/// Scores below this never participate in a correlation key.
const QUALIFYING_SCORE: f64 = 60.0;
/// Default minimum sample size when listing top combinations.
const TOP_MIN_SAMPLES: u64 = 5;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CorrelationStats {
    pub attempts: u64,
    pub correct: u64,
}

impl CorrelationStats {
    pub fn record(&mut self, correct: bool) {
        self.attempts += 1;
        if correct {
            self.correct += 1;
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.correct as f64 / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationData {
    pub correlations: HashMap<String, CorrelationStats>,
    pub last_updated: DateTime<Utc>,
}

impl Default for CorrelationData {
    fn default() -> Self {
        Self {
            correlations: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Coarse label for a qualifying score.
fn score_label(score: f64) -> &'static str {
    if score >= 80.0 {
        "80+"
    } else {
        "60+"
    }
}

/// Deterministic key construction: qualifying modules (score ≥ 60) are
/// lowercased, labeled, and sorted by name; each unordered pair gets one
/// key. Returns the pairwise keys plus the optional all-agree key.
fn correlation_keys(module_scores: &HashMap<String, f64>) -> Vec<String> {
    let mut qualifying: Vec<(String, &'static str)> = module_scores
        .iter()
        .filter(|(_, score)| **score >= QUALIFYING_SCORE)
        .map(|(module, score)| (module.to_lowercase(), score_label(*score)))
        .collect();
    qualifying.sort_by(|a, b| a.0.cmp(&b.0));

    let mut keys = Vec::new();
    for i in 0..qualifying.len() {
        for j in (i + 1)..qualifying.len() {
            keys.push(format!(
                "{}_{}_{}_{}",
                qualifying[i].0, qualifying[i].1, qualifying[j].0, qualifying[j].1
            ));
        }
    }
    if qualifying.len() >= 3 {
        keys.push(format!("all_{}_agree", qualifying.len()));
    }
    keys
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Owns the correlation dataset.
pub struct CorrelationTracker {
    store: JsonStore,
    data: Mutex<Option<CorrelationData>>,
}

impl CorrelationTracker {
    pub fn new(store: JsonStore) -> Self {
        Self {
            store,
            data: Mutex::new(None),
        }
    }

    /// Record one decision outcome against every co-occurrence key the
    /// module scores produce. Decisions with fewer than two qualifying
    /// modules contribute nothing.
    pub async fn record(&self, module_scores: &HashMap<String, f64>, correct: bool) {
        let keys = correlation_keys(module_scores);
        if keys.is_empty() {
            return;
        }

        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);
        for key in &keys {
            data.correlations.entry(key.clone()).or_default().record(correct);
        }
        data.last_updated = Utc::now();
        self.store.save(CORRELATIONS, data);

        debug!(keys = keys.len(), correct, "Correlation outcome recorded");
    }

    /// Combinations with at least `min_samples` attempts, best hit rate first.
    pub async fn significant(&self, min_samples: u64) -> Vec<(String, CorrelationStats)> {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);

        let mut rows: Vec<(String, CorrelationStats)> = data
            .correlations
            .iter()
            .filter(|(_, stats)| stats.attempts >= min_samples)
            .map(|(key, stats)| (key.clone(), *stats))
            .collect();
        rows.sort_by(|a, b| {
            b.1.hit_rate()
                .partial_cmp(&a.1.hit_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows
    }

    /// Top performing combinations: (key, hit rate, attempts).
    pub async fn top(&self, count: usize) -> Vec<(String, f64, u64)> {
        self.significant(TOP_MIN_SAMPLES)
            .await
            .into_iter()
            .take(count)
            .map(|(key, stats)| (key, stats.hit_rate(), stats.attempts))
            .collect()
    }

    fn ensure_loaded<'a>(&self, guard: &'a mut Option<CorrelationData>) -> &'a mut CorrelationData {
        guard.get_or_insert_with(|| self.store.load(CORRELATIONS))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
