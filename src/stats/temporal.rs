//! Temporal analyzer.
//!
//! Learns time-of-day/week/month patterns in module performance, bucketed
//! in the decision symbol's market-local time. "Mondays are weak for the
//! momentum module", "month-end boosts the flow module", and so on.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::{JsonStore, TEMPORAL};

/// Minimum attempts in a specific bucket before it can be flagged.
const MIN_BUCKET_SAMPLES: u64 = 10;
/// Minimum attempts in a weekday bucket for best/worst day insights.
const MIN_DAY_SAMPLES: u64 = 5;

// ---------------------------------------------------------------------------
// Market timezone resolution
// ---------------------------------------------------------------------------

/// Istanbul-exchange symbols carry the ".IS" suffix; everything else is
/// treated as a New York listing.
fn market_timezone(symbol: &str) -> Tz {
    let upper = symbol.to_uppercase();
    if upper.ends_with(".IS") || upper.contains("BIST") {
        chrono_tz::Europe::Istanbul
    } else {
        chrono_tz::America::New_York
    }
}

fn weekday_name(ts: &DateTime<Tz>) -> &'static str {
    match ts.weekday() {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

fn month_name(ts: &DateTime<Tz>) -> &'static str {
    match ts.month() {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        _ => "December",
    }
}

/// 1-based week of month: days 1–7 are week 1, 8–14 week 2, and so on.
fn week_of_month(ts: &DateTime<Tz>) -> u32 {
    (ts.day() - 1) / 7 + 1
}

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeSlotStats {
    pub attempts: u64,
    pub correct: u64,
}

impl TimeSlotStats {
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

/// Bucket value → module → counters, for one dimension.
pub type DimensionStats = HashMap<String, HashMap<String, TimeSlotStats>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalData {
    pub day_of_week: DimensionStats,
    pub hour_of_day: DimensionStats,
    pub month_of_year: DimensionStats,
    pub week_of_month: DimensionStats,
    pub last_updated: DateTime<Utc>,
}

impl Default for TemporalData {
    fn default() -> Self {
        Self {
            day_of_week: DimensionStats::new(),
            hour_of_day: DimensionStats::new(),
            month_of_year: DimensionStats::new(),
            week_of_month: DimensionStats::new(),
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDimension {
    DayOfWeek,
    HourOfDay,
    MonthOfYear,
    WeekOfMonth,
}

impl TimeDimension {
    pub const ALL: &'static [TimeDimension] = &[
        TimeDimension::DayOfWeek,
        TimeDimension::HourOfDay,
        TimeDimension::MonthOfYear,
        TimeDimension::WeekOfMonth,
    ];
}

/// A time bucket where a module's hit rate deviates from its own
/// cross-bucket average.
#[derive(Debug, Clone, Serialize)]
pub struct TemporalAnomaly {
    pub dimension: TimeDimension,
    pub bucket: String,
    pub module: String,
    /// Signed: positive means stronger than the module's average.
    pub deviation: f64,
    pub hit_rate: f64,
    pub samples: u64,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Owns the temporal dataset.
pub struct TemporalAnalyzer {
    store: JsonStore,
    data: Mutex<Option<TemporalData>>,
}

impl TemporalAnalyzer {
    pub fn new(store: JsonStore) -> Self {
        Self {
            store,
            data: Mutex::new(None),
        }
    }

    /// Record one outcome into all four dimensions simultaneously, using
    /// the symbol's market-local clock for weekday and hour.
    pub async fn record_outcome(
        &self,
        module: &str,
        correct: bool,
        timestamp: DateTime<Utc>,
        symbol: &str,
    ) {
        let local = timestamp.with_timezone(&market_timezone(symbol));
        let weekday = weekday_name(&local).to_string();
        let hour = format!("{:02}", local.hour());
        let month = month_name(&local).to_string();
        let week = week_of_month(&local).to_string();

        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);

        for (dimension, bucket) in [
            (&mut data.day_of_week, weekday),
            (&mut data.hour_of_day, hour),
            (&mut data.month_of_year, month),
            (&mut data.week_of_month, week),
        ] {
            dimension
                .entry(bucket)
                .or_default()
                .entry(module.to_string())
                .or_default()
                .record(correct);
        }

        data.last_updated = Utc::now();
        self.store.save(TEMPORAL, data);

        debug!(module, symbol, correct, "Temporal outcome recorded");
    }

    /// Buckets where a module's local hit rate deviates from its grand
    /// average across that dimension by at least `threshold`, sorted by
    /// deviation magnitude. Buckets with fewer than 10 attempts are
    /// ignored.
    pub async fn temporal_anomalies(&self, threshold: f64) -> Vec<TemporalAnomaly> {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);

        let mut anomalies = Vec::new();
        for dimension in TimeDimension::ALL {
            let stats = dimension_of(data, *dimension);
            collect_dimension_anomalies(stats, *dimension, threshold, &mut anomalies);
        }

        anomalies.sort_by(|a, b| {
            b.deviation
                .abs()
                .partial_cmp(&a.deviation.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        anomalies
    }

    /// Best and worst weekday for a module, when at least two weekdays
    /// have enough samples to compare.
    pub async fn day_insights(&self, module: &str) -> Option<(String, String)> {
        let mut guard = self.data.lock().await;
        let data = self.ensure_loaded(&mut guard);

        let mut days: Vec<(String, f64)> = data
            .day_of_week
            .iter()
            .filter_map(|(day, modules)| {
                let stats = modules.get(module)?;
                if stats.attempts < MIN_DAY_SAMPLES {
                    return None;
                }
                Some((day.clone(), stats.hit_rate()))
            })
            .collect();

        if days.len() < 2 {
            return None;
        }
        days.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Some((days.first()?.0.clone(), days.last()?.0.clone()))
    }

    fn ensure_loaded<'a>(&self, guard: &'a mut Option<TemporalData>) -> &'a mut TemporalData {
        guard.get_or_insert_with(|| self.store.load(TEMPORAL))
    }
}

fn dimension_of(data: &TemporalData, dimension: TimeDimension) -> &DimensionStats {
    match dimension {
        TimeDimension::DayOfWeek => &data.day_of_week,
        TimeDimension::HourOfDay => &data.hour_of_day,
        TimeDimension::MonthOfYear => &data.month_of_year,
        TimeDimension::WeekOfMonth => &data.week_of_month,
    }
}

fn collect_dimension_anomalies(
    stats: &DimensionStats,
    dimension: TimeDimension,
    threshold: f64,
    out: &mut Vec<TemporalAnomaly>,
) {
    for (bucket, modules) in stats {
        for (module, slot) in modules {
            if slot.attempts < MIN_BUCKET_SAMPLES {
                continue;
            }

            // Grand average for this module across every bucket of the
            // dimension, weighted by attempts.
            let (total_attempts, total_correct) = stats
                .values()
                .filter_map(|m| m.get(module))
                .fold((0u64, 0u64), |(a, c), s| (a + s.attempts, c + s.correct));
            let avg_rate = if total_attempts > 0 {
                total_correct as f64 / total_attempts as f64
            } else {
                0.5
            };

            let deviation = slot.hit_rate() - avg_rate;
            if deviation.abs() >= threshold {
                out.push(TemporalAnomaly {
                    dimension,
                    bucket: bucket.clone(),
                    module: module.clone(),
                    deviation,
                    hit_rate: slot.hit_rate(),
                    samples: slot.attempts,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
