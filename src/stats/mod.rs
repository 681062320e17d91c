//! Statistical aggregators fed by the outcome evaluator.
//!
//! Each aggregator owns one persisted dataset and can be read
//! independently by reporting consumers.

pub mod anomaly;
pub mod calibration;
pub mod correlation;
pub mod temporal;
