//! HINDSIGHT — Continuous calibration feedback loop for trading decisions
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod engine;
pub mod outbox;
pub mod stats;
pub mod storage;
pub mod types;
