//! Stress harness for the forge threading primitives.
//!
//! This crate provides:
//! - Scenarios: concurrent workloads that check each primitive's observable
//!   guarantees (no lost updates, exclusion, wakeup delivery, timed-wait
//!   accuracy, join visibility, thread identity, CPU query).
//! - A runner that executes scenarios and builds a machine-readable report.
//! - Structured JSONL evidence with an artifact index carrying SHA-256
//!   digests of every file a run produces.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod runner;
pub mod scenarios;
pub mod structured_log;

pub use config::StressConfig;
pub use error::HarnessError;
pub use runner::{StressReport, StressRunner};
pub use scenarios::{Scenario, ScenarioResult};
