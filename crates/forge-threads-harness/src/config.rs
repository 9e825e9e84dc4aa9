//! Stress run configuration.
//!
//! Resolution order: built-in defaults, then `FORGE_THREADS_STRESS_*`
//! environment variables, then explicit overrides (CLI flags).

use std::path::PathBuf;

use serde::Serialize;

use forge_threads_core::{MutexKind, TimedWaitMode, timed_wait_mode};

use crate::error::HarnessError;

pub const THREADS_ENV: &str = "FORGE_THREADS_STRESS_THREADS";
pub const ITERATIONS_ENV: &str = "FORGE_THREADS_STRESS_ITERATIONS";
pub const TIMED_WAIT_MS_ENV: &str = "FORGE_THREADS_STRESS_TIMED_WAIT_MS";
pub const SAMPLES_ENV: &str = "FORGE_THREADS_STRESS_SAMPLES";
pub const OUT_DIR_ENV: &str = "FORGE_THREADS_STRESS_OUT_DIR";
pub const MUTEX_KIND_ENV: &str = "FORGE_THREADS_STRESS_MUTEX_KIND";

/// Upper bound on worker threads per scenario.
pub const MAX_THREADS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StressConfig {
    /// Worker threads per scenario.
    pub threads: usize,
    /// Operations per worker.
    pub iterations: u32,
    /// Timeout requested by each timed-wait sample.
    pub timed_wait_ms: u32,
    /// Number of timed-wait samples.
    pub samples: u32,
    #[serde(serialize_with = "serialize_mode")]
    pub timed_wait_mode: TimedWaitMode,
    /// Kind of the mutex contended in `mutex-handoff`.
    #[serde(serialize_with = "serialize_kind")]
    pub mutex_kind: MutexKind,
    pub out_dir: PathBuf,
}

fn serialize_mode<S: serde::Serializer>(mode: &TimedWaitMode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(mode.as_str())
}

fn serialize_kind<S: serde::Serializer>(kind: &MutexKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.as_str())
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 10_000,
            timed_wait_ms: 20,
            samples: 5,
            timed_wait_mode: TimedWaitMode::Deadline,
            mutex_kind: MutexKind::Normal,
            out_dir: PathBuf::from("target/stress"),
        }
    }
}

impl StressConfig {
    /// Defaults overlaid with the process environment. The timed-wait mode
    /// follows the library's own configuration.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_lookup(|key| std::env::var(key).ok())
            .map(|cfg| cfg.with_timed_wait_mode(timed_wait_mode()))
    }

    /// Defaults overlaid with values from `lookup` (an environment stand-in).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, HarnessError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup(THREADS_ENV) {
            cfg.threads = parse_bounded(THREADS_ENV, &v, 1, MAX_THREADS as u64)? as usize;
        }
        if let Some(v) = lookup(ITERATIONS_ENV) {
            cfg.iterations = parse_bounded(ITERATIONS_ENV, &v, 1, u64::from(u32::MAX))? as u32;
        }
        if let Some(v) = lookup(TIMED_WAIT_MS_ENV) {
            cfg.timed_wait_ms = parse_bounded(TIMED_WAIT_MS_ENV, &v, 1, 60_000)? as u32;
        }
        if let Some(v) = lookup(SAMPLES_ENV) {
            cfg.samples = parse_bounded(SAMPLES_ENV, &v, 1, 10_000)? as u32;
        }
        if let Some(v) = lookup(MUTEX_KIND_ENV) {
            cfg.mutex_kind = parse_mutex_kind(MUTEX_KIND_ENV, &v)?;
        }
        if let Some(v) = lookup(OUT_DIR_ENV)
            && !v.trim().is_empty()
        {
            cfg.out_dir = PathBuf::from(v.trim());
        }
        Ok(cfg)
    }

    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.clamp(1, MAX_THREADS);
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    #[must_use]
    pub fn with_timed_wait_ms(mut self, ms: u32) -> Self {
        self.timed_wait_ms = ms.max(1);
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    #[must_use]
    pub fn with_timed_wait_mode(mut self, mode: TimedWaitMode) -> Self {
        self.timed_wait_mode = mode;
        self
    }

    #[must_use]
    pub fn with_mutex_kind(mut self, kind: MutexKind) -> Self {
        self.mutex_kind = kind;
        self
    }

    #[must_use]
    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }
}

/// Parse a mutex kind name, naming `var` in the error.
pub fn parse_mutex_kind(var: &'static str, raw: &str) -> Result<MutexKind, HarnessError> {
    MutexKind::parse(raw.trim()).ok_or_else(|| HarnessError::InvalidConfig {
        var,
        value: raw.to_string(),
        expected: "mutex kind (normal, recursive, errorcheck)",
    })
}

fn parse_bounded(var: &'static str, raw: &str, min: u64, max: u64) -> Result<u64, HarnessError> {
    let invalid = || HarnessError::InvalidConfig {
        var,
        value: raw.to_string(),
        expected: "integer in range",
    };
    let v: u64 = raw.trim().parse().map_err(|_| invalid())?;
    if v < min || v > max {
        return Err(invalid());
    }
    Ok(v)
}
