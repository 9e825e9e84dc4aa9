//! Runtime configuration.
//!
//! The timed-wait deadline policy is set via the `FORGE_THREADS_TIMED_WAIT`
//! environment variable:
//! - `deadline` (default): timed waits block until "now + timeout" on the
//!   condition variable's clock.
//! - `legacy`: reproduce the historical backend, which handed
//!   `pthread_cond_timedwait` an epoch-relative `ms * 1000` ns deadline and so
//!   returned immediately. Only for bit-compatible replays of old behavior.

use core::sync::atomic::{AtomicU8, Ordering};

/// Environment variable consulted on first use.
pub const TIMED_WAIT_ENV: &str = "FORGE_THREADS_TIMED_WAIT";

/// How `wait_timeout` turns milliseconds into a backend deadline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimedWaitMode {
    /// Absolute deadline from the current clock reading.
    #[default]
    Deadline,
    /// Historical `{0 s, ms * 1000 ns}` deadline.
    LegacyEpoch,
}

impl TimedWaitMode {
    /// Parse from string (case-insensitive). Unknown values select `Deadline`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "legacy-epoch" | "legacy_epoch" | "compat" => Self::LegacyEpoch,
            _ => Self::Deadline,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deadline => "deadline",
            Self::LegacyEpoch => "legacy",
        }
    }
}

// Atomic cache: 0=unresolved, 1=Deadline, 2=LegacyEpoch, 255=resolving.
static CACHED_MODE: AtomicU8 = AtomicU8::new(0);

const MODE_UNRESOLVED: u8 = 0;
const MODE_DEADLINE: u8 = 1;
const MODE_LEGACY: u8 = 2;
const MODE_RESOLVING: u8 = 255;

fn mode_to_u8(mode: TimedWaitMode) -> u8 {
    match mode {
        TimedWaitMode::Deadline => MODE_DEADLINE,
        TimedWaitMode::LegacyEpoch => MODE_LEGACY,
    }
}

fn u8_to_mode(v: u8) -> TimedWaitMode {
    match v {
        MODE_LEGACY => TimedWaitMode::LegacyEpoch,
        _ => TimedWaitMode::Deadline,
    }
}

/// Configured timed-wait mode (reads the environment once, then cached).
///
/// Threads racing the first resolution see `Deadline` until the winner
/// publishes the parsed value.
#[must_use]
pub fn timed_wait_mode() -> TimedWaitMode {
    let cached = CACHED_MODE.load(Ordering::Acquire);
    if cached != MODE_UNRESOLVED && cached != MODE_RESOLVING {
        return u8_to_mode(cached);
    }
    if cached == MODE_RESOLVING {
        return TimedWaitMode::Deadline;
    }

    if CACHED_MODE
        .compare_exchange(
            MODE_UNRESOLVED,
            MODE_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_MODE.load(Ordering::Acquire);
        return if v != MODE_UNRESOLVED && v != MODE_RESOLVING {
            u8_to_mode(v)
        } else {
            TimedWaitMode::Deadline
        };
    }

    let mode = std::env::var(TIMED_WAIT_ENV)
        .map(|v| TimedWaitMode::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_MODE.store(mode_to_u8(mode), Ordering::Release);
    mode
}

/// Pin the process-wide mode, bypassing the environment.
///
/// Intended for startup code and harness runs that replay legacy behavior.
pub fn set_timed_wait_mode(mode: TimedWaitMode) {
    CACHED_MODE.store(mode_to_u8(mode), Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!(TimedWaitMode::from_str_loose("deadline"), TimedWaitMode::Deadline);
        assert_eq!(TimedWaitMode::from_str_loose("LEGACY"), TimedWaitMode::LegacyEpoch);
        assert_eq!(TimedWaitMode::from_str_loose(" compat "), TimedWaitMode::LegacyEpoch);
        assert_eq!(
            TimedWaitMode::from_str_loose("legacy-epoch"),
            TimedWaitMode::LegacyEpoch
        );
        assert_eq!(TimedWaitMode::from_str_loose("bogus"), TimedWaitMode::Deadline);
        assert_eq!(TimedWaitMode::from_str_loose(""), TimedWaitMode::Deadline);
    }

    #[test]
    fn default_is_deadline() {
        assert_eq!(TimedWaitMode::default(), TimedWaitMode::Deadline);
    }

    #[test]
    fn names_round_trip_through_parser() {
        for mode in [TimedWaitMode::Deadline, TimedWaitMode::LegacyEpoch] {
            assert_eq!(TimedWaitMode::from_str_loose(mode.as_str()), mode);
        }
    }

    // One test owns the process-wide cache so no other test interleaves with it.
    #[test]
    fn cached_mode_transitions() {
        let previous = CACHED_MODE.swap(MODE_RESOLVING, Ordering::SeqCst);
        assert_eq!(timed_wait_mode(), TimedWaitMode::Deadline);

        CACHED_MODE.store(MODE_DEADLINE, Ordering::SeqCst);
        assert_eq!(timed_wait_mode(), TimedWaitMode::Deadline);

        set_timed_wait_mode(TimedWaitMode::LegacyEpoch);
        assert_eq!(timed_wait_mode(), TimedWaitMode::LegacyEpoch);
        assert_eq!(timed_wait_mode(), TimedWaitMode::LegacyEpoch);

        CACHED_MODE.store(previous, Ordering::SeqCst);
    }
}
