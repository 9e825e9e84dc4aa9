//! Timed-wait deadline math and wait results.
//!
//! Timed waits on the POSIX backend take an absolute deadline. The correct
//! deadline is "clock now + timeout". The historical Android backend instead
//! passed `{ tv_sec: 0, tv_nsec: ms * 1000 }`, a moment in 1970, which makes
//! every timed wait return at once. [`legacy_deadline`] reproduces that value
//! for the opt-in compatibility mode; [`absolute_deadline`] is the default.

use core::time::Duration;

use crate::error::ThreadError;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Time values
// ---------------------------------------------------------------------------

/// Seconds + nanoseconds, matching the layout callers hand to `timespec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    #[must_use]
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// `nsec` lies in `[0, 1e9)` and `sec` is non-negative.
    #[must_use]
    pub const fn is_normalized(self) -> bool {
        self.sec >= 0 && self.nsec >= 0 && self.nsec < NANOS_PER_SEC
    }

    /// Time from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_since(self, earlier: Self) -> Duration {
        let total = (i128::from(self.sec) - i128::from(earlier.sec)) * i128::from(NANOS_PER_SEC)
            + (i128::from(self.nsec) - i128::from(earlier.nsec));
        if total <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(u64::try_from(total).unwrap_or(u64::MAX))
        }
    }
}

/// Absolute deadline `timeout_ms` after `now`, with nanosecond carry.
///
/// Seconds saturate instead of overflowing.
#[must_use]
pub const fn absolute_deadline(now: Timespec, timeout_ms: u32) -> Timespec {
    let add_sec = (timeout_ms / 1000) as i64;
    let add_nsec = (timeout_ms % 1000) as i64 * NANOS_PER_MILLI;
    let mut sec = now.sec.saturating_add(add_sec);
    let mut nsec = now.nsec + add_nsec;
    if nsec >= NANOS_PER_SEC {
        nsec -= NANOS_PER_SEC;
        sec = sec.saturating_add(1);
    }
    Timespec { sec, nsec }
}

/// The deadline the historical backend computed: `ms * 1000` nanoseconds
/// past the epoch. Already expired on any real clock, and not even a valid
/// `timespec` once `ms` reaches one million.
#[must_use]
pub const fn legacy_deadline(timeout_ms: u32) -> Timespec {
    Timespec {
        sec: 0,
        nsec: timeout_ms as i64 * 1000,
    }
}

// ---------------------------------------------------------------------------
// Wait results
// ---------------------------------------------------------------------------

/// How a wait on a condition variable ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitStatus {
    /// Woken by `set`/`set_all`, or spuriously.
    Signaled,
    /// The deadline passed first.
    TimedOut,
}

impl WaitStatus {
    #[must_use]
    pub const fn timed_out(self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Map a `pthread_cond_timedwait` return code. Zero is a wakeup, the
    /// host's timeout code is `TimedOut`, and anything else is an error.
    pub const fn from_timedwait_code(code: i32, etimedout: i32) -> Result<Self, ThreadError> {
        if code == 0 {
            Ok(Self::Signaled)
        } else if code == etimedout {
            Ok(Self::TimedOut)
        } else {
            Err(ThreadError::Wait { errno: code })
        }
    }
}

/// Judgement of an unsignaled timed wait's elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedWaitVerdict {
    WithinTolerance,
    /// Returned in well under the requested time. The legacy deadline defect
    /// shows up here.
    ReturnedEarly,
    /// Took an order of magnitude longer than requested.
    Overslept,
}

/// Early returns below this fraction (per mille) of the request are flagged.
pub const EARLY_THRESHOLD_PER_MILLE: u128 = 500;
/// Overruns beyond `requested * LATE_FACTOR + LATE_SLACK` are flagged.
pub const LATE_FACTOR: u128 = 10;
pub const LATE_SLACK: Duration = Duration::from_millis(250);

/// Compare the elapsed time of a timed wait that saw no signal against the
/// requested timeout. Scheduler slack is tolerated; gross deviation is not.
#[must_use]
pub fn classify_timed_wait(requested_ms: u32, elapsed: Duration) -> TimedWaitVerdict {
    let requested = Duration::from_millis(u64::from(requested_ms));
    let early_floor_ns = requested.as_nanos() * EARLY_THRESHOLD_PER_MILLE / 1000;
    if elapsed.as_nanos() < early_floor_ns {
        return TimedWaitVerdict::ReturnedEarly;
    }
    let late_ceiling_ns = requested.as_nanos() * LATE_FACTOR + LATE_SLACK.as_nanos();
    if elapsed.as_nanos() > late_ceiling_ns {
        return TimedWaitVerdict::Overslept;
    }
    TimedWaitVerdict::WithinTolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno;

    #[test]
    fn deadline_adds_whole_seconds_and_millis() {
        let now = Timespec::new(100, 250_000_000);
        assert_eq!(absolute_deadline(now, 1_500), Timespec::new(101, 750_000_000));
        assert_eq!(absolute_deadline(now, 0), now);
    }

    #[test]
    fn deadline_carries_nanoseconds() {
        let now = Timespec::new(5, 900_000_000);
        let deadline = absolute_deadline(now, 200);
        assert_eq!(deadline, Timespec::new(6, 100_000_000));
        assert!(deadline.is_normalized());
    }

    #[test]
    fn deadline_saturates_seconds() {
        let now = Timespec::new(i64::MAX, 999_999_999);
        let deadline = absolute_deadline(now, u32::MAX);
        assert_eq!(deadline.sec, i64::MAX);
        assert!(deadline.nsec < NANOS_PER_SEC);
    }

    #[test]
    fn legacy_deadline_is_in_the_distant_past() {
        let deadline = legacy_deadline(250);
        assert_eq!(deadline, Timespec::new(0, 250_000));
        assert!(deadline.is_normalized());
        // Any real clock reading is already past it.
        assert_eq!(deadline.saturating_since(Timespec::new(1_700_000_000, 0)), Duration::ZERO);
    }

    #[test]
    fn legacy_deadline_stops_being_a_valid_timespec() {
        assert!(legacy_deadline(999_999).is_normalized());
        assert!(!legacy_deadline(1_000_000).is_normalized());
    }

    #[test]
    fn saturating_since_measures_forward_gaps() {
        let a = Timespec::new(10, 900_000_000);
        let b = Timespec::new(11, 100_000_000);
        assert_eq!(b.saturating_since(a), Duration::from_millis(200));
        assert_eq!(a.saturating_since(b), Duration::ZERO);
    }

    #[test]
    fn timedwait_code_mapping() {
        assert_eq!(
            WaitStatus::from_timedwait_code(errno::ETIMEDOUT, errno::ETIMEDOUT),
            Ok(WaitStatus::TimedOut)
        );
        assert_eq!(
            WaitStatus::from_timedwait_code(0, errno::ETIMEDOUT),
            Ok(WaitStatus::Signaled)
        );
        assert_eq!(
            WaitStatus::from_timedwait_code(errno::EINVAL, errno::ETIMEDOUT),
            Err(ThreadError::Wait {
                errno: errno::EINVAL
            })
        );
        assert!(WaitStatus::TimedOut.timed_out());
        assert!(!WaitStatus::Signaled.timed_out());
    }

    #[test]
    fn classify_tolerates_scheduler_slack() {
        assert_eq!(
            classify_timed_wait(50, Duration::from_millis(50)),
            TimedWaitVerdict::WithinTolerance
        );
        assert_eq!(
            classify_timed_wait(50, Duration::from_millis(95)),
            TimedWaitVerdict::WithinTolerance
        );
        assert_eq!(
            classify_timed_wait(0, Duration::from_micros(30)),
            TimedWaitVerdict::WithinTolerance
        );
    }

    #[test]
    fn classify_flags_legacy_early_return() {
        // What the ms-as-ns defect looks like from the outside.
        assert_eq!(
            classify_timed_wait(100, Duration::from_micros(40)),
            TimedWaitVerdict::ReturnedEarly
        );
    }

    #[test]
    fn classify_flags_gross_overrun() {
        assert_eq!(
            classify_timed_wait(10, Duration::from_secs(2)),
            TimedWaitVerdict::Overslept
        );
    }
}
