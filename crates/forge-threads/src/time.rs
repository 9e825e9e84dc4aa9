//! Clock reads and `timespec` conversion shared by timed waits and sleep.

use forge_threads_core::ThreadError;
use forge_threads_core::cond::Timespec;

/// Errno left by the last failed libc call on this thread.
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

pub(crate) fn to_native(ts: Timespec) -> libc::timespec {
    // SAFETY: timespec is plain integers; all-zero is a valid value and
    // covers targets that add padding fields.
    let mut native: libc::timespec = unsafe { core::mem::zeroed() };
    native.tv_sec = ts.sec as libc::time_t;
    native.tv_nsec = ts.nsec as libc::c_long;
    native
}

pub(crate) fn from_native(native: &libc::timespec) -> Timespec {
    Timespec::new(i64::from(native.tv_sec), i64::from(native.tv_nsec))
}

/// Current reading of `clock`.
pub(crate) fn clock_now(clock: libc::clockid_t) -> Result<Timespec, ThreadError> {
    // SAFETY: see `to_native`.
    let mut native: libc::timespec = unsafe { core::mem::zeroed() };
    // SAFETY: `native` is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::clock_gettime(clock, &mut native) };
    if rc != 0 {
        return Err(ThreadError::Clock {
            errno: last_errno(),
        });
    }
    Ok(from_native(&native))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_advances() {
        let a = clock_now(libc::CLOCK_MONOTONIC).unwrap();
        let b = clock_now(libc::CLOCK_MONOTONIC).unwrap();
        assert!(a.is_normalized());
        assert!(b >= a);
    }

    #[test]
    fn native_conversion_preserves_fields() {
        let ts = Timespec::new(12, 345_678_901);
        assert_eq!(from_native(&to_native(ts)), ts);
    }

    #[test]
    fn invalid_clock_is_reported() {
        let err = clock_now(1_000 as libc::clockid_t).unwrap_err();
        assert!(matches!(err, ThreadError::Clock { errno } if errno == libc::EINVAL));
    }
}
