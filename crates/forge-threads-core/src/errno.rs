//! Errno values used by the contract tables.
//!
//! These mirror the Linux numbering. The native backend compares against the
//! host's `libc` constants; the values here only label abstract outcomes.

pub const EPERM: i32 = 1;
pub const ESRCH: i32 = 3;
pub const EINTR: i32 = 4;
pub const EAGAIN: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
pub const EDEADLK: i32 = 35;
pub const ETIMEDOUT: i32 = 110;

/// Symbolic name for an errno value, or `"UNKNOWN"`.
#[must_use]
pub const fn errno_name(errno: i32) -> &'static str {
    match errno {
        0 => "OK",
        EPERM => "EPERM",
        ESRCH => "ESRCH",
        EINTR => "EINTR",
        EAGAIN => "EAGAIN",
        ENOMEM => "ENOMEM",
        EBUSY => "EBUSY",
        EINVAL => "EINVAL",
        EDEADLK => "EDEADLK",
        ETIMEDOUT => "ETIMEDOUT",
        _ => "UNKNOWN",
    }
}
