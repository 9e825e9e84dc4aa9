//! Recoverable failures surfaced by the threading layer.
//!
//! Precondition violations (releasing an unheld mutex, waiting without the
//! mutex, joining a null handle) are assertions and never appear here.

use thiserror::Error;

use crate::errno::errno_name;

/// Which native primitive failed to initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Mutex,
    ConditionVariable,
    ThreadAttributes,
}

impl Primitive {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::ConditionVariable => "condition variable",
            Self::ThreadAttributes => "thread attributes",
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// The backend refused to start a new thread (usually resource exhaustion).
    #[error("thread spawn failed: errno {errno} ({})", errno_name(*errno))]
    Spawn { errno: i32 },
    #[error("thread join failed: errno {errno} ({})", errno_name(*errno))]
    Join { errno: i32 },
    /// The thread function unwound; the panic was contained at the trampoline.
    #[error("thread function panicked")]
    Panicked,
    /// The logical processor count could not be determined.
    #[error("cpu core count unavailable: query returned {raw}")]
    CpuQuery { raw: i64 },
    #[error("{primitive} init failed: errno {errno} ({})", errno_name(*errno))]
    Init { primitive: Primitive, errno: i32 },
    #[error("clock read failed: errno {errno} ({})", errno_name(*errno))]
    Clock { errno: i32 },
    /// A timed wait failed for a reason other than its deadline passing.
    #[error("condition variable wait failed: errno {errno} ({})", errno_name(*errno))]
    Wait { errno: i32 },
}

impl ThreadError {
    /// Errno carried by the error, when the failure came from the backend.
    #[must_use]
    pub const fn errno(&self) -> Option<i32> {
        match self {
            Self::Spawn { errno }
            | Self::Join { errno }
            | Self::Init { errno, .. }
            | Self::Clock { errno }
            | Self::Wait { errno } => Some(*errno),
            Self::Panicked | Self::CpuQuery { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errno;

    #[test]
    fn spawn_error_names_errno() {
        let err = ThreadError::Spawn {
            errno: errno::EAGAIN,
        };
        assert_eq!(err.to_string(), "thread spawn failed: errno 11 (EAGAIN)");
        assert_eq!(err.errno(), Some(errno::EAGAIN));
    }

    #[test]
    fn init_error_names_primitive() {
        let err = ThreadError::Init {
            primitive: Primitive::ConditionVariable,
            errno: errno::ENOMEM,
        };
        assert_eq!(
            err.to_string(),
            "condition variable init failed: errno 12 (ENOMEM)"
        );
    }

    #[test]
    fn cpu_and_panic_carry_no_errno() {
        assert_eq!(ThreadError::CpuQuery { raw: -1 }.errno(), None);
        assert_eq!(ThreadError::Panicked.errno(), None);
        assert_eq!(
            ThreadError::CpuQuery { raw: -1 }.to_string(),
            "cpu core count unavailable: query returned -1"
        );
    }
}
