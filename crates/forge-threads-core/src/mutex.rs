//! Mutex kinds and the abstract acquire/release contract.
//!
//! The native backend wraps a `pthread_mutex_t`; this module describes what
//! each operation is allowed to do from each abstract state so tests and the
//! stress harness can check observed behavior against one table.

use crate::errno;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Locking discipline of a native mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MutexKind {
    /// POSIX default. Relocking from the owner deadlocks.
    #[default]
    Normal,
    /// The owner may relock; each acquire needs a matching release.
    Recursive,
    /// Relocking from the owner is reported instead of deadlocking.
    ErrorCheck,
}

impl MutexKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Recursive => "recursive",
            Self::ErrorCheck => "errorcheck",
        }
    }

    /// Parse a kind name (case-insensitive). Unknown names yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "default" => Some(Self::Normal),
            "recursive" => Some(Self::Recursive),
            "errorcheck" | "error-check" | "errorchecking" => Some(Self::ErrorCheck),
            _ => None,
        }
    }

    /// Whether the owning thread may acquire again without blocking.
    #[must_use]
    pub const fn is_reentrant(self) -> bool {
        matches!(self, Self::Recursive)
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Abstract mutex state as seen from the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    Unlocked,
    /// Held by the calling thread.
    HeldBySelf,
    /// Held by some other thread.
    HeldByOther,
    /// Native handle released; any further use is invalid.
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexOp {
    Acquire,
    TryAcquire,
    Release,
    Destroy,
}

/// Result of applying one operation from one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexOutcome {
    pub next: MutexState,
    /// Errno-style result, 0 on success.
    pub errno: i32,
    /// The caller parks until another thread makes progress.
    pub blocks: bool,
    /// The operation breaks a documented precondition.
    pub precondition_violation: bool,
}

impl MutexOutcome {
    const fn ok(next: MutexState) -> Self {
        Self {
            next,
            errno: 0,
            blocks: false,
            precondition_violation: false,
        }
    }

    const fn blocked(next: MutexState) -> Self {
        Self {
            next,
            errno: 0,
            blocks: true,
            precondition_violation: false,
        }
    }

    const fn rejected(next: MutexState, errno: i32) -> Self {
        Self {
            next,
            errno,
            blocks: false,
            precondition_violation: false,
        }
    }

    const fn violation(next: MutexState, errno: i32) -> Self {
        Self {
            next,
            errno,
            blocks: false,
            precondition_violation: true,
        }
    }
}

/// Transition table for all three kinds.
///
/// Self-deadlock of a `Normal` mutex is reported as `blocks` with no errno:
/// the backend preserves the deadlock rather than detecting it.
#[must_use]
pub const fn mutex_transition(kind: MutexKind, state: MutexState, op: MutexOp) -> MutexOutcome {
    match state {
        MutexState::Destroyed => MutexOutcome::violation(MutexState::Destroyed, errno::EINVAL),
        MutexState::Unlocked => match op {
            MutexOp::Acquire | MutexOp::TryAcquire => MutexOutcome::ok(MutexState::HeldBySelf),
            MutexOp::Release => MutexOutcome::violation(MutexState::Unlocked, errno::EPERM),
            MutexOp::Destroy => MutexOutcome::ok(MutexState::Destroyed),
        },
        MutexState::HeldByOther => match op {
            // Ownership passes to the caller once the holder releases.
            MutexOp::Acquire => MutexOutcome::blocked(MutexState::HeldBySelf),
            MutexOp::TryAcquire => MutexOutcome::rejected(MutexState::HeldByOther, errno::EBUSY),
            MutexOp::Release => MutexOutcome::violation(MutexState::HeldByOther, errno::EPERM),
            MutexOp::Destroy => MutexOutcome::violation(MutexState::HeldByOther, errno::EBUSY),
        },
        MutexState::HeldBySelf => match op {
            MutexOp::Release => MutexOutcome::ok(MutexState::Unlocked),
            MutexOp::Destroy => MutexOutcome::violation(MutexState::HeldBySelf, errno::EBUSY),
            MutexOp::TryAcquire => match kind {
                MutexKind::Recursive => MutexOutcome::ok(MutexState::HeldBySelf),
                MutexKind::Normal | MutexKind::ErrorCheck => {
                    MutexOutcome::rejected(MutexState::HeldBySelf, errno::EBUSY)
                }
            },
            MutexOp::Acquire => match kind {
                MutexKind::Recursive => MutexOutcome::ok(MutexState::HeldBySelf),
                MutexKind::ErrorCheck => {
                    MutexOutcome::violation(MutexState::HeldBySelf, errno::EDEADLK)
                }
                MutexKind::Normal => MutexOutcome::blocked(MutexState::HeldBySelf),
            },
        },
    }
}

/// Fairness statement for the pthread-backed mutex.
#[must_use]
pub const fn mutex_fairness_note() -> &'static str {
    "Acquisition order is decided by the OS scheduler. No FIFO or starvation-freedom \
guarantee is made beyond what the pthread implementation provides."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_kind_is_normal_and_not_reentrant() {
        assert_eq!(MutexKind::default(), MutexKind::Normal);
        assert!(!MutexKind::Normal.is_reentrant());
        assert!(MutexKind::Recursive.is_reentrant());
        assert!(!MutexKind::ErrorCheck.is_reentrant());
    }

    #[test]
    fn parse_kind_names() {
        assert_eq!(MutexKind::parse("NORMAL"), Some(MutexKind::Normal));
        assert_eq!(MutexKind::parse("recursive"), Some(MutexKind::Recursive));
        assert_eq!(MutexKind::parse("error-check"), Some(MutexKind::ErrorCheck));
        assert_eq!(MutexKind::parse("spin"), None);
        for kind in [MutexKind::Normal, MutexKind::Recursive, MutexKind::ErrorCheck] {
            assert_eq!(MutexKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn normal_relock_blocks_forever() {
        let out = mutex_transition(MutexKind::Normal, MutexState::HeldBySelf, MutexOp::Acquire);
        assert!(out.blocks);
        assert_eq!(out.errno, 0);
        assert!(!out.precondition_violation);
    }

    #[test]
    fn errorcheck_relock_is_edeadlk_violation() {
        let out = mutex_transition(
            MutexKind::ErrorCheck,
            MutexState::HeldBySelf,
            MutexOp::Acquire,
        );
        assert_eq!(out.errno, errno::EDEADLK);
        assert!(out.precondition_violation);
        assert!(!out.blocks);
    }

    #[test]
    fn recursive_relock_succeeds() {
        let out = mutex_transition(
            MutexKind::Recursive,
            MutexState::HeldBySelf,
            MutexOp::Acquire,
        );
        assert_eq!(out, MutexOutcome::ok(MutexState::HeldBySelf));
    }

    #[test]
    fn contended_acquire_blocks_then_owns() {
        let out = mutex_transition(MutexKind::Normal, MutexState::HeldByOther, MutexOp::Acquire);
        assert!(out.blocks);
        assert_eq!(out.next, MutexState::HeldBySelf);
    }

    #[test]
    fn try_acquire_contended_is_ebusy() {
        let out = mutex_transition(
            MutexKind::Normal,
            MutexState::HeldByOther,
            MutexOp::TryAcquire,
        );
        assert_eq!(out.errno, errno::EBUSY);
        assert_eq!(out.next, MutexState::HeldByOther);
    }

    #[test]
    fn release_without_holding_is_violation() {
        for state in [MutexState::Unlocked, MutexState::HeldByOther] {
            let out = mutex_transition(MutexKind::Normal, state, MutexOp::Release);
            assert!(out.precondition_violation, "{state:?}");
            assert_eq!(out.errno, errno::EPERM);
        }
    }

    #[test]
    fn destroy_only_when_unlocked() {
        let ok = mutex_transition(MutexKind::Normal, MutexState::Unlocked, MutexOp::Destroy);
        assert_eq!(ok.next, MutexState::Destroyed);
        let held = mutex_transition(MutexKind::Normal, MutexState::HeldBySelf, MutexOp::Destroy);
        assert!(held.precondition_violation);
        assert_eq!(held.errno, errno::EBUSY);
    }

    #[test]
    fn destroyed_rejects_everything() {
        for op in [
            MutexOp::Acquire,
            MutexOp::TryAcquire,
            MutexOp::Release,
            MutexOp::Destroy,
        ] {
            let out = mutex_transition(MutexKind::Recursive, MutexState::Destroyed, op);
            assert_eq!(out.next, MutexState::Destroyed);
            assert_eq!(out.errno, errno::EINVAL);
        }
    }

    #[test]
    fn fairness_note_disclaims_fifo() {
        assert!(mutex_fairness_note().contains("FIFO"));
    }
}
