//! Thread lifecycle: Created -> Running -> Finished -> Joined.
//!
//! The native backend owns the OS thread; this module owns the shared
//! control block both sides update and the transition table that says which
//! moves are legal. Threads are always joined, never detached or killed, so
//! `Joined` is the only terminal state.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Handle returned, trampoline not yet entered.
pub const THREAD_CREATED: u32 = 0;
/// Trampoline is running the thread function.
pub const THREAD_RUNNING: u32 = 1;
/// Thread function returned (or unwound); OS thread may still be exiting.
pub const THREAD_FINISHED: u32 = 2;
/// Joined; OS resources released.
pub const THREAD_JOINED: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    Created,
    Running,
    Finished,
    Joined,
}

impl ThreadState {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            THREAD_CREATED => Some(Self::Created),
            THREAD_RUNNING => Some(Self::Running),
            THREAD_FINISHED => Some(Self::Finished),
            THREAD_JOINED => Some(Self::Joined),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Created => THREAD_CREATED,
            Self::Running => THREAD_RUNNING,
            Self::Finished => THREAD_FINISHED,
            Self::Joined => THREAD_JOINED,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Joined => "joined",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Joined)
    }
}

/// Events that move a thread through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOp {
    /// Trampoline entered.
    Start,
    /// Thread function returned.
    Return,
    /// Owner called destroy.
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadOutcome {
    pub next: ThreadState,
    pub errno: i32,
    /// The joiner parks until the thread function returns.
    pub blocks: bool,
}

/// Lifecycle transition table.
#[must_use]
pub const fn thread_transition(state: ThreadState, op: ThreadOp) -> ThreadOutcome {
    use crate::errno::EINVAL;
    match (state, op) {
        (ThreadState::Created, ThreadOp::Start) => ThreadOutcome {
            next: ThreadState::Running,
            errno: 0,
            blocks: false,
        },
        (ThreadState::Running, ThreadOp::Return) => ThreadOutcome {
            next: ThreadState::Finished,
            errno: 0,
            blocks: false,
        },
        (ThreadState::Created | ThreadState::Running, ThreadOp::Join) => ThreadOutcome {
            next: ThreadState::Joined,
            errno: 0,
            blocks: true,
        },
        (ThreadState::Finished, ThreadOp::Join) => ThreadOutcome {
            next: ThreadState::Joined,
            errno: 0,
            blocks: false,
        },
        (s, _) => ThreadOutcome {
            next: s,
            errno: EINVAL,
            blocks: false,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared control block
// ---------------------------------------------------------------------------

/// State shared between a thread's owner and its trampoline.
#[derive(Debug)]
pub struct ThreadControl {
    state: AtomicU32,
    panicked: AtomicBool,
}

impl ThreadControl {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(THREAD_CREATED),
            panicked: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_raw(self.state.load(Ordering::Acquire)).unwrap_or(ThreadState::Joined)
    }

    /// Called by the trampoline before invoking the thread function.
    pub fn mark_running(&self) {
        self.advance(ThreadOp::Start);
    }

    /// Called by the trampoline once the thread function is done.
    pub fn mark_finished(&self, panicked: bool) {
        self.panicked.store(panicked, Ordering::Release);
        self.advance(ThreadOp::Return);
    }

    /// Called by the owner after the native join returned.
    pub fn mark_joined(&self) {
        self.state.store(THREAD_JOINED, Ordering::Release);
    }

    #[must_use]
    pub fn panicked(&self) -> bool {
        self.panicked.load(Ordering::Acquire)
    }

    fn advance(&self, op: ThreadOp) {
        let current = self.state();
        let outcome = thread_transition(current, op);
        debug_assert_eq!(
            outcome.errno,
            0,
            "illegal lifecycle move {op:?} from {}",
            current.as_str()
        );
        if outcome.errno == 0 {
            self.state.store(outcome.next.as_raw(), Ordering::Release);
        }
    }
}

impl Default for ThreadControl {
    fn default() -> Self {
        Self::new()
    }
}
