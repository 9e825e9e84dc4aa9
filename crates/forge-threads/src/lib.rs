//! # forge-threads
//!
//! Thread, mutex, and condition variable primitives over POSIX threads.
//!
//! The native handles live behind owning wrappers: a [`Mutex`] or
//! [`ConditionVariable`] releases its handle on drop, and a [`ThreadHandle`]
//! joins its thread on drop if [`destroy_thread`] was never called.
//! Contracts, the lock-free [`AtomicCounter`], and the error type come from
//! `forge-threads-core` and are re-exported here.
#![cfg(unix)]

pub mod cond;
pub mod identity;
pub mod mutex;
pub mod thread;
mod time;

pub use cond::ConditionVariable;
pub use forge_threads_core::{
    AtomicCounter, MutexKind, ThreadError, ThreadState, TimedWaitMode, WaitStatus,
};
pub use identity::{
    MainThreadRegistry, ThreadId, current_thread_id, is_main_thread, main_thread_id,
    set_main_thread,
};
pub use mutex::{Mutex, MutexGuard};
pub use thread::{
    Builder, ThreadDesc, ThreadFn, ThreadHandle, create_thread, destroy_thread, num_cpu_cores,
    sleep_ms, spawn,
};
