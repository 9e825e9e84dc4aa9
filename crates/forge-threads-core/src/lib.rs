//! # forge-threads-core
//!
//! Safe building blocks for the forge threading layer.
//!
//! This crate holds everything that does not need to touch a native handle:
//! the lock-free [`AtomicCounter`], the abstract transition contracts for
//! mutexes and threads, the timed-wait deadline math,
//! CPU-count validation, runtime configuration, and the shared error type.
//! No `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod atomic;
pub mod cond;
pub mod config;
pub mod cpu;
pub mod errno;
pub mod error;
pub mod mutex;
pub mod thread;

pub use atomic::AtomicCounter;
pub use cond::{Timespec, TimedWaitVerdict, WaitStatus};
pub use config::{TimedWaitMode, timed_wait_mode};
pub use error::ThreadError;
pub use mutex::MutexKind;
pub use thread::ThreadState;
