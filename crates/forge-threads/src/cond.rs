//! Owning wrapper over `pthread_cond_t`.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use forge_threads_core::cond::{absolute_deadline, legacy_deadline};
use forge_threads_core::error::Primitive;
use forge_threads_core::{ThreadError, TimedWaitMode, WaitStatus, timed_wait_mode};

use crate::mutex::Mutex;
use crate::time;

#[cfg(any(target_os = "linux", target_os = "android"))]
const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const WAIT_CLOCK: libc::clockid_t = libc::CLOCK_REALTIME;

/// Condition variable paired with a [`Mutex`] at each wait.
///
/// Waiters may wake spuriously; re-check the guarded predicate after every
/// return, or use [`ConditionVariable::wait_while`]. Signal while holding the
/// mutex to avoid lost wakeups.
pub struct ConditionVariable {
    handle: Box<UnsafeCell<libc::pthread_cond_t>>,
}

// SAFETY: pthread condition variables are designed for cross-thread use and
// the boxed handle never moves.
unsafe impl Send for ConditionVariable {}
// SAFETY: as above.
unsafe impl Sync for ConditionVariable {}

impl ConditionVariable {
    /// Initialize a condition variable. Timed waits use `CLOCK_MONOTONIC` on
    /// Linux and Android, `CLOCK_REALTIME` elsewhere.
    pub fn new() -> Result<Self, ThreadError> {
        let cond = Self {
            handle: Box::new(UnsafeCell::new(libc::PTHREAD_COND_INITIALIZER)),
        };
        let init_error = |errno| ThreadError::Init {
            primitive: Primitive::ConditionVariable,
            errno,
        };

        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        // SAFETY: attr is initialized before use and destroyed on every path
        // after that; the cond handle is pinned in its box.
        unsafe {
            let rc = libc::pthread_condattr_init(attr.as_mut_ptr());
            if rc != 0 {
                return Err(init_error(rc));
            }
            #[cfg(any(target_os = "linux", target_os = "android"))]
            let mut rc = libc::pthread_condattr_setclock(attr.as_mut_ptr(), WAIT_CLOCK);
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            let mut rc = 0;
            if rc == 0 {
                rc = libc::pthread_cond_init(cond.raw(), attr.as_ptr());
            }
            libc::pthread_condattr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(init_error(rc));
            }
        }
        Ok(cond)
    }

    fn raw(&self) -> *mut libc::pthread_cond_t {
        self.handle.get()
    }

    /// Release `mutex`, block until signaled, reacquire `mutex`.
    ///
    /// The caller must hold `mutex` exactly once.
    pub fn wait(&self, mutex: &Mutex) {
        let depth = Self::enter_wait(mutex);
        // SAFETY: both handles are initialized and pinned; the caller holds
        // the mutex.
        let rc = unsafe { libc::pthread_cond_wait(self.raw(), mutex.raw()) };
        mutex.restore_ownership(depth);
        debug_assert_eq!(rc, 0, "pthread_cond_wait failed");
    }

    /// [`Self::wait`] bounded by `timeout_ms`, using the configured
    /// [`TimedWaitMode`].
    ///
    /// # Errors
    ///
    /// [`ThreadError::Clock`] if the wait clock cannot be read, and
    /// [`ThreadError::Wait`] if the backend rejects the wait in `Deadline`
    /// mode. The mutex is held again on every return.
    pub fn wait_timeout(&self, mutex: &Mutex, timeout_ms: u32) -> Result<WaitStatus, ThreadError> {
        self.wait_timeout_with_mode(mutex, timeout_ms, timed_wait_mode())
    }

    /// [`Self::wait_timeout`] with an explicit deadline policy.
    pub fn wait_timeout_with_mode(
        &self,
        mutex: &Mutex,
        timeout_ms: u32,
        mode: TimedWaitMode,
    ) -> Result<WaitStatus, ThreadError> {
        let deadline = match mode {
            TimedWaitMode::Deadline => absolute_deadline(time::clock_now(WAIT_CLOCK)?, timeout_ms),
            TimedWaitMode::LegacyEpoch => legacy_deadline(timeout_ms),
        };
        let native = time::to_native(deadline);

        let depth = Self::enter_wait(mutex);
        // SAFETY: as in `wait`; `native` outlives the call.
        let rc = unsafe { libc::pthread_cond_timedwait(self.raw(), mutex.raw(), &native) };
        mutex.restore_ownership(depth);

        timed_wait_status(mode, rc)
    }

    /// Wait until `condition` returns `false`, re-checking after every wakeup.
    pub fn wait_while<F>(&self, mutex: &Mutex, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        while condition() {
            self.wait(mutex);
        }
    }

    /// Wake one waiter, if any.
    pub fn set(&self) {
        // SAFETY: the handle is initialized and pinned.
        let rc = unsafe { libc::pthread_cond_signal(self.raw()) };
        debug_assert_eq!(rc, 0);
    }

    /// Wake every waiter.
    pub fn set_all(&self) {
        // SAFETY: the handle is initialized and pinned.
        let rc = unsafe { libc::pthread_cond_broadcast(self.raw()) };
        debug_assert_eq!(rc, 0);
    }

    fn enter_wait(mutex: &Mutex) -> u32 {
        debug_assert!(
            mutex.is_held_by_current_thread(),
            "wait on a condition variable without holding its mutex"
        );
        let depth = mutex.suspend_ownership();
        debug_assert!(depth <= 1, "wait with a recursively held mutex");
        depth
    }
}

/// Interpret a `pthread_cond_timedwait` return code under `mode`. The mutex
/// has been reacquired whichever way this goes.
fn timed_wait_status(mode: TimedWaitMode, rc: i32) -> Result<WaitStatus, ThreadError> {
    match mode {
        TimedWaitMode::Deadline => WaitStatus::from_timedwait_code(rc, libc::ETIMEDOUT),
        // Legacy deadlines from 1_000_000 ms up are not valid timespecs (EINVAL);
        // the historical backend treated any nonzero code as a timeout.
        TimedWaitMode::LegacyEpoch if rc != 0 => Ok(WaitStatus::TimedOut),
        TimedWaitMode::LegacyEpoch => Ok(WaitStatus::Signaled),
    }
}

impl core::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConditionVariable").finish_non_exhaustive()
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no thread is waiting through this value.
        unsafe {
            libc::pthread_cond_destroy(self.raw());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn unsignaled_timed_wait_times_out_after_deadline() {
        let m = Mutex::new();
        let cv = ConditionVariable::new().unwrap();
        m.acquire();
        let start = Instant::now();
        let status = cv
            .wait_timeout_with_mode(&m, 30, TimedWaitMode::Deadline)
            .unwrap();
        let elapsed = start.elapsed();
        assert!(m.is_held_by_current_thread());
        m.release();
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(elapsed >= Duration::from_millis(25), "{elapsed:?}");
    }

    #[test]
    fn legacy_mode_returns_immediately() {
        let m = Mutex::new();
        let cv = ConditionVariable::new().unwrap();
        m.acquire();
        let start = Instant::now();
        let status = cv
            .wait_timeout_with_mode(&m, 500, TimedWaitMode::LegacyEpoch)
            .unwrap();
        let elapsed = start.elapsed();
        m.release();
        assert_eq!(status, WaitStatus::TimedOut);
        assert!(elapsed < Duration::from_millis(250), "{elapsed:?}");
    }

    #[test]
    fn legacy_mode_with_invalid_deadline_reports_timeout() {
        let m = Mutex::new();
        let cv = ConditionVariable::new().unwrap();
        m.acquire();
        let status = cv
            .wait_timeout_with_mode(&m, 2_000_000, TimedWaitMode::LegacyEpoch)
            .unwrap();
        m.release();
        assert_eq!(status, WaitStatus::TimedOut);
    }

    #[test]
    fn set_wakes_waiter() {
        let pair = Arc::new((Mutex::new(), ConditionVariable::new().unwrap()));
        let ready = Arc::new(AtomicBool::new(false));

        let (pair2, ready2) = (Arc::clone(&pair), Arc::clone(&ready));
        let waiter = std::thread::spawn(move || {
            let (m, cv) = &*pair2;
            m.acquire();
            cv.wait_while(m, || !ready2.load(Ordering::SeqCst));
            assert!(m.is_held_by_current_thread());
            m.release();
        });

        std::thread::sleep(Duration::from_millis(20));
        let (m, cv) = &*pair;
        m.acquire();
        ready.store(true, Ordering::SeqCst);
        cv.set();
        m.release();
        waiter.join().unwrap();
    }

    #[test]
    fn wait_while_skips_wait_when_condition_already_false() {
        let m = Mutex::new();
        let cv = ConditionVariable::new().unwrap();
        m.acquire();
        cv.wait_while(&m, || false);
        m.release();
    }

    #[test]
    fn deadline_mode_surfaces_wait_failures() {
        assert_eq!(
            timed_wait_status(TimedWaitMode::Deadline, libc::EINVAL),
            Err(ThreadError::Wait {
                errno: libc::EINVAL
            })
        );
        assert_eq!(
            timed_wait_status(TimedWaitMode::Deadline, libc::ETIMEDOUT),
            Ok(WaitStatus::TimedOut)
        );
        assert_eq!(
            timed_wait_status(TimedWaitMode::Deadline, 0),
            Ok(WaitStatus::Signaled)
        );
        assert_eq!(
            timed_wait_status(TimedWaitMode::LegacyEpoch, libc::EINVAL),
            Ok(WaitStatus::TimedOut)
        );
    }

    #[test]
    fn signal_without_waiters_is_harmless() {
        let cv = ConditionVariable::new().unwrap();
        cv.set();
        cv.set_all();
    }
}
