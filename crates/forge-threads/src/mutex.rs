//! Owning wrapper over `pthread_mutex_t`.
//!
//! The native handle is boxed so its address never changes after init, as
//! POSIX requires. Ownership is tracked beside the handle (holder token plus
//! recursion depth) so precondition violations can be asserted and so a
//! condition variable can hand ownership back and forth across a wait.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use forge_threads_core::error::Primitive;
use forge_threads_core::{MutexKind, ThreadError};

/// Token of the calling thread. Never 0 for a live thread.
pub(crate) fn current_token() -> usize {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as usize }
}

const fn native_kind(kind: MutexKind) -> libc::c_int {
    match kind {
        MutexKind::Normal => libc::PTHREAD_MUTEX_NORMAL,
        MutexKind::Recursive => libc::PTHREAD_MUTEX_RECURSIVE,
        MutexKind::ErrorCheck => libc::PTHREAD_MUTEX_ERRORCHECK,
    }
}

/// Mutual-exclusion lock with no timeout and no fairness guarantee.
///
/// Acquisition and release are explicit; [`Mutex::lock`] gives a scoped
/// guard for the common case. Relocking a [`MutexKind::Normal`] mutex from its
/// owner deadlocks.
pub struct Mutex {
    handle: Box<UnsafeCell<libc::pthread_mutex_t>>,
    kind: MutexKind,
    /// `current_token()` of the holder, 0 when unlocked.
    owner: AtomicUsize,
    depth: AtomicU32,
}

// SAFETY: the pthread mutex is designed for cross-thread use and its address
// is stable; the bookkeeping fields are atomics.
unsafe impl Send for Mutex {}
// SAFETY: as above.
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Default (`Normal`) mutex from the static initializer.
    #[must_use]
    pub fn new() -> Self {
        Self::from_initializer(MutexKind::Normal)
    }

    fn from_initializer(kind: MutexKind) -> Self {
        Self {
            handle: Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER)),
            kind,
            owner: AtomicUsize::new(0),
            depth: AtomicU32::new(0),
        }
    }

    /// Mutex with an explicit locking discipline.
    pub fn with_kind(kind: MutexKind) -> Result<Self, ThreadError> {
        if kind == MutexKind::Normal {
            return Ok(Self::new());
        }
        let mutex = Self::from_initializer(kind);
        let init_error = |errno| ThreadError::Init {
            primitive: Primitive::Mutex,
            errno,
        };

        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: attr is initialized by mutexattr_init before any other use
        // and destroyed on every path after that.
        unsafe {
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            if rc != 0 {
                return Err(init_error(rc));
            }
            let mut rc = libc::pthread_mutexattr_settype(attr.as_mut_ptr(), native_kind(kind));
            if rc == 0 {
                rc = libc::pthread_mutex_init(mutex.raw(), attr.as_ptr());
            }
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(init_error(rc));
            }
        }
        Ok(mutex)
    }

    #[must_use]
    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub(crate) fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.handle.get()
    }

    /// Block until the calling thread owns the mutex.
    ///
    /// # Panics
    ///
    /// If an [`MutexKind::ErrorCheck`] mutex is relocked by its owner.
    pub fn acquire(&self) {
        // SAFETY: the handle is initialized and pinned for `self`'s lifetime.
        let rc = unsafe { libc::pthread_mutex_lock(self.raw()) };
        assert!(
            rc != libc::EDEADLK,
            "relock of an error-checking mutex by its owner"
        );
        assert!(rc == 0, "pthread_mutex_lock failed: errno {rc}");
        self.note_acquired();
    }

    /// Acquire without blocking. Returns `false` if another thread holds it,
    /// or if the caller holds a non-recursive mutex.
    pub fn try_acquire(&self) -> bool {
        // SAFETY: as in `acquire`.
        let rc = unsafe { libc::pthread_mutex_trylock(self.raw()) };
        if rc == 0 {
            self.note_acquired();
            true
        } else {
            false
        }
    }

    /// Relinquish ownership. The caller must hold the mutex.
    pub fn release(&self) {
        let held = self.is_held_by_current_thread();
        debug_assert!(held, "release of a mutex the calling thread does not hold");
        if held && self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(0, Ordering::Relaxed);
        }
        // SAFETY: as in `acquire`.
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed");
    }

    /// Acquire and return a guard that releases on drop.
    pub fn lock(&self) -> MutexGuard<'_> {
        self.acquire();
        MutexGuard { mutex: self }
    }

    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.depth.load(Ordering::Relaxed) > 0
            && self.owner.load(Ordering::Relaxed) == current_token()
    }

    fn note_acquired(&self) {
        if self.depth.load(Ordering::Relaxed) == 0 {
            self.owner.store(current_token(), Ordering::Relaxed);
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Clear ownership before a condvar wait releases the native lock.
    /// Returns the depth to hand back to [`Self::restore_ownership`].
    pub(crate) fn suspend_ownership(&self) -> u32 {
        let depth = self.depth.swap(0, Ordering::Relaxed);
        self.owner.store(0, Ordering::Relaxed);
        depth
    }

    /// Reinstate ownership once a condvar wait has reacquired the lock.
    pub(crate) fn restore_ownership(&self, depth: u32) {
        self.owner.store(current_token(), Ordering::Relaxed);
        self.depth.store(depth, Ordering::Relaxed);
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mutex")
            .field("kind", &self.kind)
            .field("depth", &self.depth.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        debug_assert_eq!(
            *self.depth.get_mut(),
            0,
            "mutex destroyed while held"
        );
        // SAFETY: `&mut self` proves no other thread can reach the handle.
        unsafe {
            libc::pthread_mutex_destroy(self.raw());
        }
    }
}

/// Scoped ownership of a [`Mutex`].
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl MutexGuard<'_> {
    #[must_use]
    pub fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn acquire_release_tracks_owner() {
        let m = Mutex::new();
        assert!(!m.is_held_by_current_thread());
        m.acquire();
        assert!(m.is_held_by_current_thread());
        m.release();
        assert!(!m.is_held_by_current_thread());
    }

    #[test]
    fn guard_releases_on_drop() {
        let m = Mutex::new();
        {
            let _g = m.lock();
            assert!(m.is_held_by_current_thread());
        }
        assert!(!m.is_held_by_current_thread());
        assert!(m.try_acquire());
        m.release();
    }

    #[test]
    fn try_acquire_on_own_normal_mutex_fails() {
        let m = Mutex::new();
        m.acquire();
        assert!(!m.try_acquire());
        assert!(m.is_held_by_current_thread());
        m.release();
    }

    #[test]
    fn recursive_mutex_counts_depth() {
        let m = Mutex::with_kind(MutexKind::Recursive).unwrap();
        assert_eq!(m.kind(), MutexKind::Recursive);
        m.acquire();
        m.acquire();
        assert!(m.try_acquire());
        m.release();
        m.release();
        assert!(m.is_held_by_current_thread());
        m.release();
        assert!(!m.is_held_by_current_thread());
    }

    #[test]
    fn errorcheck_relock_panics() {
        let m = Mutex::with_kind(MutexKind::ErrorCheck).unwrap();
        m.acquire();
        let relock = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| m.acquire()));
        assert!(relock.is_err());
        assert!(m.is_held_by_current_thread());
        m.release();
    }

    #[test]
    fn other_thread_is_not_owner() {
        let m = Arc::new(Mutex::new());
        m.acquire();
        let seen = Arc::new(AtomicBool::new(true));
        let (m2, seen2) = (Arc::clone(&m), Arc::clone(&seen));
        std::thread::spawn(move || {
            seen2.store(m2.is_held_by_current_thread(), Ordering::SeqCst);
            assert!(!m2.try_acquire());
        })
        .join()
        .unwrap();
        assert!(!seen.load(Ordering::SeqCst));
        m.release();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not hold")]
    fn release_without_holding_asserts() {
        let m = Mutex::new();
        m.release();
    }
}
