//! Thread identity and the process-wide main-thread registry.

use parking_lot::RwLock;

/// Opaque thread identity. Only equality is meaningful.
///
/// The OS may reuse an identity once its thread has been joined.
#[derive(Clone, Copy)]
pub struct ThreadId(libc::pthread_t);

// SAFETY: a pthread_t is a plain identifier; comparing or copying it from
// any thread is allowed.
unsafe impl Send for ThreadId {}
// SAFETY: as above.
unsafe impl Sync for ThreadId {}

impl ThreadId {
    pub(crate) fn from_native(native: libc::pthread_t) -> Self {
        Self(native)
    }
}

impl PartialEq for ThreadId {
    fn eq(&self, other: &Self) -> bool {
        // SAFETY: pthread_equal only compares its arguments.
        unsafe { libc::pthread_equal(self.0, other.0) != 0 }
    }
}

impl Eq for ThreadId {}

impl core::fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ThreadId").field(&self.0).finish()
    }
}

/// Identity of the calling thread.
#[must_use]
pub fn current_thread_id() -> ThreadId {
    // SAFETY: pthread_self has no preconditions.
    ThreadId(unsafe { libc::pthread_self() })
}

/// Records which thread counts as "main". Unset until [`Self::set_current`].
///
/// Setting again, from any thread, silently redefines main.
#[derive(Debug)]
pub struct MainThreadRegistry {
    main: RwLock<Option<ThreadId>>,
}

impl MainThreadRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            main: parking_lot::const_rwlock(None),
        }
    }

    /// Record the calling thread as main.
    pub fn set_current(&self) {
        *self.main.write() = Some(current_thread_id());
    }

    #[must_use]
    pub fn get(&self) -> Option<ThreadId> {
        *self.main.read()
    }

    /// True iff the calling thread is the recorded main thread. False when
    /// nothing has been recorded.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.get().is_some_and(|main| main == current_thread_id())
    }
}

impl Default for MainThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static MAIN_THREAD: MainThreadRegistry = MainThreadRegistry::new();

/// Record the calling thread as the process's main thread.
pub fn set_main_thread() {
    MAIN_THREAD.set_current();
}

/// Whether the calling thread was recorded by [`set_main_thread`].
#[must_use]
pub fn is_main_thread() -> bool {
    MAIN_THREAD.is_current()
}

#[must_use]
pub fn main_thread_id() -> Option<ThreadId> {
    MAIN_THREAD.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::spawn;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn current_id_is_stable_and_distinct() {
        assert_eq!(current_thread_id(), current_thread_id());
        let here = current_thread_id();
        let other = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, other);
    }

    #[test]
    fn spawned_handle_id_matches_thread_view() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        let handle = spawn(move || {
            *seen2.lock() = Some(current_thread_id());
        })
        .unwrap();
        let id = handle.id();
        handle.join().unwrap();
        assert_eq!(*seen.lock(), Some(id));
    }

    #[test]
    fn unset_registry_reports_false() {
        let registry = MainThreadRegistry::new();
        assert!(registry.get().is_none());
        assert!(!registry.is_current());
    }

    #[test]
    fn registry_recognizes_only_the_setter() {
        let registry = Arc::new(MainThreadRegistry::new());
        registry.set_current();
        assert!(registry.is_current());

        let r2 = Arc::clone(&registry);
        let elsewhere = std::thread::spawn(move || r2.is_current())
            .join()
            .unwrap();
        assert!(!elsewhere);
    }

    #[test]
    fn resetting_from_another_thread_moves_main() {
        let registry = Arc::new(MainThreadRegistry::new());
        registry.set_current();
        let was_main = Arc::new(AtomicBool::new(false));

        let (r2, flag) = (Arc::clone(&registry), Arc::clone(&was_main));
        let handle = spawn(move || {
            r2.set_current();
            flag.store(r2.is_current(), Ordering::SeqCst);
        })
        .unwrap();
        handle.join().unwrap();

        assert!(was_main.load(Ordering::SeqCst));
        assert!(!registry.is_current());
    }
}
