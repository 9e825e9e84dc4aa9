//! Lock-free unsigned counter.
//!
//! Every mutation is an atomic read-modify-write, so concurrent increments
//! and decrements never lose updates. `store` is deliberately a
//! compare-and-retry loop rather than a plain atomic store.

use core::sync::atomic::{AtomicU32, Ordering};

/// Unsigned 32-bit counter shared between threads without a lock.
#[derive(Default)]
pub struct AtomicCounter {
    value: AtomicU32,
}

impl AtomicCounter {
    /// Create a counter holding 0.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
        }
    }

    /// Set the counter to `new_value` regardless of concurrent writers.
    ///
    /// Repeatedly swaps the last observed value for `new_value` until one
    /// compare-and-swap lands. Under contention this may retry, but it
    /// terminates once no competing writer moves the value in between.
    pub fn store(&self, new_value: u32) {
        let mut observed = self.value.load(Ordering::SeqCst);
        loop {
            match self.value.compare_exchange_weak(
                observed,
                new_value,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(current) => observed = current,
            }
        }
    }

    /// Add one and return the value before the increment.
    pub fn increment(&self) -> u32 {
        self.value.fetch_add(1, Ordering::SeqCst)
    }

    /// Subtract one and return the value before the decrement.
    ///
    /// Implemented as a fetch-add of `-1` in two's complement, so it wraps
    /// exactly like `increment` does at the top of the range.
    pub fn decrement(&self) -> u32 {
        self.value.fetch_add(u32::MAX, Ordering::SeqCst)
    }

    /// Current value.
    #[must_use]
    pub fn load(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }
}

impl core::fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AtomicCounter")
            .field("value", &self.load())
            .finish()
    }
}
