//! OS threads: creation through a trampoline, join-on-destroy, sleep, and
//! the CPU count query.
//!
//! Every thread, raw or closure-based, starts in [`thread_trampoline`]. The
//! trampoline takes ownership of a boxed start packet, marks the shared
//! [`ThreadControl`] running, runs the payload under `catch_unwind`, and marks
//! it finished. Joining is the only way a thread's resources are released;
//! a [`ThreadHandle`] that is never passed to [`destroy_thread`] joins on drop.

use core::ffi::c_void;
use core::mem::MaybeUninit;
use core::ptr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use forge_threads_core::cond::{NANOS_PER_MILLI, Timespec};
use forge_threads_core::cpu::validate_cpu_count;
use forge_threads_core::error::Primitive;
use forge_threads_core::thread::ThreadControl;
use forge_threads_core::{ThreadError, ThreadState};

use crate::identity::ThreadId;
use crate::time;

/// Raw thread entry point.
pub type ThreadFn = unsafe extern "C" fn(*mut c_void);

/// Entry point plus opaque argument for [`create_thread`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadDesc {
    pub func: ThreadFn,
    pub data: *mut c_void,
}

enum ThreadStart {
    Raw { func: ThreadFn, data: *mut c_void },
    Closure(Box<dyn FnOnce() + Send + 'static>),
}

struct StartPacket {
    start: ThreadStart,
    control: Arc<ThreadControl>,
}

extern "C" fn thread_trampoline(arg: *mut c_void) -> *mut c_void {
    // SAFETY: `arg` is the packet leaked by `launch`, handed to exactly one
    // thread.
    let packet = unsafe { Box::from_raw(arg.cast::<StartPacket>()) };
    let StartPacket { start, control } = *packet;

    control.mark_running();
    let outcome = panic::catch_unwind(AssertUnwindSafe(move || match start {
        // SAFETY: the caller of `create_thread` guarantees `data` is valid
        // for `func` until it returns.
        ThreadStart::Raw { func, data } => unsafe { func(data) },
        ThreadStart::Closure(f) => f(),
    }));
    control.mark_finished(outcome.is_err());
    ptr::null_mut()
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Thread factory with optional attributes.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    stack_size: Option<usize>,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size in bytes. Values below the platform minimum are rejected at
    /// spawn time.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn spawn<F>(self, f: F) -> Result<ThreadHandle, ThreadError>
    where
        F: FnOnce() + Send + 'static,
    {
        launch(ThreadStart::Closure(Box::new(f)), self.stack_size)
    }
}

/// Start a thread running `desc.func(desc.data)` exactly once.
///
/// # Safety
///
/// `desc.data` must remain valid for whatever `desc.func` does with it until
/// the function returns, and `desc.func` must not unwind.
pub unsafe fn create_thread(desc: &ThreadDesc) -> Result<ThreadHandle, ThreadError> {
    launch(
        ThreadStart::Raw {
            func: desc.func,
            data: desc.data,
        },
        None,
    )
}

/// Start a thread running `f`. A panic in `f` is reported at join.
pub fn spawn<F>(f: F) -> Result<ThreadHandle, ThreadError>
where
    F: FnOnce() + Send + 'static,
{
    Builder::new().spawn(f)
}

fn launch(start: ThreadStart, stack_size: Option<usize>) -> Result<ThreadHandle, ThreadError> {
    let control = Arc::new(ThreadControl::new());
    let packet = Box::into_raw(Box::new(StartPacket {
        start,
        control: Arc::clone(&control),
    }));

    let mut native = MaybeUninit::<libc::pthread_t>::uninit();
    let rc = match stack_size {
        None => {
            // SAFETY: the trampoline takes ownership of `packet` iff create
            // succeeds.
            unsafe {
                libc::pthread_create(
                    native.as_mut_ptr(),
                    ptr::null(),
                    thread_trampoline,
                    packet.cast(),
                )
            }
        }
        Some(bytes) => match create_with_stack(&mut native, bytes, packet) {
            Ok(rc) => rc,
            Err(err) => {
                // SAFETY: no thread was started, so the packet is still ours.
                drop(unsafe { Box::from_raw(packet) });
                return Err(err);
            }
        },
    };

    if rc != 0 {
        // SAFETY: as above.
        drop(unsafe { Box::from_raw(packet) });
        return Err(ThreadError::Spawn { errno: rc });
    }
    Ok(ThreadHandle {
        // SAFETY: pthread_create succeeded and wrote the handle.
        native: Some(unsafe { native.assume_init() }),
        control,
    })
}

/// Create through an attribute object carrying a stack size. Attribute
/// failures are `Init` errors; the returned code is `pthread_create`'s.
fn create_with_stack(
    native: &mut MaybeUninit<libc::pthread_t>,
    bytes: usize,
    packet: *mut StartPacket,
) -> Result<i32, ThreadError> {
    let attr_error = |errno| ThreadError::Init {
        primitive: Primitive::ThreadAttributes,
        errno,
    };
    let mut attr = MaybeUninit::<libc::pthread_attr_t>::uninit();
    // SAFETY: attr is initialized before use and destroyed on every path after
    // that; packet ownership is as in `launch`.
    unsafe {
        let rc = libc::pthread_attr_init(attr.as_mut_ptr());
        if rc != 0 {
            return Err(attr_error(rc));
        }
        let rc = libc::pthread_attr_setstacksize(attr.as_mut_ptr(), bytes);
        if rc != 0 {
            libc::pthread_attr_destroy(attr.as_mut_ptr());
            return Err(attr_error(rc));
        }
        let rc = libc::pthread_create(
            native.as_mut_ptr(),
            attr.as_ptr(),
            thread_trampoline,
            packet.cast(),
        );
        libc::pthread_attr_destroy(attr.as_mut_ptr());
        Ok(rc)
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Owning handle to a running or finished thread.
pub struct ThreadHandle {
    /// `None` once joined.
    native: Option<libc::pthread_t>,
    control: Arc<ThreadControl>,
}

// SAFETY: a pthread_t may be joined from any thread; the control block is
// shared through an Arc of atomics.
unsafe impl Send for ThreadHandle {}
// SAFETY: shared access only reads the control block.
unsafe impl Sync for ThreadHandle {}

impl ThreadHandle {
    /// Identity of the thread, comparable with [`crate::current_thread_id`].
    ///
    /// # Panics
    ///
    /// If the handle has already been joined.
    #[must_use]
    pub fn id(&self) -> ThreadId {
        match self.native {
            Some(native) => ThreadId::from_native(native),
            None => panic!("id of a joined thread"),
        }
    }

    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.control.state()
    }

    /// The thread function has returned (the OS thread may still be exiting).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), ThreadState::Finished | ThreadState::Joined)
    }

    /// Block until the thread function returns, then release the thread.
    pub fn join(mut self) -> Result<(), ThreadError> {
        self.join_native()
    }

    fn join_native(&mut self) -> Result<(), ThreadError> {
        let Some(native) = self.native.take() else {
            panic!("join of a null thread handle");
        };
        // SAFETY: `native` came from a successful pthread_create and has not
        // been joined (the Option was Some).
        let rc = unsafe { libc::pthread_join(native, ptr::null_mut()) };
        if rc != 0 {
            return Err(ThreadError::Join { errno: rc });
        }
        self.control.mark_joined();
        if self.control.panicked() {
            return Err(ThreadError::Panicked);
        }
        Ok(())
    }
}

impl core::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        if self.native.is_some() {
            // Teardown still joins; a panic in the thread has nowhere to go.
            let _ = self.join_native();
        }
    }
}

/// Wait for the thread to finish and release its OS resources.
///
/// Reports [`ThreadError::Panicked`] if the thread function unwound.
pub fn destroy_thread(handle: ThreadHandle) -> Result<(), ThreadError> {
    handle.join()
}

// ---------------------------------------------------------------------------
// Sleep and system queries
// ---------------------------------------------------------------------------

/// Suspend the calling thread for at least `ms` milliseconds. Signal
/// interruptions resume with the remaining time.
pub fn sleep_ms(ms: u32) {
    let mut request = time::to_native(Timespec::new(
        i64::from(ms / 1000),
        i64::from(ms % 1000) * NANOS_PER_MILLI,
    ));
    loop {
        // SAFETY: zeroed timespec is valid.
        let mut remaining: libc::timespec = unsafe { core::mem::zeroed() };
        // SAFETY: both pointers are valid for the call.
        let rc = unsafe { libc::nanosleep(&request, &mut remaining) };
        if rc == 0 || time::last_errno() != libc::EINTR {
            return;
        }
        request = remaining;
    }
}

/// Number of online logical processors.
pub fn num_cpu_cores() -> Result<u32, ThreadError> {
    // SAFETY: sysconf has no preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    validate_cpu_count(i64::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    unsafe extern "C" fn store_sentinel(arg: *mut c_void) {
        // SAFETY: the test passes a pointer to an AtomicU32 that outlives the
        // thread.
        let slot = unsafe { &*arg.cast::<AtomicU32>() };
        slot.store(0xC0FFEE, Ordering::Release);
    }

    #[test]
    fn raw_thread_runs_once_and_joins() {
        let slot = AtomicU32::new(0);
        let desc = ThreadDesc {
            func: store_sentinel,
            data: ptr::from_ref(&slot).cast_mut().cast(),
        };
        // SAFETY: `slot` outlives the join below.
        let handle = unsafe { create_thread(&desc) }.unwrap();
        destroy_thread(handle).unwrap();
        assert_eq!(slot.load(Ordering::Acquire), 0xC0FFEE);
    }

    #[test]
    fn closure_thread_reaches_joined() {
        let hits = Arc::new(AtomicU32::new(0));
        let h2 = Arc::clone(&hits);
        let handle = spawn(move || {
            h2.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let control = Arc::clone(&handle.control);
        handle.join().unwrap();
        assert_eq!(control.state(), ThreadState::Joined);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_thread_reports_at_join() {
        let handle = spawn(|| panic!("boom")).unwrap();
        assert_eq!(destroy_thread(handle), Err(ThreadError::Panicked));
    }

    #[test]
    fn finished_is_observable_before_join() {
        let handle = spawn(|| {}).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() {
            assert!(Instant::now() < deadline, "thread never finished");
            std::thread::yield_now();
        }
        assert_eq!(handle.state(), ThreadState::Finished);
        handle.join().unwrap();
    }

    #[test]
    fn dropping_a_handle_joins() {
        let hits = Arc::new(AtomicU32::new(0));
        let h2 = Arc::clone(&hits);
        drop(
            spawn(move || {
                sleep_ms(10);
                h2.store(1, Ordering::SeqCst);
            })
            .unwrap(),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn builder_with_stack_size_spawns() {
        let handle = Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let buf = [0u8; 16 * 1024];
                std::hint::black_box(&buf);
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn undersized_stack_is_an_attribute_error() {
        let err = Builder::new().stack_size(1).spawn(|| {}).unwrap_err();
        assert!(matches!(
            err,
            ThreadError::Init {
                primitive: Primitive::ThreadAttributes,
                errno
            } if errno == libc::EINVAL
        ));
    }

    #[test]
    fn sleep_lasts_at_least_requested() {
        let start = Instant::now();
        sleep_ms(20);
        assert!(start.elapsed() >= Duration::from_millis(20));
        sleep_ms(0);
    }

    #[test]
    fn cpu_count_is_positive() {
        assert!(num_cpu_cores().unwrap() >= 1);
    }
}
