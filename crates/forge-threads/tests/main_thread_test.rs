#![cfg(target_os = "linux")]
//! Exercises the process-wide main-thread registry. Kept as a single test so
//! no other test in this binary races the global.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use forge_threads::{
    current_thread_id, destroy_thread, is_main_thread, main_thread_id, set_main_thread, spawn,
};

#[test]
fn main_thread_registry_lifecycle() {
    assert!(main_thread_id().is_none());
    assert!(!is_main_thread(), "unset registry must report false");

    set_main_thread();
    assert!(is_main_thread());
    assert_eq!(main_thread_id(), Some(current_thread_id()));

    let seen_as_main = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&seen_as_main);
    let worker = spawn(move || flag.store(is_main_thread(), Ordering::SeqCst)).unwrap();
    destroy_thread(worker).unwrap();
    assert!(!seen_as_main.load(Ordering::SeqCst));

    // Setting from another thread redefines main without complaint.
    let flag = Arc::clone(&seen_as_main);
    let usurper = spawn(move || {
        set_main_thread();
        flag.store(is_main_thread(), Ordering::SeqCst);
    })
    .unwrap();
    destroy_thread(usurper).unwrap();
    assert!(seen_as_main.load(Ordering::SeqCst));
    assert!(!is_main_thread());

    set_main_thread();
    assert!(is_main_thread());
}
