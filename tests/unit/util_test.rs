//! Tests for utility functions

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use trafficguru::util::{elapsed_ms, init_tracing, now_ms, ShutdownSignal};

#[test]
fn test_clock_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert_eq!(elapsed_ms(a, a + 25), 25);
    assert_eq!(elapsed_ms(a + 25, a), 0);
}

#[test]
fn test_shutdown_signal_first_request_wins() {
    let signal = ShutdownSignal::new();
    assert!(signal.is_running());
    assert!(signal.request_stop());
    assert!(!signal.request_stop());
    assert!(!signal.is_running());
    assert!(!signal.sleep(Duration::from_secs(10)));
}

#[test]
fn test_shutdown_wakes_sleepers() {
    let signal = Arc::new(ShutdownSignal::default());
    let sleeper = {
        let signal = Arc::clone(&signal);
        thread::spawn(move || {
            let started = Instant::now();
            let completed = signal.sleep(Duration::from_secs(30));
            (completed, started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(20));
    signal.request_stop();
    let (completed, elapsed) = sleeper.join().unwrap();
    assert!(!completed);
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_full_sleep_reports_running() {
    let signal = ShutdownSignal::new();
    assert!(signal.sleep(Duration::from_millis(5)));
    assert!(signal.sleep(Duration::ZERO));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing(true);
    init_tracing(false);
    tracing::info!("tracing initialized twice without panicking");
}
