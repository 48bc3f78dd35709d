//! A waits on a channel only B sends on; B waits on a WaitGroup only A
//! decrements. The runtime reports a deadlock instead of hanging.

use std::time::{Duration, Instant};
use strand::channel::rendezvous;
use strand::error::RuntimeError;
use strand::sync::WaitGroup;
use strand::test_utils::{init_test_logging, test_runtime};
use strand::{assert_with_log, test_complete, test_phase};

#[test]
fn channel_and_wait_group_cycle_is_reported() {
    init_test_logging();
    test_phase!("channel_and_wait_group_cycle_is_reported");
    let rt = test_runtime(2);
    let handle = rt.handle();
    let started = Instant::now();
    let outcome = rt.block_on(async move {
        let (tx, rx) = rendezvous::<u32>();
        let wg = WaitGroup::new();
        wg.add(1).expect("add");

        let a = {
            let wg = wg.clone();
            handle.spawn(async move {
                let v = rx.recv().await;
                wg.done().expect("balanced");
                v
            })
        };
        let b = handle.spawn(async move {
            wg.wait().await;
            tx.send(1).await
        });
        let _ = a.await;
        let _ = b.await;
    });

    let err = outcome.expect_err("cycle must not complete");
    let RuntimeError::Deadlock(report) = &err else {
        panic!("expected deadlock, got {err:?}");
    };
    assert_with_log!(
        report.live_tasks() >= 3,
        "blocked tasks in report",
        ">= 3",
        report.live_tasks()
    );
    assert!(err.deadlock().is_some());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(rt.handle().is_shutdown());
    test_complete!("channel_and_wait_group_cycle_is_reported");
}

#[test]
fn pending_timer_is_not_a_deadlock() {
    init_test_logging();
    let rt = test_runtime(1);
    let out = rt
        .block_on(async {
            // Longer than several deadlock check intervals.
            strand::time::sleep(Duration::from_millis(150)).await;
            7
        })
        .expect("sleeping is not deadlock");
    assert_eq!(out, 7);
}

#[test]
fn external_source_suppresses_detection() {
    init_test_logging();
    let rt = test_runtime(1);
    let handle = rt.handle();
    let (tx, rx) = rendezvous::<u32>();
    let source = handle.external_source();
    let feeder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(120));
        let _ = tx.try_send(5);
        drop(source);
    });
    let got = rt
        .block_on(async move { rx.recv().await })
        .expect("external wakeup expected");
    feeder.join().expect("feeder thread");
    assert_eq!(got, Some(5));
}
