//! Scheduler behaviour: panic isolation, preemption, work stealing and task
//! handles.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use strand::error::{JoinError, RuntimeError};
use strand::test_utils::{init_test_logging, test_runtime};
use strand::{RuntimeBuilder, TaskId, assert_with_log, test_complete, test_phase, yield_now};

#[test]
fn panicking_task_does_not_disturb_siblings() {
    init_test_logging();
    test_phase!("panicking_task_does_not_disturb_siblings");
    let rt = test_runtime(2);
    let handle = rt.handle();
    let (bad, good) = rt
        .block_on(async move {
            let bad = handle.spawn(async { panic!("task body failed") });
            let good = handle.spawn(async { 40 + 2 });
            (bad.await, good.await)
        })
        .expect("root");
    assert!(matches!(bad, Err(JoinError::Panicked(ref m)) if m.contains("task body failed")));
    assert_eq!(good, Ok(42));
    let handle = rt.handle();
    eventually(|| handle.stats().panicked == 1);
    test_complete!("panicking_task_does_not_disturb_siblings");
}

#[test]
fn root_panic_surfaces_as_join_error() {
    init_test_logging();
    let rt = test_runtime(1);
    let err = rt.block_on(async { panic!("root failed") }).unwrap_err();
    assert!(matches!(err, RuntimeError::Join(JoinError::Panicked(_))));
}

#[test]
fn busy_task_is_preempted_on_a_single_worker() {
    init_test_logging();
    let rt = RuntimeBuilder::new()
        .worker_threads(1)
        .time_slice(Duration::from_millis(2))
        .build()
        .expect("runtime");
    let handle = rt.handle();
    let stop = Arc::new(AtomicBool::new(false));
    let ran = rt
        .block_on(async move {
            let spinner_stop = Arc::clone(&stop);
            let spinner = handle.spawn(async move {
                let (tx, rx) = strand::bounded::<()>(1);
                // Every iteration touches a primitive, which is where the
                // time slice is enforced.
                while !spinner_stop.load(Ordering::Acquire) {
                    let _ = tx.try_send(());
                    let _ = rx.recv().await;
                    let deadline = Instant::now() + Duration::from_micros(200);
                    while Instant::now() < deadline {
                        std::hint::spin_loop();
                    }
                }
            });
            let other = handle.spawn(async { true });
            let ran = other.await.expect("other task");
            stop.store(true, Ordering::Release);
            spinner.await.expect("spinner");
            ran
        })
        .expect("root");
    assert!(ran);
    assert!(rt.handle().stats().preemptions > 0);
}

#[test]
fn many_tasks_spread_across_workers() {
    init_test_logging();
    let rt = test_runtime(4);
    let handle = rt.handle();
    let names = Arc::new(Mutex::new(HashSet::new()));
    let counted = Arc::new(AtomicUsize::new(0));
    let n = Arc::clone(&names);
    let c = Arc::clone(&counted);
    rt.block_on(async move {
        let joins: Vec<_> = (0..400)
            .map(|_| {
                let n = Arc::clone(&n);
                let c = Arc::clone(&c);
                handle.spawn(async move {
                    let start = Instant::now();
                    while start.elapsed() < Duration::from_micros(300) {
                        std::hint::spin_loop();
                    }
                    if let Some(name) = std::thread::current().name() {
                        n.lock().expect("set lock").insert(name.to_string());
                    }
                    c.fetch_add(1, Ordering::Relaxed);
                    yield_now().await;
                })
            })
            .collect();
        for join in joins {
            join.await.expect("task");
        }
    })
    .expect("root");
    assert_eq!(counted.load(Ordering::Relaxed), 400);
    let distinct: usize = names.lock().expect("set lock").len();
    assert_with_log!(distinct > 1, "workers that ran tasks", "> 1", distinct);
}

/// Waits up to a second for bookkeeping that trails task completion.
fn eventually(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(1);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn task_ids_are_unique_and_visible() {
    init_test_logging();
    let rt = test_runtime(2);
    let handle = rt.handle();
    let (outer, inner) = rt
        .block_on(async move {
            let outer = TaskId::current().expect("inside a task");
            let inner = handle
                .spawn(async { TaskId::current().expect("inside a task") })
                .await
                .expect("child");
            (outer, inner)
        })
        .expect("root");
    assert_ne!(outer, inner);
    assert_eq!(TaskId::current(), None);
}

#[test]
fn spawn_from_inside_uses_current_runtime() {
    init_test_logging();
    let rt = test_runtime(2);
    let out = rt
        .block_on(async {
            let child = strand::runtime::spawn(async { 5 });
            child.await.expect("child") * 2
        })
        .expect("root");
    assert_eq!(out, 10);
}

#[test]
fn shutdown_aborts_unfinished_tasks() {
    init_test_logging();
    let rt = RuntimeBuilder::new()
        .worker_threads(2)
        .deadlock_check_interval(None)
        .build()
        .expect("runtime");
    let (tx, rx) = strand::rendezvous::<u8>();
    let stuck = rt.spawn(async move { rx.recv().await });
    std::thread::sleep(Duration::from_millis(10));
    let orphans = rt.shutdown();
    assert_eq!(orphans, 1);
    assert_eq!(
        futures_lite::future::block_on(stuck),
        Err(JoinError::Shutdown)
    );
    drop(tx);
}
