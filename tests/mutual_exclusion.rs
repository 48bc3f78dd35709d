//! N tasks each doing `lock; x += 1; unlock` M times end at exactly N*M.

use proptest::prelude::*;
use std::sync::Arc;
use strand::sync::Mutex;
use strand::test_utils::{init_test_logging, test_runtime};
use strand::{assert_with_log, test_complete, test_phase, yield_now};

fn run_increments(workers: usize, tasks: usize, rounds: usize) -> u64 {
    let rt = test_runtime(workers);
    let handle = rt.handle();
    let counter = Arc::new(Mutex::new(0_u64));
    let shared = Arc::clone(&counter);
    rt.block_on(async move {
        let joins: Vec<_> = (0..tasks)
            .map(|_| {
                let m = Arc::clone(&shared);
                handle.spawn(async move {
                    for round in 0..rounds {
                        let mut guard = m.lock().await;
                        let before = *guard;
                        if round % 3 == 0 {
                            // Hold the lock across a suspension point.
                            yield_now().await;
                        }
                        *guard = before + 1;
                        drop(guard);
                    }
                })
            })
            .collect();
        for join in joins {
            join.await.expect("incrementer");
        }
    })
    .expect("root");
    let guard = counter.try_lock().expect("all guards released");
    *guard
}

#[test]
fn counter_is_exact_under_contention() {
    init_test_logging();
    test_phase!("counter_is_exact_under_contention");
    let total = run_increments(4, 16, 250);
    assert_with_log!(total == 16 * 250, "final counter", 16 * 250, total);
    test_complete!("counter_is_exact_under_contention");
}

#[test]
fn explicit_unlock_on_every_path() {
    init_test_logging();
    let rt = test_runtime(2);
    let mutex = Arc::new(Mutex::new(Vec::<u32>::new()));
    let m = Arc::clone(&mutex);
    rt.block_on(async move {
        for i in 0..10 {
            let mut guard = m.lock().await;
            if i % 2 == 0 {
                guard.push(i);
                guard.unlock().expect("acquirer unlocks");
                continue;
            }
            guard.push(i * 10);
        }
    })
    .expect("root");
    assert!(!mutex.is_locked());
    let contents = mutex.try_lock().expect("free").clone();
    assert_eq!(contents.len(), 10);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn counter_matches_tasks_times_rounds(
        workers in 1usize..=4,
        tasks in 1usize..=8,
        rounds in 1usize..=40,
    ) {
        init_test_logging();
        let total = run_increments(workers, tasks, rounds);
        prop_assert_eq!(total, (tasks * rounds) as u64);
    }
}
