//! Select chooses uniformly among ready arms and never blocks with a
//! default.

use std::time::{Duration, Instant};
use strand::channel::bounded;
use strand::combinator::Select;
use strand::test_utils::{init_test_logging, test_runtime};
use strand::{assert_with_log, test_complete, test_phase};

#[test]
fn simultaneously_ready_arms_split_evenly() {
    init_test_logging();
    test_phase!("simultaneously_ready_arms_split_evenly");
    let rt = test_runtime(1);
    let (first, second) = rt
        .block_on(async {
            let (tx_a, rx_a) = bounded::<u32>(1);
            let (tx_b, rx_b) = bounded::<u32>(1);
            let (mut first, mut second) = (0_u32, 0_u32);
            for i in 0..2000 {
                if rx_a.is_empty() {
                    tx_a.try_send(i).expect("space");
                }
                if rx_b.is_empty() {
                    tx_b.try_send(i).expect("space");
                }
                let mut sel = Select::new();
                let a = sel.recv(&rx_a);
                let b = sel.recv(&rx_b);
                let mut out = sel.select().await;
                if out.take(a).is_some() {
                    first += 1;
                } else if out.take(b).is_some() {
                    second += 1;
                }
            }
            (first, second)
        })
        .expect("root");
    assert_eq!(first + second, 2000);
    // Binomial(2000, 0.5) has a standard deviation of about 22.
    assert_with_log!(
        (850..=1150).contains(&first),
        "first arm chosen",
        "850..=1150",
        first
    );
    test_complete!("simultaneously_ready_arms_split_evenly", second = second);
}

#[test]
fn default_fires_without_blocking() {
    init_test_logging();
    let rt = test_runtime(1);
    let elapsed = rt
        .block_on(async {
            let (_tx, rx) = bounded::<u8>(0);
            let mut sel = Select::new();
            sel.recv(&rx);
            sel.default_case();
            let started = Instant::now();
            let out = sel.select().await;
            assert!(out.is_default());
            started.elapsed()
        })
        .expect("root");
    assert_with_log!(
        elapsed < Duration::from_millis(5),
        "default latency",
        "< 5ms",
        elapsed
    );
}

#[test]
fn timeout_acts_as_ready_timer_arm() {
    init_test_logging();
    let rt = test_runtime(2);
    let out = rt
        .block_on(async {
            let (_tx, rx) = bounded::<u8>(0);
            let mut sel = Select::new();
            sel.recv(&rx);
            sel.timeout(Duration::from_millis(15));
            sel.select().await.is_timeout()
        })
        .expect("root");
    assert!(out);
}

#[test]
fn blocked_select_takes_first_arriving_value() {
    init_test_logging();
    let rt = test_runtime(2);
    let handle = rt.handle();
    let got = rt
        .block_on(async move {
            let (_tx_a, rx_a) = bounded::<&str>(0);
            let (tx_b, rx_b) = bounded::<&str>(0);
            handle.spawn(async move {
                strand::time::sleep(Duration::from_millis(10)).await;
                tx_b.send("b").await.expect("select waiting");
            });
            let mut sel = Select::new();
            let a = sel.recv(&rx_a);
            let b = sel.recv(&rx_b);
            let mut out = sel.select().await;
            assert!(out.take(a).is_none());
            out.take(b).flatten()
        })
        .expect("root");
    assert_eq!(got, Some("b"));
}
