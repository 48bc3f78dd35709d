//! FIFO delivery and the closed-channel contract, for rendezvous and
//! bounded channels.

use proptest::prelude::*;
use strand::channel::{SendError, TryRecvError, TrySendError, bounded, rendezvous};
use strand::test_utils::{init_test_logging, test_runtime};
use strand::{assert_with_log, test_complete, test_phase};

fn roundtrip(capacity: usize, count: u32) -> Vec<u32> {
    let rt = test_runtime(2);
    let handle = rt.handle();
    rt.block_on(async move {
        let (tx, rx) = bounded::<u32>(capacity);
        handle.spawn(async move {
            for i in 1..=count {
                tx.send(i).await.expect("consumer alive");
            }
        });
        let mut received = Vec::with_capacity(count as usize);
        while let Some(v) = rx.recv().await {
            received.push(v);
        }
        received
    })
    .expect("root")
}

#[test]
fn single_producer_fifo_rendezvous_and_bounded() {
    init_test_logging();
    test_phase!("single_producer_fifo_rendezvous_and_bounded");
    for capacity in [0, 1, 7] {
        let received = roundtrip(capacity, 500);
        let expected: Vec<u32> = (1..=500).collect();
        assert_with_log!(
            received == expected,
            "received order",
            capacity,
            received.len()
        );
    }
    test_complete!("single_producer_fifo_rendezvous_and_bounded");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn fifo_for_any_capacity(capacity in 0usize..=8, count in 1u32..=200) {
        let received = roundtrip(capacity, count);
        prop_assert_eq!(received, (1..=count).collect::<Vec<_>>());
    }
}

#[test]
fn send_after_close_fails_with_value() {
    init_test_logging();
    let (tx, _rx) = bounded::<&str>(2);
    tx.close().expect("first close");
    assert!(matches!(tx.try_send("late"), Err(TrySendError::Closed("late"))));

    let rt = test_runtime(1);
    let err = rt
        .block_on(async move { tx.send("later").await })
        .expect("root");
    assert_eq!(err, Err(SendError("later")));
}

#[test]
fn recv_after_close_drains_then_signals() {
    init_test_logging();
    let (tx, rx) = bounded::<u32>(3);
    for v in [1, 2, 3] {
        tx.try_send(v).expect("space");
    }
    tx.close().expect("close");

    let rt = test_runtime(1);
    let drained = rt
        .block_on(async move {
            let mut out = Vec::new();
            while let Some(v) = rx.recv().await {
                out.push(v);
            }
            // Closed and empty: returns at once, every time.
            assert_eq!(rx.recv().await, None);
            assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
            out
        })
        .expect("root");
    assert_eq!(drained, vec![1, 2, 3]);
}

#[test]
fn close_wakes_blocked_senders_and_receivers() {
    init_test_logging();
    let rt = test_runtime(2);
    let handle = rt.handle();
    rt.block_on(async move {
        let (tx, rx) = rendezvous::<u32>();
        let (tx2, rx2) = rendezvous::<u32>();

        let blocked_sender = {
            let tx = tx.clone();
            handle.spawn(async move { tx.send(1).await })
        };
        let blocked_receiver = handle.spawn(async move { rx2.recv().await });
        strand::time::sleep(std::time::Duration::from_millis(10)).await;

        tx.close().expect("close");
        tx2.close().expect("close");
        assert_eq!(tx.close(), Err(strand::channel::CloseError::AlreadyClosed));

        assert_eq!(blocked_sender.await.expect("sender"), Err(SendError(1)));
        assert_eq!(blocked_receiver.await.expect("receiver"), None);
        drop(rx);
    })
    .expect("root");
}

#[test]
fn slow_consumer_applies_backpressure() {
    init_test_logging();
    let rt = test_runtime(2);
    let handle = rt.handle();
    rt.block_on(async move {
        let (tx, rx) = bounded::<u32>(2);
        let producer = handle.spawn(async move {
            for i in 0..5 {
                tx.send(i).await.expect("consumer alive");
            }
        });
        strand::time::sleep(std::time::Duration::from_millis(20)).await;
        // Two buffered, the producer parked on the third.
        assert_eq!(rx.len(), 2);
        assert!(!producer.is_finished());
        while rx.recv().await.is_some() {}
        producer.await.expect("producer");
    })
    .expect("root");
}
