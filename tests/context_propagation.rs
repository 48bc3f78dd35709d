//! Cancelling a context stops every descendant, old and new, and never its
//! parent.

use std::time::Duration;
use strand::combinator::Select;
use strand::context::{self, ContextKey};
use strand::error::ContextError;
use strand::test_utils::{init_test_logging, test_runtime};
use strand::{assert_with_log, test_complete, test_phase};

#[test]
fn parent_cancel_fires_done_for_all_descendants() {
    init_test_logging();
    test_phase!("parent_cancel_fires_done_for_all_descendants");
    let rt = test_runtime(2);
    let handle = rt.handle();
    let results = rt
        .block_on(async move {
            let (parent, cancel) = context::background().with_cancel();
            let (child, _c) = parent.with_cancel();
            let (grandchild, _g) = child.with_timeout(Duration::from_secs(60));
            let tagged = grandchild.with_value(&ContextKey::<u32>::new("tag"), 1);

            let waiters: Vec<_> = [child, grandchild, tagged]
                .into_iter()
                .map(|ctx| handle.spawn(async move { ctx.cancelled().await }))
                .collect();
            strand::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();

            let mut results = Vec::new();
            for waiter in waiters {
                results.push(waiter.await.expect("waiter"));
            }
            let (late, _l) = parent.with_cancel();
            results.push(late.cancelled().await);
            results
        })
        .expect("root");
    assert_with_log!(
        results.iter().all(|e| *e == ContextError::Cancelled),
        "every descendant cancelled",
        "Cancelled x4",
        results
    );
    test_complete!("parent_cancel_fires_done_for_all_descendants");
}

#[test]
fn child_cancel_never_reaches_parent() {
    init_test_logging();
    let (parent, _p) = context::background().with_cancel();
    let (child, child_cancel) = parent.with_cancel();
    let (sibling, _s) = parent.with_cancel();
    child_cancel.cancel();
    assert_eq!(child.err(), Some(ContextError::Cancelled));
    assert_eq!(parent.err(), None);
    assert_eq!(sibling.err(), None);
    assert!(parent.done().try_recv().is_err());
    assert!(!parent.done().is_closed());
}

#[test]
fn deadline_reports_deadline_exceeded_down_the_tree() {
    init_test_logging();
    let rt = test_runtime(2);
    let errs = rt
        .block_on(async {
            let (ctx, _cancel) = context::background().with_timeout(Duration::from_millis(20));
            let (child, _c) = ctx.with_cancel();
            let first = child.cancelled().await;
            (first, ctx.err())
        })
        .expect("root");
    assert_eq!(
        errs,
        (ContextError::DeadlineExceeded, Some(ContextError::DeadlineExceeded))
    );
}

#[test]
fn done_races_work_in_select() {
    init_test_logging();
    let rt = test_runtime(2);
    let stopped_by_context = rt
        .block_on(async {
            let (ctx, _cancel) = context::background().with_timeout(Duration::from_millis(10));
            let (_jobs_tx, jobs_rx) = strand::bounded::<u32>(0);
            let done = ctx.done();
            let mut sel = Select::new();
            let job = sel.recv(&jobs_rx);
            let stop = sel.recv(&done);
            let out = sel.select().await;
            !out.is(&job) && out.is(&stop)
        })
        .expect("root");
    assert!(stopped_by_context);
}

#[test]
fn cancel_crosses_dropped_intermediate_contexts() {
    init_test_logging();
    test_phase!("cancel_crosses_dropped_intermediate_contexts");
    static TAG: ContextKey<u32> = ContextKey::new("tag");
    let rt = test_runtime(2);
    let handle = rt.handle();
    let (err, tag) = rt
        .block_on(async move {
            let (parent, cancel) = context::background().with_cancel();
            let (middle, _middle_cancel) = parent.with_value(&TAG, 9).with_cancel();
            let (leaf, _leaf_cancel) = middle.with_cancel();
            drop(middle);
            let tag = leaf.value(&TAG).map(|v| *v);
            let waiter = handle.spawn(async move { leaf.cancelled().await });
            strand::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
            (waiter.await.expect("waiter"), tag)
        })
        .expect("root");
    assert_with_log!(
        err == ContextError::Cancelled,
        "leaf observed parent cancel",
        ContextError::Cancelled,
        err
    );
    assert_eq!(tag, Some(9));
    test_complete!("cancel_crosses_dropped_intermediate_contexts");
}

#[test]
fn held_done_receiver_never_fires_without_cancel() {
    init_test_logging();
    static TAG: ContextKey<u32> = ContextKey::new("tag");
    let rt = test_runtime(2);
    let (parent, cancel) = context::background().with_cancel();
    let done = parent.with_value(&TAG, 1).done();
    let root_done = context::background().done();
    drop(parent);
    let timed_out = rt
        .block_on(async move {
            let mut sel = Select::new();
            sel.recv(&done);
            sel.recv(&root_done);
            sel.timeout(Duration::from_millis(30));
            sel.select().await.is_timeout()
        })
        .expect("root");
    assert!(timed_out, "done fired although nothing was cancelled");
    drop(cancel);
}

#[test]
fn deadline_set_outside_runtime_wakes_waiter() {
    init_test_logging();
    let (ctx, _cancel) = context::background().with_timeout(Duration::from_millis(200));
    let rt = test_runtime(2);
    let err = rt
        .block_on(async move { ctx.cancelled().await })
        .expect("a pending standalone deadline is not a deadlock");
    assert_eq!(err, ContextError::DeadlineExceeded);
}
