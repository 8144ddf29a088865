//! Tests for run-set aggregation: recomputed counts, status derivation,
//! cancellation convergence, and poll bookkeeping.

mod support;

use std::sync::Arc;

use runtrack::store::{RunSetStore, RunStore};
use runtrack::{
    MemoryStore, NoopMetrics, RunCompletionHandler, RunSet, RunSetStatus, RunSetsPoller,
    RunStatus, SmartRunsPoller,
};
use support::{
    make_run, test_poller_config, test_run_set, FakeEngine, FakeOutputBuilder, FakeRecordStore,
};

struct Fixture {
    store: MemoryStore,
    engine: Arc<FakeEngine>,
    poller: RunSetsPoller,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let engine = Arc::new(FakeEngine::new());
    let completion = Arc::new(RunCompletionHandler::new(
        Arc::new(store.clone()),
        engine.clone(),
        Arc::new(FakeRecordStore::new()),
        Arc::new(FakeOutputBuilder::new()),
        Arc::new(NoopMetrics),
    ));
    let runs_poller = Arc::new(SmartRunsPoller::new(
        engine.clone(),
        completion,
        test_poller_config(),
        Arc::new(NoopMetrics),
    ));
    let poller = RunSetsPoller::new(
        runs_poller,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        test_poller_config(),
        Arc::new(NoopMetrics),
    );
    Fixture {
        store,
        engine,
        poller,
    }
}

#[tokio::test]
async fn recomputes_status_and_counts_from_member_runs() {
    let fx = fixture();
    let set = test_run_set();
    fx.store.create_run_set(&set).await.unwrap();

    let failing = make_run(&set, RunStatus::Running, "e-failing");
    let completing = make_run(&set, RunStatus::Running, "e-completing");
    for run in [&failing, &completing] {
        fx.store.create_run(run).await.unwrap();
    }
    fx.engine.set_summary("e-failing", RunStatus::ExecutorError);
    fx.engine.set_summary("e-completing", RunStatus::Complete);

    let result = fx.poller.update_run_sets(vec![set.clone()]).await;

    assert_eq!(result.total_eligible, 1);
    assert_eq!(result.total_updated, 1);
    assert!(result.fully_updated);

    let stored = fx.store.run_set(set.run_set_id).unwrap();
    assert_eq!(stored.status, RunSetStatus::Error);
    assert_eq!(stored.run_count, 2);
    assert_eq!(stored.error_count, 1);

    // The returned list reflects the re-fetched row.
    assert_eq!(result.updated_list[0].status, RunSetStatus::Error);
}

#[tokio::test]
async fn set_stays_running_while_members_are_in_flight() {
    let fx = fixture();
    let set = RunSet {
        run_count: 1,
        ..test_run_set()
    };
    fx.store.create_run_set(&set).await.unwrap();
    let run = make_run(&set, RunStatus::Running, "e1");
    fx.store.create_run(&run).await.unwrap();
    fx.engine.set_summary("e1", RunStatus::Running);

    fx.poller.update_run_sets(vec![set.clone()]).await;

    let stored = fx.store.run_set(set.run_set_id).unwrap();
    assert_eq!(stored.status, RunSetStatus::Running);
    assert_eq!(stored.run_count, 1);
    // Nothing changed, so only the poll timestamp moves.
    assert_eq!(stored.last_modified_timestamp, set.last_modified_timestamp);
    assert!(stored.last_polled_timestamp.is_some());
}

#[tokio::test]
async fn canceling_set_converges_once_all_runs_are_canceled() {
    let fx = fixture();
    let set = RunSet {
        status: RunSetStatus::Canceling,
        run_count: 2,
        ..test_run_set()
    };
    fx.store.create_run_set(&set).await.unwrap();

    let first = make_run(&set, RunStatus::Canceling, "e1");
    let second = make_run(&set, RunStatus::Canceling, "e2");
    for run in [&first, &second] {
        fx.store.create_run(run).await.unwrap();
    }
    fx.engine.set_summary("e1", RunStatus::Canceled);
    fx.engine.set_summary("e2", RunStatus::Canceled);

    fx.poller.update_run_sets(vec![set.clone()]).await;

    assert_eq!(fx.store.run(first.run_id).unwrap().status, RunStatus::Canceled);
    assert_eq!(fx.store.run(second.run_id).unwrap().status, RunStatus::Canceled);

    let stored = fx.store.run_set(set.run_set_id).unwrap();
    assert_eq!(stored.status, RunSetStatus::Canceled);
    assert_eq!(stored.run_count, 2);
    assert_eq!(stored.error_count, 0);
}

#[tokio::test]
async fn canceling_set_waits_for_stragglers() {
    let fx = fixture();
    let set = RunSet {
        status: RunSetStatus::Canceling,
        run_count: 2,
        ..test_run_set()
    };
    fx.store.create_run_set(&set).await.unwrap();

    let done = make_run(&set, RunStatus::Canceled, "e-done");
    let straggler = make_run(&set, RunStatus::Canceling, "e-straggler");
    for run in [&done, &straggler] {
        fx.store.create_run(run).await.unwrap();
    }
    fx.engine.set_summary("e-straggler", RunStatus::Canceling);

    fx.poller.update_run_sets(vec![set.clone()]).await;

    assert_eq!(
        fx.store.run_set(set.run_set_id).unwrap().status,
        RunSetStatus::Canceling
    );
}

#[tokio::test]
async fn terminal_sets_are_skipped() {
    let fx = fixture();
    let set = RunSet {
        status: RunSetStatus::Complete,
        ..test_run_set()
    };
    fx.store.create_run_set(&set).await.unwrap();

    let result = fx.poller.update_run_sets(vec![set.clone()]).await;

    assert_eq!(result.total_eligible, 0);
    assert_eq!(result.total_updated, 0);
    assert!(result.fully_updated);
    assert!(fx.engine.polled().is_empty());
}

#[tokio::test]
async fn update_all_targets_non_terminal_sets_only() {
    let fx = fixture();
    let active = test_run_set();
    let finished = RunSet {
        status: RunSetStatus::Complete,
        ..test_run_set()
    };
    fx.store.create_run_set(&active).await.unwrap();
    fx.store.create_run_set(&finished).await.unwrap();

    let result = fx.poller.update_all().await.unwrap();

    assert_eq!(result.total_eligible, 1);
    assert_eq!(result.total_updated, 1);
}

#[tokio::test]
async fn set_with_no_runs_left_derives_complete() {
    let fx = fixture();
    let set = RunSet {
        run_count: 1,
        ..test_run_set()
    };
    fx.store.create_run_set(&set).await.unwrap();
    let run = make_run(&set, RunStatus::Complete, "e1");
    fx.store.create_run(&run).await.unwrap();

    fx.poller.update_run_sets(vec![set.clone()]).await;

    let stored = fx.store.run_set(set.run_set_id).unwrap();
    assert_eq!(stored.status, RunSetStatus::Complete);
    assert_eq!(stored.run_count, 1);
    assert_eq!(stored.error_count, 0);
}
