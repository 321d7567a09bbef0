//! End-to-end walkthroughs of the main delivery paths.

mod common;

use chrono::Duration;
use tokio::sync::watch;

use common::{Harness, LEASE_TTL_SECS, eventually};
use courier_core::app::{Dispatch, Finalized, ResultListener};
use courier_core::domain::{LeaseOutcome, ResultCode, TaskStatus};
use courier_core::impls::Behaviour;

#[tokio::test]
async fn success_deletes_task_and_credits_account() {
    let h = Harness::new();
    let task = h.pending(0, 5).await;
    let mut w = h.worker("alice", Behaviour::AlwaysOk);
    let dispatcher = h.dispatcher(&w);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = ResultListener::new(
        w.reports.take().unwrap(),
        w.in_flight.clone(),
        w.handler.clone(),
        w.identity.clone(),
    );
    let listening = tokio::spawn(listener.run(shutdown_rx));

    let leased = w
        .leases
        .try_lease(task.id, w.identity.worker_id, common::start())
        .await
        .unwrap()
        .leased()
        .unwrap();
    let dispatched = dispatcher.dispatch(&leased, &w.identity).await.unwrap();
    assert_eq!(dispatched, Dispatch::Sent { slot: 0, parts: 1 });

    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move { store.peek(task.id).await.is_none() }
        })
        .await
    );
    assert!((h.store.balance(&w.identity.account_id).await - 0.20).abs() < 1e-9);

    shutdown_tx.send(true).unwrap();
    listening.await.unwrap();
}

#[tokio::test]
async fn third_failure_quarantines_task() {
    let h = Harness::new();
    let w = h.worker("alice", Behaviour::Silent);
    let task = h
        .leased(w.identity.worker_id, 2, common::start() + Duration::seconds(60))
        .await;

    let result = w
        .handler
        .on_result(
            common::claim(&task),
            ResultCode::GenericFailure.into_outcome(),
            &w.identity,
        )
        .await
        .unwrap();

    assert_eq!(result, Finalized::Quarantined { retry_count: 3 });
    let doc = h.store.peek(task.id).await.unwrap();
    assert_eq!(doc.status, TaskStatus::PermanentlyFailed);
    assert_eq!(doc.retry_count, 3);
    assert_eq!(doc.last_error_code, Some(ResultCode::GENERIC_FAILURE));
    assert_eq!(doc.lease_holder, None);
    assert_eq!(doc.lease_expires_at, None);
}

#[tokio::test]
async fn expired_lease_is_reclaimed_by_another_worker() {
    let h = Harness::new();
    let crashed = h.worker("alice", Behaviour::Silent);
    let rescuer = h.worker("bob", Behaviour::Silent);
    let task = h
        .leased(crashed.identity.worker_id, 1, common::start() - Duration::seconds(1))
        .await;

    let outcome = rescuer
        .leases
        .try_lease(task.id, rescuer.identity.worker_id, common::start())
        .await
        .unwrap();

    let leased = outcome.leased().unwrap();
    assert_eq!(leased.retry_count, 2);
    assert_eq!(leased.status, TaskStatus::Sending);
    assert_eq!(leased.lease_holder, Some(rescuer.identity.worker_id));
    assert_eq!(
        leased.lease_expires_at,
        Some(common::start() + Duration::seconds(LEASE_TTL_SECS))
    );
}

#[tokio::test]
async fn reclaiming_cycle_sends_the_task_again() {
    let h = Harness::new();
    let crashed = h.worker("alice", Behaviour::Silent);
    let rescuer = h.worker("bob", Behaviour::Silent);
    let task = h
        .leased(crashed.identity.worker_id, 1, common::start() - Duration::seconds(1))
        .await;
    let poll = h.poll_loop(&rescuer);

    let report = poll.run_cycle().await.unwrap();

    assert_eq!(report.reclaimed, 1);
    assert_eq!(rescuer.transport.sent_count(), 1);
    assert_eq!(crashed.transport.sent_count(), 0);
    let doc = h.store.peek(task.id).await.unwrap();
    assert_eq!(doc.retry_count, 2);
    assert!(doc.is_leased_by(rescuer.identity.worker_id));
    assert_eq!(rescuer.transport.sent()[0].token, common::claim(&doc));
    assert_eq!(rescuer.in_flight.len().await, 1);
}

#[tokio::test]
async fn exhausted_pending_task_is_deleted_without_dispatch() {
    let h = Harness::new();
    let task = h.pending(3, 5).await;
    let w = h.worker("alice", Behaviour::AlwaysOk);
    let poll = h.poll_loop(&w);

    let report = poll.run_cycle().await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.leased, 0);
    assert!(h.store.peek(task.id).await.is_none());
    assert_eq!(w.transport.sent_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lease_has_exactly_one_winner() {
    let h = Harness::new();
    let task = h.pending(0, 5).await;
    let a = h.worker("alice", Behaviour::Silent);
    let b = h.worker("bob", Behaviour::Silent);

    let (ra, rb) = tokio::join!(
        a.leases.try_lease(task.id, a.identity.worker_id, common::start()),
        b.leases.try_lease(task.id, b.identity.worker_id, common::start()),
    );
    let outcomes = [ra.unwrap(), rb.unwrap()];

    let winners = outcomes.iter().filter(|o| o.is_leased()).count();
    let skipped = outcomes
        .iter()
        .filter(|o| **o == LeaseOutcome::SkippedAlreadyLeased)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(skipped, 1);

    let doc = h.store.peek(task.id).await.unwrap();
    let winner = if outcomes[0].is_leased() { &a } else { &b };
    assert!(doc.is_leased_by(winner.identity.worker_id));
}

#[tokio::test]
async fn multipart_failure_on_one_segment_fails_the_task() {
    let h = Harness::new();
    let mut w = h.worker("alice", Behaviour::Silent);
    let dispatcher = h.dispatcher(&w);
    let mut task = h.pending(0, 5).await;
    task.payload = "x".repeat(400);
    h.store.insert(task.clone()).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = ResultListener::new(
        w.reports.take().unwrap(),
        w.in_flight.clone(),
        w.handler.clone(),
        w.identity.clone(),
    );
    let listening = tokio::spawn(listener.run(shutdown_rx));

    let leased = w
        .leases
        .try_lease(task.id, w.identity.worker_id, common::start())
        .await
        .unwrap()
        .leased()
        .unwrap();
    assert_eq!(
        dispatcher.dispatch(&leased, &w.identity).await.unwrap(),
        Dispatch::Sent { slot: 0, parts: 3 }
    );

    let claim = common::claim(&leased);
    w.transport.report(claim, 0, ResultCode::OK);
    w.transport.report(claim, 1, ResultCode::NO_SERVICE);
    w.transport.report(claim, 2, ResultCode::OK);

    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                store
                    .peek(task.id)
                    .await
                    .is_some_and(|doc| doc.status == TaskStatus::Failed)
            }
        })
        .await
    );
    let doc = h.store.peek(task.id).await.unwrap();
    assert_eq!(doc.retry_count, 1);
    assert_eq!(doc.last_error.as_deref(), Some("no service"));
    assert_eq!(doc.last_error_code, Some(ResultCode::NO_SERVICE));

    shutdown_tx.send(true).unwrap();
    listening.await.unwrap();
    assert_eq!(h.store.balance(&w.identity.account_id).await, 0.0);
}
