//! Integration tests for the worker pool and dispatcher.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use relaymq_inbound::{
    BranchRegistry, DeliveryDispatcher, InboundConfig, RelayError, WorkerPool,
};

use common::{
    test_message, AckRecord, EndpointBehavior, RecordingAcknowledger, RecordingBroker,
    ScriptedFactory,
};

async fn make_pool(
    config: InboundConfig,
    factory: Arc<ScriptedFactory>,
    acknowledger: Arc<RecordingAcknowledger>,
) -> Arc<WorkerPool> {
    Arc::new(
        WorkerPool::new(
            config,
            1,
            RecordingBroker::new(),
            factory,
            acknowledger,
            Arc::new(BranchRegistry::new()),
        )
        .await,
    )
}

fn pool_config(steady: usize, max: usize) -> InboundConfig {
    InboundConfig::builder()
        .pool_steady_size(steady)
        .pool_max_size(max)
        .redelivery_attempts(1)
        .redelivery_interval(Duration::from_millis(5))
        .endpoint_lease_attempts(2)
        .endpoint_lease_backoff(Duration::from_millis(1))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_pool_grows_on_demand_up_to_max() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 2), factory, acknowledger).await;

    assert_eq!(pool.total(), 1);
    let first = pool.acquire().await.unwrap();
    // Slack: a second worker is constructed only on demand.
    let second = pool.acquire().await.unwrap();
    assert_eq!(pool.total(), 2);
    assert_ne!(first.id(), second.id());

    // At max, acquisition parks until a worker is returned.
    let blocked = timeout(Duration::from_millis(50), pool.acquire()).await;
    assert!(blocked.is_err());
    assert_eq!(pool.total(), 2);

    pool.release(first).await;
    let reacquired = timeout(Duration::from_millis(200), pool.acquire())
        .await
        .expect("release must wake a parked acquirer")
        .unwrap();
    assert_eq!(pool.total(), 2);

    pool.release(second).await;
    pool.release(reacquired).await;
    assert_eq!(pool.idle_count(), 2);
}

#[tokio::test]
async fn test_acquire_hands_each_worker_to_one_caller() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(4, 4), factory, acknowledger).await;

    let mut ids = Vec::new();
    let mut workers = Vec::new();
    for _ in 0..4 {
        let worker = pool.acquire().await.unwrap();
        ids.push(worker.id());
        workers.push(worker);
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4, "no worker may be handed out twice");

    for worker in workers {
        pool.release(worker).await;
    }
}

#[tokio::test]
async fn test_remove_reclaims_slack() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 1), factory, acknowledger).await;

    let worker = pool.acquire().await.unwrap();
    let first_id = worker.id();
    pool.remove(worker).await;
    assert_eq!(pool.total(), 0);

    // The reclaimed slot allows a fresh worker up to the original max.
    let replacement = pool.acquire().await.unwrap();
    assert_ne!(replacement.id(), first_id);
    assert_eq!(pool.total(), 1);
    pool.release(replacement).await;
}

#[tokio::test]
async fn test_shutdown_fails_pending_and_future_acquires() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 1), factory, acknowledger).await;

    let held = pool.acquire().await.unwrap();

    // Park an acquirer, then shut down: it must fail, not hang.
    let parked = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.shutdown().await;
    let parked_result = timeout(Duration::from_millis(200), parked)
        .await
        .expect("shutdown must wake parked acquirers")
        .unwrap();
    assert!(matches!(parked_result, Err(RelayError::PoolClosed(_))));

    // New acquisitions fail immediately.
    assert!(matches!(
        pool.acquire().await,
        Err(RelayError::PoolClosed(_))
    ));

    // The in-flight worker is not re-pooled on return.
    pool.release(held).await;
    assert_eq!(pool.total(), 0);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn test_shutdown_releases_idle_endpoint_leases() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(2, 2), Arc::clone(&factory), acknowledger).await;

    pool.shutdown().await;
    assert_eq!(
        factory
            .counters()
            .releases
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
    assert_eq!(pool.total(), 0);
}

#[tokio::test]
async fn test_invalidate_idle_workers() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 1), factory, acknowledger).await;

    pool.invalidate_idle();
    let worker = pool.acquire().await.unwrap();
    assert!(!worker.is_valid());
    pool.remove(worker).await;
}

#[tokio::test]
async fn test_drain_returns_immediately_when_all_idle() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(2, 2), factory, acknowledger).await;

    timeout(Duration::from_millis(100), pool.drain_and_wait())
        .await
        .expect("drain must not block while every worker is idle");
}

#[tokio::test]
async fn test_shutdown_during_inflight_delivery() {
    // One worker, mid-delivery when shutdown arrives.
    let factory = ScriptedFactory::new(EndpointBehavior::DeliverSlow(Duration::from_millis(150)));
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 1), factory, Arc::clone(&acknowledger)).await;
    let dispatcher = DeliveryDispatcher::new(Arc::clone(&pool), false);

    dispatcher.deliver(test_message(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    pool.shutdown().await;

    // An acquire made after shutdown fails immediately rather than blocking.
    let denied = timeout(Duration::from_millis(20), pool.acquire())
        .await
        .expect("acquire after shutdown must fail fast");
    assert!(matches!(denied, Err(RelayError::PoolClosed(_))));

    // Drain returns only once the in-flight worker has released.
    timeout(Duration::from_secs(2), dispatcher.drain())
        .await
        .expect("drain must complete after the in-flight delivery returns");
    assert_eq!(pool.total(), 0);
    assert_eq!(acknowledger.records().len(), 1);
}

#[tokio::test]
async fn test_dispatcher_end_to_end() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 1), factory, Arc::clone(&acknowledger)).await;
    let dispatcher = DeliveryDispatcher::new(Arc::clone(&pool), false);

    dispatcher.deliver(test_message(21)).await.unwrap();
    dispatcher.drain().await;

    assert_eq!(
        acknowledger.records(),
        vec![AckRecord::Acknowledged {
            message: 21,
            delivery_count: 1,
        }]
    );
    assert_eq!(pool.idle_count(), 1);
}

#[tokio::test]
async fn test_serialized_delivery_runs_inline() {
    let factory = ScriptedFactory::new(EndpointBehavior::Deliver);
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 1), factory, Arc::clone(&acknowledger)).await;
    let dispatcher = DeliveryDispatcher::new(pool, true);
    assert!(dispatcher.is_serialized());

    // Inline mode: the acknowledgment is visible as soon as deliver returns.
    dispatcher.deliver(test_message(31)).await.unwrap();
    assert_eq!(acknowledger.records().len(), 1);
    dispatcher.deliver(test_message(32)).await.unwrap();
    assert_eq!(acknowledger.records().len(), 2);
}

#[tokio::test]
async fn test_exhausted_pool_applies_backpressure_to_dispatcher() {
    let factory = ScriptedFactory::new(EndpointBehavior::DeliverSlow(Duration::from_millis(100)));
    let acknowledger = RecordingAcknowledger::new();
    let pool = make_pool(pool_config(1, 1), factory, Arc::clone(&acknowledger)).await;
    let dispatcher = DeliveryDispatcher::new(pool, false);

    dispatcher.deliver(test_message(41)).await.unwrap();

    // The sole worker is in flight; the next dispatch parks on acquire.
    let second = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.deliver(test_message(42)).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!second.is_finished());

    second.await.unwrap().unwrap();
    dispatcher.drain().await;
    assert_eq!(acknowledger.records().len(), 2);
}
