//! Worker pool integration tests against the in-memory store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use ccbuilder_db::MemoryStore;
use ccbuilder_jobs::defaults::ORPHANED_JOB_ERROR;
use ccbuilder_jobs::mock::MockEngine;
use ccbuilder_jobs::{
    AssignmentTable, ChainParameters, HelixType, JobQueue, JobStatus, OptJob, Poller, PoolHandle,
    Register, Store, StoreConnector, WorkerConfig, WorkerEvent, WorkerPool,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    store: MemoryStore,
    engine: MockEngine,
    queue: Arc<JobQueue>,
    assignments: Arc<AssignmentTable>,
    poller: Poller,
    events: broadcast::Receiver<WorkerEvent>,
    handle: PoolHandle,
}

async fn start(engine: MockEngine, workers: usize) -> Harness {
    let store = MemoryStore::new();
    let queue = Arc::new(JobQueue::new());
    let config = WorkerConfig::default()
        .with_workers(workers)
        .with_retry_attempts(2)
        .with_retry_backoff_ms(1);

    let pool = WorkerPool::new(
        Arc::new(store.handle()),
        Arc::new(engine.clone()),
        queue.clone(),
        config,
    );
    let assignments = pool.assignments();
    let mut events = pool.events();
    let poller = Poller::new(store.open().await.unwrap(), queue.clone(), assignments.clone());
    let handle = pool.start();

    for _ in 0..workers {
        wait_for(&mut events, |e| matches!(e, WorkerEvent::WorkerStarted { .. })).await;
    }

    Harness {
        store,
        engine,
        queue,
        assignments,
        poller,
        events,
        handle,
    }
}

fn chain(sequence: &str) -> ChainParameters {
    ChainParameters {
        radius: 5.0,
        pitch: 200.0,
        interface_angle: 26.0,
        register: Register::A,
        sequence: sequence.to_string(),
        orientation: false,
        z_shift: 0.0,
        super_helical_rotation: 0.0,
        linked_shr: false,
    }
}

async fn submit(store: &MemoryStore, helix_type: HelixType, sequences: &[&str]) -> OptJob {
    let mut ids = Vec::new();
    for sequence in sequences {
        ids.push(
            store
                .parameters()
                .lookup_or_insert(&chain(sequence))
                .await
                .unwrap(),
        );
    }
    let job = OptJob::submitted(helix_type, ids, 298.0);
    store.jobs().insert(&job).await.unwrap();
    job
}

async fn wait_for<F>(events: &mut broadcast::Receiver<WorkerEvent>, predicate: F) -> WorkerEvent
where
    F: Fn(&WorkerEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}

async fn wait_until<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

async fn job(store: &MemoryStore, id: Uuid) -> OptJob {
    store.jobs().get(id).await.unwrap().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_runs_to_completion() {
    let mut h = start(MockEngine::new(), 2).await;
    let submitted = submit(&h.store, HelixType::Alpha, &["EIAALKQE", "EIAALKQE"]).await;

    let report = h.poller.tick().await.unwrap();
    assert_eq!(report.claimed, 1);

    let event = wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
    assert!(matches!(
        event,
        WorkerEvent::JobCompleted { job_id, model_id, .. } if job_id == submitted.id && model_id == submitted.id
    ));

    let done = job(&h.store, submitted.id).await;
    assert_eq!(done.status, JobStatus::Complete);
    assert_eq!(done.model_id, Some(submitted.id));
    assert_eq!(done.oligomeric_state, 2);
    assert!(done.time_finished.unwrap() >= done.time_submitted);
    assert_eq!(done.final_parameters.unwrap().sequence, "EIAALKQE");

    let model = h.store.models().get(submitted.id).await.unwrap().unwrap();
    let chains = vec![chain("EIAALKQE"), chain("EIAALKQE")];
    assert_eq!(model.pdb, MockEngine::expected_output(&chains, HelixType::Alpha).pdb);
    assert_eq!(h.engine.optimise_call_count(), 1);

    let assignments = h.assignments.clone();
    wait_until(|| {
        let assignments = assignments.clone();
        async move { assignments.snapshot().iter().all(Option::is_none) }
    })
    .await;

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_error_fails_job_without_model() {
    let mut h = start(MockEngine::new().with_optimise_failure("diverged"), 1).await;
    let submitted = submit(&h.store, HelixType::Collagen, &["GPPGPPGPP"]).await;

    h.poller.tick().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;

    let failed = job(&h.store, submitted.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("diverged"));
    assert!(failed.model_id.is_none());
    assert!(h.store.models().get(submitted.id).await.unwrap().is_none());

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_helix_type_fails_only_that_job() {
    let mut h = start(MockEngine::new(), 1).await;

    let mut bad = submit(&h.store, HelixType::Alpha, &["LKAIAQE"]).await;
    bad.id = Uuid::now_v7();
    bad.helix_type = "BETA".to_string();
    h.store.jobs().insert(&bad).await.unwrap();

    h.poller.tick().await.unwrap();

    let mut finished = Vec::new();
    for _ in 0..2 {
        finished.push(
            wait_for(&mut h.events, |e| {
                matches!(e, WorkerEvent::JobFailed { .. } | WorkerEvent::JobCompleted { .. })
            })
            .await,
        );
    }
    assert!(finished
        .iter()
        .any(|e| matches!(e, WorkerEvent::JobFailed { job_id, .. } if *job_id == bad.id)));
    assert!(finished
        .iter()
        .any(|e| matches!(e, WorkerEvent::JobCompleted { job_id, .. } if *job_id != bad.id)));

    let stored = job(&h.store, bad.id).await;
    assert!(stored.error_message.unwrap().contains("Unknown helix type"));
    assert_eq!(h.engine.optimise_call_count(), 1);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_parameters_fail_job() {
    let mut h = start(MockEngine::new(), 1).await;
    let orphan = OptJob::submitted(HelixType::Alpha, vec![Uuid::now_v7()], 1.0);
    h.store.jobs().insert(&orphan).await.unwrap();

    h.poller.tick().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;

    let failed = job(&h.store, orphan.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("chain parameters"));
    assert_eq!(h.engine.optimise_call_count(), 0);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crashed_worker_job_is_reaped_and_worker_replaced() {
    let mut h = start(MockEngine::new().with_panic_on_optimise(), 1).await;
    let submitted = submit(&h.store, HelixType::Alpha, &["LKAIAQE"]).await;

    h.poller.tick().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;

    // The replacement worker announces itself once the crash is handled.
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::WorkerStarted { slot: 0 })).await;
    assert_eq!(h.assignments.holders(submitted.id), 0);
    assert_eq!(job(&h.store, submitted.id).await.status, JobStatus::Running);

    let report = h.poller.tick().await.unwrap();
    assert_eq!(report.reaped, 1);

    let reaped = job(&h.store, submitted.id).await;
    assert_eq!(reaped.status, JobStatus::Failed);
    assert_eq!(reaped.error_message.as_deref(), Some(ORPHANED_JOB_ERROR));
    assert!(h.store.models().get(submitted.id).await.unwrap().is_none());

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_not_queued_is_skipped() {
    let h = start(MockEngine::new(), 1).await;
    let submitted = submit(&h.store, HelixType::Alpha, &["LKAIAQE"]).await;

    // Bypass the poller: the job is still SUBMITTED.
    h.queue.push(submitted.id).await;
    let queue = h.queue.clone();
    wait_until(|| {
        let queue = queue.clone();
        async move { queue.is_empty().await }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(job(&h.store, submitted.id).await.status, JobStatus::Submitted);
    assert_eq!(h.engine.optimise_call_count(), 0);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_survives_store_outage() {
    let mut h = start(MockEngine::new(), 1).await;
    let submitted = submit(&h.store, HelixType::Alpha, &["LKAIAQE"]).await;
    h.store
        .jobs()
        .transition(submitted.id, JobStatus::Submitted, JobStatus::Queued)
        .await
        .unwrap();

    h.store.set_available(false);
    h.queue.push(submitted.id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.optimise_call_count(), 0);

    h.store.set_available(true);
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
    assert_eq!(job(&h.store, submitted.id).await.status, JobStatus::Complete);

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_completion_survives_store_outage() {
    let gate = Arc::new(Semaphore::new(0));
    let mut h = start(MockEngine::new().with_gate(gate.clone()), 1).await;
    let submitted = submit(&h.store, HelixType::Alpha, &["LKAIAQE"]).await;

    h.poller.tick().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;

    // The optimisation finishes while the store is down.
    h.store.set_available(false);
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.assignments.holders(submitted.id), 1);

    h.store.set_available(true);
    let event = wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
    assert!(matches!(event, WorkerEvent::JobCompleted { job_id, .. } if job_id == submitted.id));

    assert_eq!(h.poller.tick().await.unwrap().reaped, 0);
    let finished = job(&h.store, submitted.id).await;
    assert_eq!(finished.status, JobStatus::Complete);
    assert_eq!(finished.model_id, Some(submitted.id));
    assert!(h.store.models().get(submitted.id).await.unwrap().is_some());

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_survives_store_outage() {
    let gate = Arc::new(Semaphore::new(0));
    let engine = MockEngine::new()
        .with_gate(gate.clone())
        .with_optimise_failure("search diverged");
    let mut h = start(engine, 1).await;
    let submitted = submit(&h.store, HelixType::Alpha, &["LKAIAQE"]).await;

    h.poller.tick().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;

    h.store.set_available(false);
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.assignments.holders(submitted.id), 1);

    h.store.set_available(true);
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;

    assert_eq!(h.poller.tick().await.unwrap().reaped, 0);
    let failed = job(&h.store, submitted.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_message.unwrap().contains("search diverged"));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_abandons_result_during_store_outage() {
    let gate = Arc::new(Semaphore::new(0));
    let mut h = start(MockEngine::new().with_gate(gate.clone()), 1).await;
    let submitted = submit(&h.store, HelixType::Alpha, &["LKAIAQE"]).await;

    h.poller.tick().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;

    h.store.set_available(false);
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(WAIT, h.handle.shutdown())
        .await
        .expect("shutdown blocked on the store")
        .unwrap();
    assert_eq!(h.assignments.holders(submitted.id), 0);

    // Left running for the reaper.
    h.store.set_available(true);
    assert_eq!(job(&h.store, submitted.id).await.status, JobStatus::Running);
    assert_eq!(h.poller.tick().await.unwrap().reaped, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_runs_at_most_one_job_per_worker() {
    let gate = Arc::new(Semaphore::new(0));
    let mut h = start(MockEngine::new().with_gate(gate.clone()), 2).await;

    let mut ids = Vec::new();
    for sequence in ["LKAIAQE", "EIAALKQE", "KIAALKE", "EIAALEQ"] {
        ids.push(submit(&h.store, HelixType::Alpha, &[sequence]).await.id);
    }

    assert_eq!(h.poller.tick().await.unwrap().claimed, 4);
    for _ in 0..2 {
        wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    }

    let held: Vec<Uuid> = h.assignments.snapshot().into_iter().flatten().collect();
    assert_eq!(held.len(), 2);
    assert_ne!(held[0], held[1]);
    // FIFO: the two oldest jobs start first.
    assert!(held.contains(&ids[0]) && held.contains(&ids[1]));
    assert_eq!(h.queue.len().await, 2);

    gate.add_permits(4);
    for _ in 0..4 {
        wait_for(&mut h.events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
    }
    for id in ids {
        assert_eq!(job(&h.store, id).await.status, JobStatus::Complete);
    }

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_every_worker() {
    let h = start(MockEngine::new(), 3).await;
    let mut events = h.handle.events();

    h.handle.shutdown().await.unwrap();

    let mut stopped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::WorkerStopped { slot } = event {
            stopped.push(slot);
        }
    }
    stopped.sort_unstable();
    assert_eq!(stopped, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_disabled_pool_starts_no_workers() {
    let store = MemoryStore::new();
    let pool = WorkerPool::new(
        Arc::new(store.handle()),
        Arc::new(MockEngine::new()),
        Arc::new(JobQueue::new()),
        WorkerConfig::default().with_enabled(false),
    );
    let mut events = pool.events();
    let handle = pool.start();
    handle.shutdown().await.unwrap();

    assert!(events.try_recv().is_err());
}
