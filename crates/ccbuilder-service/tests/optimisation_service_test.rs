//! Optimisation submission through to result retrieval, with a real worker
//! pool and poller over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use ccbuilder_db::MemoryStore;
use ccbuilder_jobs::mock::MockEngine;
use ccbuilder_jobs::{JobQueue, PoolHandle, Poller, WorkerConfig, WorkerEvent, WorkerPool};
use ccbuilder_service::{
    ChainParameters, Error, HelixType, JobStatus, OptJob, OptimisationService, Register, Store,
};

fn chain(sequence: &str, radius: f64) -> ChainParameters {
    ChainParameters {
        radius,
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

struct Harness {
    store: MemoryStore,
    service: OptimisationService,
    poller: Poller,
    events: broadcast::Receiver<WorkerEvent>,
    handle: PoolHandle,
}

fn start(engine: MockEngine) -> Harness {
    let store = MemoryStore::new();
    let queue = Arc::new(JobQueue::new());
    let pool = WorkerPool::new(
        Arc::new(store.handle()),
        Arc::new(engine),
        queue.clone(),
        WorkerConfig::default()
            .with_workers(2)
            .with_retry_attempts(2)
            .with_retry_backoff_ms(1),
    );
    let events = pool.events();
    let poller = Poller::new(Arc::new(store.handle()), queue, pool.assignments());
    let service = OptimisationService::new(Arc::new(store.handle()));
    let handle = pool.start();

    Harness {
        store,
        service,
        poller,
        events,
        handle,
    }
}

/// Wait for the terminal event of `job_id`.
async fn finished(events: &mut broadcast::Receiver<WorkerEvent>, job_id: Uuid) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            let finished_id = match &event {
                WorkerEvent::JobCompleted { job_id, .. } | WorkerEvent::JobFailed { job_id, .. } => {
                    Some(*job_id)
                }
                _ => None,
            };
            if finished_id == Some(job_id) {
                return event;
            }
        }
    })
    .await
    .expect("job did not finish in time")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_lifecycle_to_complete() {
    let mut h = start(MockEngine::new());
    let chains = [chain("EIAALKQE", 5.0), chain("EIAALKQE", 5.0)];

    let job_id = h
        .service
        .submit_optimisation(&chains, HelixType::Alpha, 2.5)
        .await
        .unwrap();
    assert_eq!(h.service.poll_status(job_id).await.unwrap(), JobStatus::Submitted);

    assert_eq!(h.poller.tick().await.unwrap().claimed, 1);
    let event = finished(&mut h.events, job_id).await;
    assert!(matches!(event, WorkerEvent::JobCompleted { model_id, .. } if model_id == job_id));

    assert_eq!(h.service.poll_status(job_id).await.unwrap(), JobStatus::Complete);
    let job = h.service.job(job_id).await.unwrap();
    assert!(job.time_finished.unwrap() >= job.time_submitted);
    assert_eq!(job.model_id, Some(job_id));

    let result = h.service.retrieve_result(job_id).await.unwrap();
    let expected = MockEngine::expected_output(&chains, HelixType::Alpha);
    assert_eq!(result.oligomeric_state, 2);
    assert_eq!(result.parameters.radius, chains[0].radius + 0.1);
    assert_eq!(result.parameters.phi_ca, 26.0);
    assert_eq!(result.model.model_id, job_id);
    assert_eq!(result.model.helix_type, "ALPHA");
    assert_eq!(result.model.pdb, expected.pdb);
    assert_eq!(result.model.score, expected.score);

    let value = serde_json::to_value(&result).unwrap();
    assert!(value.get("model_and_info").is_some());
    assert_eq!(value["parameters"]["phiCA"], json!(26.0));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_job_has_no_model() {
    let mut h = start(MockEngine::new().with_optimise_failure("search diverged"));

    let job_id = h
        .service
        .submit_optimisation(&[chain("LKAIAQE", 6.0)], HelixType::Collagen, 1.0)
        .await
        .unwrap();
    h.poller.tick().await.unwrap();
    let event = finished(&mut h.events, job_id).await;
    assert!(matches!(event, WorkerEvent::JobFailed { .. }));

    let job = h.service.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("search diverged"));
    assert!(job.model_id.is_none());
    assert!(h.store.models().get(job_id).await.unwrap().is_none());

    assert!(matches!(
        h.service.retrieve_result(job_id).await,
        Err(Error::JobNotComplete {
            status: JobStatus::Failed,
            ..
        })
    ));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_result_of_pending_job_is_not_complete() {
    let h = start(MockEngine::new());
    let job_id = h
        .service
        .submit_optimisation(&[chain("LKAIAQE", 5.0)], HelixType::Alpha, 0.0)
        .await
        .unwrap();

    match h.service.retrieve_result(job_id).await {
        Err(Error::JobNotComplete { id, status }) => {
            assert_eq!(id, job_id);
            assert_eq!(status, JobStatus::Submitted);
        }
        other => panic!("expected JobNotComplete, got {:?}", other),
    }

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_complete_job_without_model_reference_is_internal_error() {
    let h = start(MockEngine::new());
    let chains = [chain("LKAIAQE", 5.0)];
    let parameter_id = h
        .store
        .parameters()
        .lookup_or_insert(&chains[0])
        .await
        .unwrap();

    let mut job = OptJob::submitted(HelixType::Alpha, vec![parameter_id], 1.0);
    job.status = JobStatus::Complete;
    h.store.jobs().insert(&job).await.unwrap();
    // A model stored under the job's own id must not be picked up.
    let model = MockEngine::expected_output(&chains, HelixType::Alpha).into_model(job.id);
    h.store.models().insert_once(&model).await.unwrap();

    match h.service.retrieve_result(job.id).await {
        Err(Error::Internal(message)) => assert!(message.contains(&job.id.to_string())),
        other => panic!("expected Internal, got {:?}", other),
    }

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_job() {
    let h = start(MockEngine::new());
    let missing = Uuid::now_v7();

    assert!(matches!(
        h.service.poll_status(missing).await,
        Err(Error::JobNotFound(id)) if id == missing
    ));
    assert!(matches!(
        h.service.retrieve_result(missing).await,
        Err(Error::JobNotFound(_))
    ));

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_submission_validation() {
    let h = start(MockEngine::new());

    for heat in [-1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            h.service
                .submit_optimisation(&[chain("LKAIAQE", 5.0)], HelixType::Alpha, heat)
                .await,
            Err(Error::InvalidInput(_))
        ));
    }
    assert!(matches!(
        h.service.submit_optimisation(&[], HelixType::Alpha, 1.0).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(h
        .store
        .jobs()
        .list_by_status(JobStatus::Submitted)
        .await
        .unwrap()
        .is_empty());

    h.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_submit_json() {
    let h = start(MockEngine::new());
    let mut body = json!({
        "Helix Type": "ALPHA",
        "Heat": 3.0,
        "Parameters": [{
            "Radius": 5.0,
            "Pitch": 200,
            "Interface Angle": 26,
            "Register": "a",
            "Sequence": "LKAIAQE",
            "Orientation": false,
            "Z-Shift": 0,
            "Super-Helical Rotation": 0,
            "Linked SHR": false
        }]
    });

    let job_id = h.service.submit_json(&body).await.unwrap();
    let job = h.service.job(job_id).await.unwrap();
    assert_eq!(job.helix_type, "ALPHA");
    assert_eq!(job.heat, 3.0);
    assert_eq!(job.oligomeric_state, 1);

    // Resubmitting the same chains reuses their canonical ids.
    let second = h.service.submit_json(&body).await.unwrap();
    assert_ne!(second, job_id);
    assert_eq!(
        h.service.job(second).await.unwrap().initial_parameter_ids,
        job.initial_parameter_ids
    );

    body["Helix Type"] = json!("BETA");
    assert!(matches!(
        h.service.submit_json(&body).await,
        Err(Error::InvalidInput(_))
    ));

    h.handle.shutdown().await.unwrap();
}
