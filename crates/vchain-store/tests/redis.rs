//! Redis job store integration tests.

use vchain_models::{ChainJob, ChainRequest, ChainStatus, VideoModel};
use vchain_store::{JobStore, RedisJobStore, StoreConfig, StoreError};

fn store() -> RedisJobStore {
    dotenvy::dotenv().ok();
    let config = StoreConfig {
        key_prefix: format!("vchain-test-{}", std::process::id()),
        ..StoreConfig::from_env()
    };
    RedisJobStore::new(config).expect("Failed to create Redis store")
}

fn job() -> ChainJob {
    ChainJob::from_request(ChainRequest {
        base_prompt: "A tram rattles through a neon-lit city in the rain".to_string(),
        total_duration: 24,
        seconds_per_segment: 8,
        model: VideoModel::Sora2Pro,
        size: "1792x1024".to_string(),
        user_id: Some("redis-test".to_string()),
    })
    .expect("valid request")
}

/// Test Redis connection.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    store().check_connectivity().await.expect("Redis PING failed");
}

/// Test the create/update/list/delete cycle and the status index.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_lifecycle() {
    let store = store();
    let mut job = job();

    store.create(&job).await.expect("Failed to create job");
    assert!(matches!(store.create(&job).await, Err(StoreError::AlreadyExists(_))));

    let queued = store.list_by_status(ChainStatus::Queued).await.unwrap();
    assert!(queued.iter().any(|j| j.id == job.id));

    job.transition(ChainStatus::Planning).unwrap();
    job.set_progress(3);
    store.update(&job).await.expect("Failed to update job");

    let loaded = store.get(&job.id).await.unwrap().expect("job exists");
    assert_eq!(loaded.status, ChainStatus::Planning);
    assert_eq!(loaded.progress, 3);

    let queued = store.list_by_status(ChainStatus::Queued).await.unwrap();
    assert!(queued.iter().all(|j| j.id != job.id));
    let planning = store.list_by_status(ChainStatus::Planning).await.unwrap();
    assert!(planning.iter().any(|j| j.id == job.id));

    assert!(store.delete(&job.id).await.unwrap());
    assert!(store.get(&job.id).await.unwrap().is_none());
    assert!(!store.delete(&job.id).await.unwrap());
    assert!(matches!(store.update(&job).await, Err(StoreError::NotFound(_))));
}
