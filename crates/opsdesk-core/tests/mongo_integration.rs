//! MongoDB integration tests.
//!
//! Most of these require a running MongoDB instance.
//! Run: `docker run -d -p 27017:27017 mongo:7`
//! Then: `cargo test --features mongodb -- --ignored mongo`

#![cfg(feature = "mongodb")]

use std::time::Duration;

use chrono::Utc;
use opsdesk_core::{
    connect, Backend, BackendKind, DatabaseConfig, DatabaseService, LogAction, LogEntry,
    LogStatus, MongoBackend, MongoConfig, RestockRecord, RestockSource, RestockStatus,
    StatusAggregator, StatusConfig, StoreError,
};

const TEST_MONGO_URI: &str = "mongodb://localhost:27017";

fn mongo_config(uri: &str, database: &str) -> DatabaseConfig {
    DatabaseConfig {
        backend: BackendKind::MongoDb,
        mongodb: MongoConfig {
            uri: uri.to_string(),
            database: database.to_string(),
            server_selection_timeout: Duration::from_millis(500),
        },
        ..DatabaseConfig::default()
    }
}

#[tokio::test]
async fn test_mongo_unreachable_fails_fast() {
    let config = mongo_config("mongodb://127.0.0.1:1/?directConnection=true", "opsdesk_test");
    let err = connect(&config).await.err().expect("init must fail");
    assert!(matches!(err, StoreError::Connectivity(_)), "got {err:?}");
}

#[tokio::test]
async fn test_mongo_zero_limit_reads_nothing() {
    // no server needed: a zero limit never reaches the driver
    let config = mongo_config("mongodb://127.0.0.1:1/?directConnection=true", "opsdesk_test");
    let backend = MongoBackend::new(&config.mongodb).await.unwrap();
    let session = backend.session().await.unwrap();
    assert!(session.get_agent_logs(0).await.unwrap().is_empty());
    assert!(session.get_orders(0).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn test_mongo_init_is_idempotent() {
    let config = mongo_config(TEST_MONGO_URI, "opsdesk_test_init");
    let backend = connect(&config).await.unwrap();
    backend.initialize().await.unwrap();
    backend.initialize().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn test_mongo_status_snapshot() {
    let database = format!("opsdesk_test_{}", uuid::Uuid::new_v4().simple());
    let backend = connect(&mongo_config(TEST_MONGO_URI, &database)).await.unwrap();

    {
        let session = backend.session().await.unwrap();
        let writer = session.writer().unwrap();
        for (id, status) in [("r-1", RestockStatus::Pending), ("r-2", RestockStatus::Fulfilled)] {
            writer
                .insert_restock_request(&RestockRecord {
                    id: id.to_string(),
                    product: "pallet".to_string(),
                    quantity: 5,
                    status,
                    source: RestockSource::Agent,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        writer
            .append_log(&LogEntry::now(LogAction::AgentRun, LogStatus::Success, "ok"))
            .await
            .unwrap();
    }

    let aggregator = StatusAggregator::new(backend, StatusConfig::default());
    let snapshot = aggregator.get_status().await;
    assert!(snapshot.is_operational(), "{:?}", snapshot.error);
    assert_eq!(snapshot.restock_requests_pending, 1);
    assert_eq!(snapshot.total_logs, 1);
    assert_eq!(snapshot.automation_rate, 1.0);
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn test_mongo_prune_keeps_exact_count_on_timestamp_ties() {
    let database = format!("opsdesk_test_{}", uuid::Uuid::new_v4().simple());
    let backend = connect(&mongo_config(TEST_MONGO_URI, &database)).await.unwrap();
    let session = backend.session().await.unwrap();
    let writer = session.writer().unwrap();

    let shared = Utc::now();
    let mut oldest = LogEntry::now(LogAction::AgentRun, LogStatus::Success, "oldest");
    oldest.timestamp = shared - chrono::Duration::minutes(10);
    writer.append_log(&oldest).await.unwrap();
    for details in ["tie-a", "tie-b"] {
        let mut entry = LogEntry::now(LogAction::AgentRun, LogStatus::Success, details);
        entry.timestamp = shared;
        writer.append_log(&entry).await.unwrap();
    }

    assert_eq!(writer.prune_logs(None, Some(1)).await.unwrap(), 2);
    let left = session.get_agent_logs(10).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].timestamp, at_stored_precision(shared));
}

/// Timestamps are stored at microsecond precision.
fn at_stored_precision(ts: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    opsdesk_core::types::parse_timestamp(&opsdesk_core::types::format_timestamp(&ts)).unwrap()
}
