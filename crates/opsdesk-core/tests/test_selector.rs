//! Process-wide backend selection. Kept in its own test binary so the
//! selection cell starts empty.

use opsdesk_core::{
    active_backend, get_database, init_database, Backend, BackendKind, DatabaseConfig,
    DatabaseService, StatusAggregator, StatusConfig, StoreError,
};

#[tokio::test]
async fn test_selection_is_frozen_after_init() {
    assert!(matches!(active_backend().err(), Some(StoreError::NotInitialized)));
    assert!(get_database().await.is_err());

    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("DATABASE_TYPE", "sqlite");
    std::env::set_var(
        "SQLITE_DB_PATH",
        dir.path().join("frozen.db").to_string_lossy().as_ref(),
    );
    let config = DatabaseConfig::from_env().unwrap();
    assert_eq!(config.backend, BackendKind::Sqlite);

    let backend = init_database(&config).await.unwrap();
    let aggregator = StatusAggregator::new(backend, StatusConfig::default());
    let first = aggregator.get_status().await;
    assert!(first.is_operational());

    // flipping the environment mid-process changes nothing
    std::env::set_var("DATABASE_TYPE", "mongodb");
    let flipped = DatabaseConfig::from_env().unwrap();
    assert_eq!(flipped.backend, BackendKind::MongoDb);

    let again = init_database(&flipped).await.unwrap();
    assert_eq!(again.kind(), BackendKind::Sqlite);
    assert_eq!(active_backend().unwrap().kind(), BackendKind::Sqlite);
    assert_eq!(get_database().await.unwrap().backend(), BackendKind::Sqlite);

    let second = aggregator.get_status().await;
    assert!(second.is_operational());
    assert_eq!(aggregator.backend_kind(), BackendKind::Sqlite);

    // repeated init with the first config is harmless
    init_database(&config).await.unwrap();
}
