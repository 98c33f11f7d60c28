pub mod config;
pub mod error;
pub mod retention;
pub mod selector;
pub mod status;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use config::{DatabaseConfig, MongoConfig, SqliteConfig, StatusConfig};
pub use error::{ErrorKind, Result, StoreError};
pub use retention::{apply_log_retention, LogRetentionPolicy, RetentionResult};
pub use selector::{active_backend, connect, get_database, init_database};
pub use status::{success_rate, SnapshotError, SnapshotStatus, StatusAggregator, StatusSnapshot};
pub use storage::sqlite::SqliteBackend;
pub use storage::{Backend, DatabaseService, RecordWriter};
pub use types::{
    BackendKind, LogAction, LogEntry, LogStatus, OrderRecord, OrderStatus, PerformanceSummary,
    RestockRecord, RestockSource, RestockStatus, ReviewRecord, ReviewStatus,
};

#[cfg(feature = "mongodb")]
pub use storage::MongoBackend;
