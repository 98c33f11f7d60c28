use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unreachable: {0}")]
    Connectivity(String),

    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    PoolTimeout { waited_ms: u64 },

    #[error("{operation} timed out after {waited_ms}ms")]
    Timeout { operation: String, waited_ms: u64 },

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("capability not available on this backend: {0}")]
    CapabilityMissing(&'static str),

    #[error("invalid configuration for {key}: {message}")]
    Configuration { key: String, message: String },

    #[error("database has not been initialized")]
    NotInitialized,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Coarse classification of a [`StoreError`], exposed on degraded snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Timeout,
    DataIntegrity,
    CapabilityMissing,
    Configuration,
    Storage,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connectivity(_) | StoreError::NotInitialized => ErrorKind::Connectivity,
            StoreError::PoolTimeout { .. } | StoreError::Timeout { .. } => ErrorKind::Timeout,
            StoreError::DataIntegrity(_) | StoreError::Serialization(_) => ErrorKind::DataIntegrity,
            StoreError::CapabilityMissing(_) => ErrorKind::CapabilityMissing,
            StoreError::Configuration { .. } => ErrorKind::Configuration,
            StoreError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        StoreError::Configuration {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Connectivity(e.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => {
                StoreError::DataIntegrity(e.to_string())
            }
            other => StoreError::Storage(other.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Error(inner) => inner.into(),
            tokio_rusqlite::Error::ConnectionClosed => {
                StoreError::Connectivity("sqlite connection closed".to_string())
            }
            other => StoreError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            StoreError::PoolTimeout { waited_ms: 10 }.kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            StoreError::Connectivity("down".into()).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            StoreError::DataIntegrity("bad row".into()).kind(),
            ErrorKind::DataIntegrity
        );
    }

    #[test]
    fn test_closed_connection_is_connectivity() {
        let err: StoreError = tokio_rusqlite::Error::ConnectionClosed.into();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }
}
