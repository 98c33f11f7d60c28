//! Retention policy support for automatic cleanup of old agent log entries.

use std::time::Duration;

use chrono::Utc;

use crate::error::{Result, StoreError};
use crate::storage::DatabaseService;

/// Configurable retention policy for the agent log.
#[derive(Debug, Clone, Default)]
pub struct LogRetentionPolicy {
    /// Maximum age for log entries (None = no age limit).
    pub max_age: Option<Duration>,
    /// Maximum number of log entries to keep (None = no limit).
    pub max_entries: Option<usize>,
}

impl LogRetentionPolicy {
    pub fn is_noop(&self) -> bool {
        self.max_age.is_none() && self.max_entries.is_none()
    }
}

/// Result of applying a retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionResult {
    /// Number of log entries deleted.
    pub removed: u64,
}

/// Apply a retention policy through the session's write capability.
pub async fn apply_log_retention(
    session: &dyn DatabaseService,
    policy: &LogRetentionPolicy,
) -> Result<RetentionResult> {
    if policy.is_noop() {
        return Ok(RetentionResult { removed: 0 });
    }
    let writer = session
        .writer()
        .ok_or(StoreError::CapabilityMissing("log retention requires write access"))?;

    let before = match policy.max_age {
        Some(age) => {
            let age = chrono::Duration::from_std(age).map_err(|e| {
                StoreError::config("max_age", format!("retention age out of range: {e}"))
            })?;
            Some(Utc::now() - age)
        }
        None => None,
    };

    let removed = writer.prune_logs(before, policy.max_entries).await?;
    tracing::info!(removed, backend = %session.backend(), "applied log retention");
    Ok(RetentionResult { removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqliteConfig;
    use crate::storage::{Backend, SqliteBackend};
    use crate::types::{LogAction, LogEntry, LogStatus};

    async fn seeded_backend() -> SqliteBackend {
        let backend = SqliteBackend::open(":memory:").await.unwrap();
        let session = backend.session().await.unwrap();
        let writer = session.writer().unwrap();
        for days in [40, 10, 3, 0] {
            let mut entry = LogEntry::now(LogAction::AgentRun, LogStatus::Success, "scheduled run");
            entry.timestamp = Utc::now() - chrono::Duration::days(days);
            writer.append_log(&entry).await.unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn test_noop_policy() {
        let backend = seeded_backend().await;
        let session = backend.session().await.unwrap();
        let result = apply_log_retention(session.as_ref(), &LogRetentionPolicy::default())
            .await
            .unwrap();
        assert_eq!(result.removed, 0);
        assert_eq!(session.get_agent_logs(100).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_max_age() {
        let backend = seeded_backend().await;
        let session = backend.session().await.unwrap();
        let policy = LogRetentionPolicy {
            max_age: Some(Duration::from_secs(7 * 24 * 3600)),
            max_entries: None,
        };
        let result = apply_log_retention(session.as_ref(), &policy).await.unwrap();
        assert_eq!(result.removed, 2);
        assert_eq!(session.get_agent_logs(100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_max_entries_keeps_newest() {
        let backend = seeded_backend().await;
        let session = backend.session().await.unwrap();
        let newest = session.get_agent_logs(1).await.unwrap()[0].clone();
        let policy = LogRetentionPolicy {
            max_age: None,
            max_entries: Some(1),
        };
        apply_log_retention(session.as_ref(), &policy).await.unwrap();
        let remaining = session.get_agent_logs(100).await.unwrap();
        assert_eq!(remaining, vec![newest]);
    }

    #[tokio::test]
    async fn test_read_only_session_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.db").to_string_lossy().into_owned();
        SqliteBackend::open(&path).await.unwrap();

        let backend = SqliteBackend::new(&SqliteConfig {
            path,
            read_only: true,
            ..SqliteConfig::default()
        })
        .await
        .unwrap();
        let session = backend.session().await.unwrap();
        let policy = LogRetentionPolicy {
            max_age: None,
            max_entries: Some(5),
        };
        let err = apply_log_retention(session.as_ref(), &policy).await.unwrap_err();
        assert!(matches!(err, StoreError::CapabilityMissing(_)));
    }
}
