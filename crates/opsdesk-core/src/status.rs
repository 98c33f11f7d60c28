//! Health/status aggregation over the active backend.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::config::StatusConfig;
use crate::error::{ErrorKind, Result, StoreError};
use crate::storage::{Backend, DatabaseService};
use crate::types::{BackendKind, LogAction, LogEntry, LogStatus, PerformanceSummary, RestockStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Operational,
    Error,
}

/// The failure behind a degraded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Point-in-time health record. Built fresh on every call, never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: SnapshotStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub automation_rate: f64,
    pub pending_reviews: u64,
    pub restock_requests_pending: u64,
    pub total_logs: u64,
    #[serde(serialize_with = "metrics_or_empty")]
    pub metrics: Option<PerformanceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
}

impl StatusSnapshot {
    /// The zeroed snapshot reported when any backend call fails.
    pub fn from_error(err: &StoreError) -> Self {
        StatusSnapshot {
            status: SnapshotStatus::Error,
            last_run: None,
            success_rate: 0.0,
            automation_rate: 0.0,
            pending_reviews: 0,
            restock_requests_pending: 0,
            total_logs: 0,
            metrics: None,
            error: Some(SnapshotError {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_operational(&self) -> bool {
        self.status == SnapshotStatus::Operational
    }
}

fn metrics_or_empty<S>(metrics: &Option<PerformanceSummary>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use serde::ser::SerializeMap;

    match metrics {
        Some(m) => m.serialize(serializer),
        None => serializer.serialize_map(Some(0))?.end(),
    }
}

/// Percentage of entries that are not errors, rounded to two decimals.
/// An empty log counts as fully successful.
pub fn success_rate(logs: &[LogEntry]) -> f64 {
    if logs.is_empty() {
        return 100.0;
    }
    let ok = logs.iter().filter(|e| e.action != LogAction::Error).count();
    let rate = 100.0 * ok as f64 / logs.len() as f64;
    (rate * 100.0).round() / 100.0
}

/// Combines independent backend reads into a [`StatusSnapshot`].
pub struct StatusAggregator {
    backend: Arc<dyn Backend>,
    config: StatusConfig,
}

impl StatusAggregator {
    pub fn new(backend: Arc<dyn Backend>, config: StatusConfig) -> Self {
        StatusAggregator { backend, config }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Current status. Never fails: any backend error, including a timeout,
    /// yields an `error` snapshot instead.
    #[tracing::instrument(skip(self), fields(backend = %self.backend.kind()))]
    pub async fn get_status(&self) -> StatusSnapshot {
        let waited_ms = self.config.query_timeout.as_millis() as u64;
        let outcome = tokio::time::timeout(self.config.query_timeout, self.collect())
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Timeout {
                    operation: "status collection".to_string(),
                    waited_ms,
                })
            });

        match outcome {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, kind = ?e.kind(), "status degraded");
                StatusSnapshot::from_error(&e)
            }
        }
    }

    async fn collect(&self) -> Result<StatusSnapshot> {
        // dropped on every return path below, releasing the session
        let session = self.backend.session().await?;
        snapshot_from(session.as_ref(), &self.config).await
    }

    /// Run the restock agent and record the outcome in the agent log.
    ///
    /// The return value is the agent's own outcome: `Ok(true)` is success,
    /// `Ok(false)` and `Err(_)` are failure. Recording the outcome is best
    /// effort and never changes the result.
    pub async fn run_agent<F, Fut, E>(&self, agent: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<bool, E>>,
        E: Display,
    {
        let (succeeded, entry) = match agent().await {
            Ok(true) => (
                true,
                LogEntry::now(LogAction::AgentRun, LogStatus::Success, "restock agent completed"),
            ),
            Ok(false) => (
                false,
                LogEntry::now(LogAction::AgentRun, LogStatus::Failed, "restock agent reported failure"),
            ),
            Err(e) => (
                false,
                LogEntry::now(LogAction::Error, LogStatus::Error, format!("restock agent error: {e}")),
            ),
        };

        if let Err(e) = self.record(&entry).await {
            tracing::warn!(error = %e, action = %entry.action, "could not record agent run");
        }
        succeeded
    }

    async fn record(&self, entry: &LogEntry) -> Result<()> {
        let session = self.backend.session().await?;
        match session.writer() {
            Some(writer) => writer.append_log(entry).await,
            None => {
                tracing::debug!(backend = %session.backend(), "log writes unavailable; skipping");
                Ok(())
            }
        }
    }
}

/// Build an operational snapshot from a single session.
pub async fn snapshot_from(
    session: &dyn DatabaseService,
    config: &StatusConfig,
) -> Result<StatusSnapshot> {
    let logs = session.get_agent_logs(config.log_limit).await?;
    let metrics = session.get_performance_metrics(config.metrics_days).await?;
    let pending_reviews = session.get_pending_reviews().await?;
    let restocks = session.get_restock_requests().await?;

    let restock_requests_pending = restocks
        .iter()
        .filter(|r| r.status == RestockStatus::Pending)
        .count();

    Ok(StatusSnapshot {
        status: SnapshotStatus::Operational,
        last_run: logs.first().map(|e| e.timestamp),
        success_rate: success_rate(&logs),
        automation_rate: metrics.automation_rate,
        pending_reviews: pending_reviews.len() as u64,
        restock_requests_pending: restock_requests_pending as u64,
        total_logs: logs.len() as u64,
        metrics: Some(metrics),
        error: None,
    })
}
