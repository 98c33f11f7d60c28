pub mod sqlite;

#[cfg(feature = "mongodb")]
pub mod mongo;

#[cfg(feature = "mongodb")]
pub use mongo::MongoBackend;

pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    parse_timestamp, BackendKind, LogAction, LogEntry, LogStatus, OrderRecord, OrderStatus,
    PerformanceSummary, RestockRecord, RestockSource, RestockStatus, ReviewRecord, ReviewStatus,
};

/// A concrete persistence engine. One instance serves the whole process and
/// hands out scoped sessions.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create schema or indexes. Safe to call any number of times.
    async fn initialize(&self) -> Result<()>;

    /// Round-trip to the engine to prove it is reachable.
    async fn ping(&self) -> Result<()>;

    /// Acquire a unit-of-work session. It is released when dropped.
    async fn session(&self) -> Result<Box<dyn DatabaseService>>;
}

/// The read contract every backend session satisfies.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Most recent log entries first.
    async fn get_agent_logs(&self, limit: usize) -> Result<Vec<LogEntry>>;

    /// Counters over the trailing `days` window.
    async fn get_performance_metrics(&self, days: u32) -> Result<PerformanceSummary>;

    /// Reviews still awaiting moderation.
    async fn get_pending_reviews(&self) -> Result<Vec<ReviewRecord>>;

    /// Every restock request, newest first, regardless of status.
    async fn get_restock_requests(&self) -> Result<Vec<RestockRecord>>;

    /// Most recent orders first.
    async fn get_orders(&self, limit: usize) -> Result<Vec<OrderRecord>>;

    /// Write access, if this backend was opened writable.
    fn writer(&self) -> Option<&dyn RecordWriter> {
        None
    }
}

/// Optional write capability of a session.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn append_log(&self, entry: &LogEntry) -> Result<()>;

    async fn insert_order(&self, order: &OrderRecord) -> Result<()>;

    async fn insert_review(&self, review: &ReviewRecord) -> Result<()>;

    async fn insert_restock_request(&self, request: &RestockRecord) -> Result<()>;

    /// Returns false when no review has that id.
    async fn set_review_status(&self, id: &str, status: ReviewStatus) -> Result<bool>;

    /// Returns false when no restock request has that id.
    async fn set_restock_status(&self, id: &str, status: RestockStatus) -> Result<bool>;

    /// Delete log entries older than `before` (if given) and everything past
    /// the newest `keep_latest` (if given). Returns the number removed.
    async fn prune_logs(
        &self,
        before: Option<DateTime<Utc>>,
        keep_latest: Option<usize>,
    ) -> Result<u64>;
}

// Rows as both engines store them: flat text columns / document fields.
// Decoding into the typed records is shared so both backends reject the same
// malformed data.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LogRow {
    pub id: String,
    pub timestamp: String,
    pub action: String,
    pub status: String,
    pub details: String,
}

impl From<&LogEntry> for LogRow {
    fn from(entry: &LogEntry) -> Self {
        LogRow {
            id: entry.id.clone(),
            timestamp: crate::types::format_timestamp(&entry.timestamp),
            action: entry.action.to_string(),
            status: entry.status.as_str().to_string(),
            details: entry.details.clone(),
        }
    }
}

impl TryFrom<LogRow> for LogEntry {
    type Error = crate::error::StoreError;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(LogEntry {
            timestamp: parse_timestamp(&row.timestamp)?,
            action: LogAction::from_db_value(&row.action),
            status: LogStatus::decode(&row.status)?,
            id: row.id,
            details: row.details,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReviewRow {
    pub id: String,
    pub order_id: Option<String>,
    pub customer: String,
    pub rating: i64,
    pub comment: String,
    pub status: String,
    pub created_at: String,
}

impl From<&ReviewRecord> for ReviewRow {
    fn from(review: &ReviewRecord) -> Self {
        ReviewRow {
            id: review.id.clone(),
            order_id: review.order_id.clone(),
            customer: review.customer.clone(),
            rating: i64::from(review.rating),
            comment: review.comment.clone(),
            status: review.status.as_str().to_string(),
            created_at: crate::types::format_timestamp(&review.created_at),
        }
    }
}

impl TryFrom<ReviewRow> for ReviewRecord {
    type Error = crate::error::StoreError;

    fn try_from(row: ReviewRow) -> Result<Self> {
        let rating = u8::try_from(row.rating).map_err(|_| {
            crate::error::StoreError::DataIntegrity(format!(
                "review {} has out-of-range rating {}",
                row.id, row.rating
            ))
        })?;
        Ok(ReviewRecord {
            status: ReviewStatus::decode(&row.status)?,
            created_at: parse_timestamp(&row.created_at)?,
            rating,
            id: row.id,
            order_id: row.order_id,
            customer: row.customer,
            comment: row.comment,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RestockRow {
    pub id: String,
    pub product: String,
    pub quantity: i64,
    pub status: String,
    pub source: String,
    pub created_at: String,
}

impl From<&RestockRecord> for RestockRow {
    fn from(request: &RestockRecord) -> Self {
        RestockRow {
            id: request.id.clone(),
            product: request.product.clone(),
            quantity: i64::from(request.quantity),
            status: request.status.as_str().to_string(),
            source: request.source.as_str().to_string(),
            created_at: crate::types::format_timestamp(&request.created_at),
        }
    }
}

impl TryFrom<RestockRow> for RestockRecord {
    type Error = crate::error::StoreError;

    fn try_from(row: RestockRow) -> Result<Self> {
        let quantity = u32::try_from(row.quantity).map_err(|_| {
            crate::error::StoreError::DataIntegrity(format!(
                "restock request {} has invalid quantity {}",
                row.id, row.quantity
            ))
        })?;
        Ok(RestockRecord {
            status: RestockStatus::decode(&row.status)?,
            source: RestockSource::decode(&row.source)?,
            created_at: parse_timestamp(&row.created_at)?,
            quantity,
            id: row.id,
            product: row.product,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OrderRow {
    pub id: String,
    pub customer: String,
    pub product: String,
    pub quantity: i64,
    pub total: f64,
    pub status: String,
    pub created_at: String,
}

impl From<&OrderRecord> for OrderRow {
    fn from(order: &OrderRecord) -> Self {
        OrderRow {
            id: order.id.clone(),
            customer: order.customer.clone(),
            product: order.product.clone(),
            quantity: i64::from(order.quantity),
            total: order.total,
            status: order.status.as_str().to_string(),
            created_at: crate::types::format_timestamp(&order.created_at),
        }
    }
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = crate::error::StoreError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let quantity = u32::try_from(row.quantity).map_err(|_| {
            crate::error::StoreError::DataIntegrity(format!(
                "order {} has invalid quantity {}",
                row.id, row.quantity
            ))
        })?;
        Ok(OrderRecord {
            status: OrderStatus::decode(&row.status)?,
            created_at: parse_timestamp(&row.created_at)?,
            quantity,
            id: row.id,
            customer: row.customer,
            product: row.product,
            total: row.total,
        })
    }
}

/// Decode a batch of rows, failing on the first malformed one.
pub(crate) fn decode_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = crate::error::StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Start of the trailing window of `days` ending now, in stored form.
pub(crate) fn window_start(days: u32) -> String {
    let since = Utc::now() - chrono::Duration::days(i64::from(days));
    crate::types::format_timestamp(&since)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_log_row_decoding() {
        let row = LogRow {
            id: "log-1".to_string(),
            timestamp: "2026-01-01T00:00:00.000000Z".to_string(),
            action: "agent_run".to_string(),
            status: "success".to_string(),
            details: "restocked 3 products".to_string(),
        };
        let entry = LogEntry::try_from(row).unwrap();
        assert_eq!(entry.action, LogAction::AgentRun);
        assert_eq!(entry.status, LogStatus::Success);
    }

    #[test]
    fn test_malformed_rows_are_rejected() {
        let row = LogRow {
            id: "log-2".to_string(),
            timestamp: "not a time".to_string(),
            action: "agent_run".to_string(),
            status: "success".to_string(),
            details: String::new(),
        };
        assert!(matches!(
            LogEntry::try_from(row),
            Err(StoreError::DataIntegrity(_))
        ));

        let row = RestockRow {
            id: "r-1".to_string(),
            product: "widget".to_string(),
            quantity: -4,
            status: "pending".to_string(),
            source: "agent".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        assert!(matches!(
            RestockRecord::try_from(row),
            Err(StoreError::DataIntegrity(_))
        ));
    }
}
