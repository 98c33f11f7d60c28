use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StoreError};

/// Render a timestamp in the fixed-width form both backends store, so that
/// lexicographic order on the stored text matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; anything unparseable is a data integrity error.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::DataIntegrity(format!("invalid timestamp '{raw}': {e}")))
}

/// Which concrete persistence engine is serving the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    MongoDb,
}

impl BackendKind {
    /// Resolve the configured backend name. Only `mongodb` selects the
    /// document store; every other value, including none, selects SQLite.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "mongodb" => BackendKind::MongoDb,
            _ => BackendKind::Sqlite,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::MongoDb => "mongodb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of event recorded in the agent log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    AgentRun,
    Error,
    Other(String),
}

impl LogAction {
    pub fn from_db_value(value: &str) -> Self {
        match value {
            "agent_run" => LogAction::AgentRun,
            "error" => LogAction::Error,
            other => LogAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogAction::AgentRun => write!(f, "agent_run"),
            LogAction::Error => write!(f, "error"),
            LogAction::Other(s) => write!(f, "{}", s),
        }
    }
}

macro_rules! db_enum {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn from_db_value(value: &str) -> Option<Self> {
                match value {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Decode a stored value, treating unknown values as corrupt rows.
            pub fn decode(value: &str) -> Result<Self> {
                Self::from_db_value(value).ok_or_else(|| {
                    StoreError::DataIntegrity(format!(concat!("unknown ", $what, " '{}'"), value))
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

db_enum!(
    /// Outcome recorded alongside a log action.
    LogStatus, "log status" {
        Success => "success",
        Failed => "failed",
        Error => "error",
    }
);

db_enum!(
    /// Moderation state of a customer review.
    ReviewStatus, "review status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

db_enum!(
    /// Lifecycle of a restock request.
    RestockStatus, "restock status" {
        Pending => "pending",
        Approved => "approved",
        Fulfilled => "fulfilled",
        Rejected => "rejected",
    }
);

db_enum!(
    /// Who raised a restock request.
    RestockSource, "restock source" {
        Agent => "agent",
        Manual => "manual",
    }
);

db_enum!(
    /// Fulfilment state of an order.
    OrderStatus, "order status" {
        Pending => "pending",
        Processing => "processing",
        Shipped => "shipped",
        Delivered => "delivered",
        Returned => "returned",
        Cancelled => "cancelled",
    }
);

/// An entry in the agent activity log. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: LogAction,
    pub status: LogStatus,
    pub details: String,
}

impl LogEntry {
    /// A new entry stamped with a fresh id and the current time.
    pub fn now(action: LogAction, status: LogStatus, details: impl Into<String>) -> Self {
        LogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            status,
            details: details.into(),
        }
    }
}

/// Activity counters over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub orders_processed: u64,
    pub returns_processed: u64,
    pub restocks_created: u64,
    pub automation_rate: f64,
}

impl PerformanceSummary {
    /// Build a summary from raw window counts. `automated_restocks` is the
    /// number of restock requests raised by the agent.
    pub fn from_counts(
        orders_processed: u64,
        returns_processed: u64,
        restocks_created: u64,
        automated_restocks: u64,
    ) -> Self {
        let automation_rate = if restocks_created == 0 {
            0.0
        } else {
            (automated_restocks as f64 / restocks_created as f64).clamp(0.0, 1.0)
        };
        PerformanceSummary {
            orders_processed,
            returns_processed,
            restocks_created,
            automation_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: String,
    pub order_id: Option<String>,
    pub customer: String,
    pub rating: u8,
    pub comment: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestockRecord {
    pub id: String,
    pub product: String,
    pub quantity: u32,
    pub status: RestockStatus,
    pub source: RestockSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub customer: String,
    pub product: String,
    pub quantity: u32,
    pub total: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_setting_defaults_to_sqlite() {
        assert_eq!(BackendKind::from_setting(None), BackendKind::Sqlite);
        assert_eq!(BackendKind::from_setting(Some("postgres")), BackendKind::Sqlite);
        assert_eq!(BackendKind::from_setting(Some("")), BackendKind::Sqlite);
        assert_eq!(BackendKind::from_setting(Some(" MongoDB ")), BackendKind::MongoDb);
    }

    #[test]
    fn test_unknown_status_is_integrity_error() {
        assert_eq!(RestockStatus::decode("pending").unwrap(), RestockStatus::Pending);
        let err = RestockStatus::decode("lost").unwrap_err();
        assert!(matches!(err, StoreError::DataIntegrity(_)));
    }

    #[test]
    fn test_log_action_round_trips_unknown_values() {
        let action = LogAction::from_db_value("restock_decision");
        assert_eq!(action, LogAction::Other("restock_decision".into()));
        assert_eq!(action.to_string(), "restock_decision");
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let a = parse_timestamp("2026-01-01T00:00:00Z").unwrap();
        let b = parse_timestamp("2026-01-01T00:00:00.5Z").unwrap();
        let (fa, fb) = (format_timestamp(&a), format_timestamp(&b));
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_automation_rate_bounds() {
        assert_eq!(PerformanceSummary::from_counts(5, 1, 0, 0).automation_rate, 0.0);
        assert_eq!(PerformanceSummary::from_counts(5, 1, 4, 3).automation_rate, 0.75);
        assert_eq!(PerformanceSummary::from_counts(5, 1, 2, 9).automation_rate, 1.0);
    }
}
