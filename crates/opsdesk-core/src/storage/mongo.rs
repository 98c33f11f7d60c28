use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use super::{
    decode_rows, window_start, Backend, DatabaseService, LogRow, OrderRow, RecordWriter,
    RestockRow, ReviewRow,
};
use crate::config::MongoConfig;
use crate::error::{Result, StoreError};
use crate::types::{
    format_timestamp, BackendKind, LogEntry, OrderRecord, OrderStatus, PerformanceSummary,
    RestockRecord, RestockSource, RestockStatus, ReviewRecord, ReviewStatus,
};

const LOGS: &str = "agent_logs";
const ORDERS: &str = "orders";
const REVIEWS: &str = "reviews";
const RESTOCKS: &str = "restock_requests";

/// MongoDB-backed storage.
///
/// The driver keeps its own connection pool behind `Client`, so one
/// `Database` handle is shared by every session; a session is just a clone
/// of that handle.
///
/// Enable with the `mongodb` Cargo feature flag.
pub struct MongoBackend {
    db: Database,
}

impl MongoBackend {
    /// Build a client for `config`. No network round-trip happens until
    /// [`Backend::initialize`] or the first query.
    pub async fn new(config: &MongoConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(map_mongo_err)?;
        options.server_selection_timeout = Some(config.server_selection_timeout);
        options.app_name = Some("opsdesk".to_string());
        let client = Client::with_options(options).map_err(map_mongo_err)?;

        Ok(MongoBackend {
            db: client.database(&config.database),
        })
    }
}

/// Classify driver errors into the store taxonomy.
fn map_mongo_err(e: mongodb::error::Error) -> StoreError {
    use mongodb::error::ErrorKind;

    match e.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. } => StoreError::Connectivity(e.to_string()),
        ErrorKind::BsonDeserialization(_) => StoreError::DataIntegrity(e.to_string()),
        ErrorKind::BsonSerialization(_) => StoreError::Serialization(e.to_string()),
        ErrorKind::InvalidArgument { .. } => StoreError::config("MONGODB_URI", e.to_string()),
        _ => StoreError::Storage(e.to_string()),
    }
}

fn index(keys: Document, unique: bool) -> IndexModel {
    let options = IndexOptions::builder().unique(unique).build();
    IndexModel::builder().keys(keys).options(options).build()
}

#[async_trait]
impl Backend for MongoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    #[tracing::instrument(skip(self))]
    async fn initialize(&self) -> Result<()> {
        self.ping().await?;

        // create_index is a no-op when an identical index already exists
        let plan: [(&str, Vec<IndexModel>); 4] = [
            (
                LOGS,
                vec![index(doc! { "id": 1 }, true), index(doc! { "timestamp": -1 }, false)],
            ),
            (
                ORDERS,
                vec![
                    index(doc! { "id": 1 }, true),
                    index(doc! { "created_at": -1 }, false),
                    index(doc! { "status": 1, "created_at": -1 }, false),
                ],
            ),
            (
                REVIEWS,
                vec![
                    index(doc! { "id": 1 }, true),
                    index(doc! { "status": 1, "created_at": -1 }, false),
                ],
            ),
            (
                RESTOCKS,
                vec![
                    index(doc! { "id": 1 }, true),
                    index(doc! { "status": 1, "created_at": -1 }, false),
                ],
            ),
        ];

        for (name, models) in plan {
            self.db
                .collection::<Document>(name)
                .create_indexes(models)
                .await
                .map_err(map_mongo_err)?;
        }
        tracing::info!("mongodb indexes ready");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;
        Ok(())
    }

    async fn session(&self) -> Result<Box<dyn DatabaseService>> {
        Ok(Box::new(MongoSession {
            db: self.db.clone(),
        }))
    }
}

/// A scoped view over the shared database handle.
pub struct MongoSession {
    db: Database,
}

impl MongoSession {
    fn logs(&self) -> Collection<LogRow> {
        self.db.collection(LOGS)
    }

    fn orders(&self) -> Collection<OrderRow> {
        self.db.collection(ORDERS)
    }

    fn reviews(&self) -> Collection<ReviewRow> {
        self.db.collection(REVIEWS)
    }

    fn restocks(&self) -> Collection<RestockRow> {
        self.db.collection(RESTOCKS)
    }
}

#[async_trait]
impl DatabaseService for MongoSession {
    fn backend(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    async fn get_agent_logs(&self, limit: usize) -> Result<Vec<LogEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<LogRow> = self
            .logs()
            .find(doc! {})
            .sort(doc! { "timestamp": -1 })
            .limit(limit as i64)
            .await
            .map_err(map_mongo_err)?
            .try_collect()
            .await
            .map_err(map_mongo_err)?;
        decode_rows(rows)
    }

    async fn get_performance_metrics(&self, days: u32) -> Result<PerformanceSummary> {
        let since = window_start(days);
        let in_window = doc! { "created_at": { "$gte": since.as_str() } };

        let orders = self
            .orders()
            .count_documents(in_window.clone())
            .await
            .map_err(map_mongo_err)?;
        let returns = self
            .orders()
            .count_documents(doc! {
                "created_at": { "$gte": since.as_str() },
                "status": OrderStatus::Returned.as_str(),
            })
            .await
            .map_err(map_mongo_err)?;
        let restocks = self
            .restocks()
            .count_documents(in_window)
            .await
            .map_err(map_mongo_err)?;
        let automated = self
            .restocks()
            .count_documents(doc! {
                "created_at": { "$gte": since.as_str() },
                "source": RestockSource::Agent.as_str(),
            })
            .await
            .map_err(map_mongo_err)?;

        Ok(PerformanceSummary::from_counts(orders, returns, restocks, automated))
    }

    async fn get_pending_reviews(&self) -> Result<Vec<ReviewRecord>> {
        let rows: Vec<ReviewRow> = self
            .reviews()
            .find(doc! { "status": ReviewStatus::Pending.as_str() })
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(map_mongo_err)?
            .try_collect()
            .await
            .map_err(map_mongo_err)?;
        decode_rows(rows)
    }

    async fn get_restock_requests(&self) -> Result<Vec<RestockRecord>> {
        let rows: Vec<RestockRow> = self
            .restocks()
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(map_mongo_err)?
            .try_collect()
            .await
            .map_err(map_mongo_err)?;
        decode_rows(rows)
    }

    async fn get_orders(&self, limit: usize) -> Result<Vec<OrderRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<OrderRow> = self
            .orders()
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .limit(limit as i64)
            .await
            .map_err(map_mongo_err)?
            .try_collect()
            .await
            .map_err(map_mongo_err)?;
        decode_rows(rows)
    }

    fn writer(&self) -> Option<&dyn RecordWriter> {
        Some(self)
    }
}

#[async_trait]
impl RecordWriter for MongoSession {
    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.logs()
            .insert_one(LogRow::from(entry))
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }

    async fn insert_order(&self, order: &OrderRecord) -> Result<()> {
        self.orders()
            .insert_one(OrderRow::from(order))
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }

    async fn insert_review(&self, review: &ReviewRecord) -> Result<()> {
        self.reviews()
            .insert_one(ReviewRow::from(review))
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }

    async fn insert_restock_request(&self, request: &RestockRecord) -> Result<()> {
        self.restocks()
            .insert_one(RestockRow::from(request))
            .await
            .map_err(map_mongo_err)?;
        Ok(())
    }

    async fn set_review_status(&self, id: &str, status: ReviewStatus) -> Result<bool> {
        let result = self
            .reviews()
            .update_one(doc! { "id": id }, doc! { "$set": { "status": status.as_str() } })
            .await
            .map_err(map_mongo_err)?;
        Ok(result.matched_count > 0)
    }

    async fn set_restock_status(&self, id: &str, status: RestockStatus) -> Result<bool> {
        let result = self
            .restocks()
            .update_one(doc! { "id": id }, doc! { "$set": { "status": status.as_str() } })
            .await
            .map_err(map_mongo_err)?;
        Ok(result.matched_count > 0)
    }

    async fn prune_logs(
        &self,
        before: Option<DateTime<Utc>>,
        keep_latest: Option<usize>,
    ) -> Result<u64> {
        let mut removed = 0;
        if let Some(cutoff) = before {
            let result = self
                .logs()
                .delete_many(doc! { "timestamp": { "$lt": format_timestamp(&cutoff) } })
                .await
                .map_err(map_mongo_err)?;
            removed += result.deleted_count;
        }
        if let Some(keep) = keep_latest {
            // a zero limit means "no limit" to the server
            let kept: Vec<String> = if keep == 0 {
                Vec::new()
            } else {
                let rows: Vec<LogRow> = self
                    .logs()
                    .find(doc! {})
                    .sort(doc! { "timestamp": -1 })
                    .limit(keep as i64)
                    .await
                    .map_err(map_mongo_err)?
                    .try_collect()
                    .await
                    .map_err(map_mongo_err)?;
                rows.into_iter().map(|row| row.id).collect()
            };
            let result = self
                .logs()
                .delete_many(doc! { "id": { "$nin": kept } })
                .await
                .map_err(map_mongo_err)?;
            removed += result.deleted_count;
        }
        Ok(removed)
    }
}
