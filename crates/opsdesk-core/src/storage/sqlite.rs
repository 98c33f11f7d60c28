use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OpenFlags;
use deadpool::managed::{self, PoolError, RecycleResult};
use deadpool::Runtime;
use std::time::Duration;
use tokio_rusqlite::Connection;

use super::{
    decode_rows, window_start, Backend, DatabaseService, LogRow, OrderRow, RecordWriter,
    RestockRow, ReviewRow,
};
use crate::config::SqliteConfig;
use crate::error::{Result, StoreError};
use crate::types::{
    format_timestamp, BackendKind, LogEntry, OrderRecord, OrderStatus, PerformanceSummary,
    RestockRecord, RestockSource, RestockStatus, ReviewRecord, ReviewStatus,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agent_logs (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        action TEXT NOT NULL,
        status TEXT NOT NULL,
        details TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE IF NOT EXISTS orders (
        id TEXT PRIMARY KEY,
        customer TEXT NOT NULL,
        product TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        total REAL NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS reviews (
        id TEXT PRIMARY KEY,
        order_id TEXT,
        customer TEXT NOT NULL,
        rating INTEGER NOT NULL,
        comment TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS restock_requests (
        id TEXT PRIMARY KEY,
        product TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        source TEXT NOT NULL DEFAULT 'manual',
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_agent_logs_timestamp ON agent_logs(timestamp);
    CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);
    CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status);
    CREATE INDEX IF NOT EXISTS idx_restock_status ON restock_requests(status);
    CREATE INDEX IF NOT EXISTS idx_restock_created_at ON restock_requests(created_at);
";

/// Opens connections for the pool and checks them before reuse.
struct ConnectionManager {
    path: String,
    read_only: bool,
}

impl managed::Manager for ConnectionManager {
    type Type = Connection;
    type Error = StoreError;

    async fn create(&self) -> Result<Connection> {
        open_connection(&self.path, self.read_only).await
    }

    async fn recycle(
        &self,
        conn: &mut Connection,
        _: &managed::Metrics,
    ) -> RecycleResult<StoreError> {
        // a closed worker thread fails here and the pool opens a replacement
        conn.call(|conn| -> std::result::Result<i64, rusqlite::Error> {
            conn.query_row("SELECT 1", [], |row| row.get(0))
        })
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }
}

type Pool = managed::Pool<ConnectionManager>;

/// SQLite-backed storage using bundled SQLite (zero system dependencies).
///
/// Connections live in a bounded deadpool; every session checks one out
/// exclusively and hands it back when dropped.
pub struct SqliteBackend {
    pool: Pool,
    acquire_timeout: Duration,
    read_only: bool,
}

impl SqliteBackend {
    /// Open the pool described by `config`. Does not touch the schema.
    pub async fn new(config: &SqliteConfig) -> Result<Self> {
        let in_memory = config.path == ":memory:";
        if in_memory && config.read_only {
            return Err(StoreError::config(
                "SQLITE_READ_ONLY",
                "an in-memory database has no schema to read",
            ));
        }
        let size = if in_memory { 1 } else { config.pool_size.max(1) };

        let manager = ConnectionManager {
            path: config.path.clone(),
            read_only: config.read_only,
        };
        let pool = Pool::builder(manager)
            .max_size(size)
            .wait_timeout(Some(config.acquire_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Storage(format!("failed to build sqlite pool: {e}")))?;

        let backend = SqliteBackend {
            pool,
            acquire_timeout: config.acquire_timeout,
            read_only: config.read_only,
        };
        // surface an unopenable path now rather than on the first query
        drop(backend.acquire().await?);
        tracing::debug!(path = %config.path, size, read_only = config.read_only, "opened sqlite pool");
        Ok(backend)
    }

    /// Open a writable database at `path` with default pool settings and
    /// create the schema.
    pub async fn open(path: &str) -> Result<Self> {
        let config = SqliteConfig {
            path: path.to_string(),
            ..SqliteConfig::default()
        };
        let backend = Self::new(&config).await?;
        backend.initialize().await?;
        Ok(backend)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn acquire(&self) -> Result<SqliteSession> {
        let conn = self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => StoreError::PoolTimeout {
                waited_ms: self.acquire_timeout.as_millis() as u64,
            },
            PoolError::Backend(inner) => inner,
            PoolError::Closed => StoreError::Connectivity("sqlite pool closed".to_string()),
            other => StoreError::Storage(other.to_string()),
        })?;

        Ok(SqliteSession {
            conn,
            read_only: self.read_only,
        })
    }
}

async fn open_connection(path: &str, read_only: bool) -> Result<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory().await
    } else if read_only {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await
    } else {
        Connection::open(path).await
    }
    .map_err(|e| StoreError::Connectivity(format!("cannot open {path}: {e}")))?;

    conn.call(|conn| -> std::result::Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(())
    })
    .await?;
    Ok(conn)
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    #[tracing::instrument(skip(self))]
    async fn initialize(&self) -> Result<()> {
        if self.read_only {
            // the schema belongs to whoever owns the writable copy
            return self.ping().await;
        }
        let session = self.acquire().await?;
        session
            .conn
            .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                // Performance pragmas: WAL mode for concurrent reads
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    ",
                )?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        tracing::info!("sqlite schema ready");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let session = self.acquire().await?;
        session
            .conn
            .call(|conn| -> std::result::Result<i64, rusqlite::Error> {
                conn.query_row("SELECT 1", [], |row| row.get(0))
            })
            .await?;
        Ok(())
    }

    async fn session(&self) -> Result<Box<dyn DatabaseService>> {
        Ok(Box::new(self.acquire().await?))
    }
}

/// One checked-out connection. Dropping it returns the connection to the pool.
pub struct SqliteSession {
    conn: managed::Object<ConnectionManager>,
    read_only: bool,
}

#[async_trait]
impl DatabaseService for SqliteSession {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn get_agent_logs(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let rows = self
            .conn
            .call(move |conn| -> std::result::Result<Vec<LogRow>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, timestamp, action, status, details FROM agent_logs
                     ORDER BY timestamp DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
                    Ok(LogRow {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        action: row.get(2)?,
                        status: row.get(3)?,
                        details: row.get(4)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        decode_rows(rows)
    }

    async fn get_performance_metrics(&self, days: u32) -> Result<PerformanceSummary> {
        let since = window_start(days);
        let (orders, returns, restocks, automated) = self
            .conn
            .call(move |conn| -> std::result::Result<(i64, i64, i64, i64), rusqlite::Error> {
                let (orders, returns) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = ?2 THEN 1 ELSE 0 END), 0)
                     FROM orders WHERE created_at >= ?1",
                    rusqlite::params![since, OrderStatus::Returned.as_str()],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )?;
                let (restocks, automated) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(CASE WHEN source = ?2 THEN 1 ELSE 0 END), 0)
                     FROM restock_requests WHERE created_at >= ?1",
                    rusqlite::params![since, RestockSource::Agent.as_str()],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )?;
                Ok((orders, returns, restocks, automated))
            })
            .await?;

        Ok(PerformanceSummary::from_counts(
            count(orders)?,
            count(returns)?,
            count(restocks)?,
            count(automated)?,
        ))
    }

    async fn get_pending_reviews(&self) -> Result<Vec<ReviewRecord>> {
        let rows = self
            .conn
            .call(|conn| -> std::result::Result<Vec<ReviewRow>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, order_id, customer, rating, comment, status, created_at
                     FROM reviews WHERE status = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![ReviewStatus::Pending.as_str()],
                    |row| {
                        Ok(ReviewRow {
                            id: row.get(0)?,
                            order_id: row.get(1)?,
                            customer: row.get(2)?,
                            rating: row.get(3)?,
                            comment: row.get(4)?,
                            status: row.get(5)?,
                            created_at: row.get(6)?,
                        })
                    },
                )?;
                rows.collect()
            })
            .await?;
        decode_rows(rows)
    }

    async fn get_restock_requests(&self) -> Result<Vec<RestockRecord>> {
        let rows = self
            .conn
            .call(|conn| -> std::result::Result<Vec<RestockRow>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, product, quantity, status, source, created_at
                     FROM restock_requests ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(RestockRow {
                        id: row.get(0)?,
                        product: row.get(1)?,
                        quantity: row.get(2)?,
                        status: row.get(3)?,
                        source: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        decode_rows(rows)
    }

    async fn get_orders(&self, limit: usize) -> Result<Vec<OrderRecord>> {
        let rows = self
            .conn
            .call(move |conn| -> std::result::Result<Vec<OrderRow>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, customer, product, quantity, total, status, created_at
                     FROM orders ORDER BY created_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
                    Ok(OrderRow {
                        id: row.get(0)?,
                        customer: row.get(1)?,
                        product: row.get(2)?,
                        quantity: row.get(3)?,
                        total: row.get(4)?,
                        status: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?;
                rows.collect()
            })
            .await?;
        decode_rows(rows)
    }

    fn writer(&self) -> Option<&dyn RecordWriter> {
        if self.read_only {
            None
        } else {
            Some(self)
        }
    }
}

#[async_trait]
impl RecordWriter for SqliteSession {
    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        let row = LogRow::from(entry);
        self.conn
            .call(move |conn| -> std::result::Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO agent_logs (id, timestamp, action, status, details)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![row.id, row.timestamp, row.action, row.status, row.details],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn insert_order(&self, order: &OrderRecord) -> Result<()> {
        let row = OrderRow::from(order);
        self.conn
            .call(move |conn| -> std::result::Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO orders (id, customer, product, quantity, total, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        row.id,
                        row.customer,
                        row.product,
                        row.quantity,
                        row.total,
                        row.status,
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn insert_review(&self, review: &ReviewRecord) -> Result<()> {
        let row = ReviewRow::from(review);
        self.conn
            .call(move |conn| -> std::result::Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO reviews (id, order_id, customer, rating, comment, status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        row.id,
                        row.order_id,
                        row.customer,
                        row.rating,
                        row.comment,
                        row.status,
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn insert_restock_request(&self, request: &RestockRecord) -> Result<()> {
        let row = RestockRow::from(request);
        self.conn
            .call(move |conn| -> std::result::Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO restock_requests (id, product, quantity, status, source, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        row.id,
                        row.product,
                        row.quantity,
                        row.status,
                        row.source,
                        row.created_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn set_review_status(&self, id: &str, status: ReviewStatus) -> Result<bool> {
        let id = id.to_string();
        let count = self
            .conn
            .call(move |conn| -> std::result::Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE reviews SET status = ?2 WHERE id = ?1",
                    rusqlite::params![id, status.as_str()],
                )
            })
            .await?;
        Ok(count > 0)
    }

    async fn set_restock_status(&self, id: &str, status: RestockStatus) -> Result<bool> {
        let id = id.to_string();
        let count = self
            .conn
            .call(move |conn| -> std::result::Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE restock_requests SET status = ?2 WHERE id = ?1",
                    rusqlite::params![id, status.as_str()],
                )
            })
            .await?;
        Ok(count > 0)
    }

    async fn prune_logs(
        &self,
        before: Option<DateTime<Utc>>,
        keep_latest: Option<usize>,
    ) -> Result<u64> {
        let before = before.map(|ts| format_timestamp(&ts));
        let removed = self
            .conn
            .call(move |conn| -> std::result::Result<usize, rusqlite::Error> {
                let tx = conn.transaction()?;
                let mut removed = 0;
                if let Some(ref cutoff) = before {
                    removed += tx.execute(
                        "DELETE FROM agent_logs WHERE timestamp < ?1",
                        rusqlite::params![cutoff],
                    )?;
                }
                if let Some(keep) = keep_latest {
                    removed += tx.execute(
                        "DELETE FROM agent_logs WHERE id NOT IN (
                            SELECT id FROM agent_logs ORDER BY timestamp DESC LIMIT ?1
                         )",
                        rusqlite::params![keep as i64],
                    )?;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed as u64)
    }
}

fn count(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::DataIntegrity(format!("negative count {value}")))
}
