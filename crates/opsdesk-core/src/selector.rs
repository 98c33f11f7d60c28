//! Backend selection.
//!
//! [`connect`] is a pure factory: configuration in, initialized backend out.
//! [`init_database`] wraps it in a process-wide cell so the choice is made
//! exactly once; switching backends requires a restart.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::DatabaseConfig;
use crate::error::{Result, StoreError};
use crate::storage::{Backend, DatabaseService, SqliteBackend};
use crate::types::BackendKind;

static ACTIVE: OnceCell<Arc<dyn Backend>> = OnceCell::const_new();

/// Build and initialize the backend named by `config`.
///
/// Failure is returned as-is; there is no fallback to the other engine.
#[tracing::instrument(skip(config), fields(backend = %config.backend))]
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Sqlite => Arc::new(SqliteBackend::new(&config.sqlite).await?),
        #[cfg(feature = "mongodb")]
        BackendKind::MongoDb => {
            Arc::new(crate::storage::MongoBackend::new(&config.mongodb).await?)
        }
        #[cfg(not(feature = "mongodb"))]
        BackendKind::MongoDb => {
            return Err(StoreError::config(
                "DATABASE_TYPE",
                "mongodb selected but this build lacks the 'mongodb' feature",
            ))
        }
    };

    if let Err(e) = backend.initialize().await {
        tracing::error!(error = %e, "database initialization failed");
        return Err(e);
    }
    tracing::info!("database ready");
    Ok(backend)
}

/// Select and initialize the process-wide backend.
///
/// The first successful call wins. Later calls return the same backend; if
/// they ask for a different engine the request is ignored with a warning.
/// A failed first call leaves nothing selected.
pub async fn init_database(config: &DatabaseConfig) -> Result<Arc<dyn Backend>> {
    let backend = ACTIVE.get_or_try_init(|| connect(config)).await?;
    if backend.kind() != config.backend {
        tracing::warn!(
            active = %backend.kind(),
            requested = %config.backend,
            "backend already selected for this process; restart to switch"
        );
    }
    Ok(Arc::clone(backend))
}

/// The backend chosen by [`init_database`].
pub fn active_backend() -> Result<Arc<dyn Backend>> {
    ACTIVE.get().cloned().ok_or(StoreError::NotInitialized)
}

/// A fresh scoped session on the active backend.
pub async fn get_database() -> Result<Box<dyn DatabaseService>> {
    active_backend()?.session().await
}
