use pyo3::prelude::*;
use std::sync::{Arc, OnceLock};

use opsdesk_core::{
    init_database, Backend, BackendKind, DatabaseConfig, StatusAggregator, StatusConfig,
    StoreError,
};
use tracing_subscriber::EnvFilter;

use crate::convert::{log_entry_to_py, snapshot_to_py};

/// Shared Tokio runtime for every StatusMonitor in the interpreter.
static SHARED_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

fn get_runtime() -> &'static tokio::runtime::Runtime {
    SHARED_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create shared Tokio runtime")
    })
}

/// Map a store error onto the closest Python exception.
fn store_err_to_py(e: StoreError) -> PyErr {
    match e {
        StoreError::Connectivity(_) | StoreError::PoolTimeout { .. } | StoreError::Timeout { .. } => {
            PyErr::new::<pyo3::exceptions::PyConnectionError, _>(e.to_string())
        }
        StoreError::Configuration { .. } => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
        }
        other => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(other.to_string()),
    }
}

/// Install a stderr tracing subscriber. Returns False if one was already set.
#[pyfunction]
#[pyo3(signature = (filter=None))]
pub fn init_logging(filter: Option<&str>) -> PyResult<bool> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok())
}

/// Health/status entry point for the HTTP gateway.
///
/// The first monitor created in a process selects the backend; later ones
/// share it regardless of their arguments.
#[pyclass(name = "StatusMonitor")]
pub struct StatusMonitor {
    backend: Arc<dyn Backend>,
    aggregator: StatusAggregator,
}

#[pymethods]
impl StatusMonitor {
    /// Read configuration from the environment (and `.env`) and initialize
    /// the database. `database_type` overrides `DATABASE_TYPE`.
    #[new]
    #[pyo3(signature = (database_type=None))]
    fn new(py: Python<'_>, database_type: Option<&str>) -> PyResult<Self> {
        let mut config = DatabaseConfig::from_env().map_err(store_err_to_py)?;
        if let Some(kind) = database_type {
            config.backend = BackendKind::from_setting(Some(kind));
        }
        let status_config = StatusConfig::from_env().map_err(store_err_to_py)?;

        let backend = py
            .allow_threads(|| get_runtime().block_on(init_database(&config)))
            .map_err(store_err_to_py)?;
        tracing::info!(backend = %backend.kind(), "status monitor ready");

        Ok(StatusMonitor {
            aggregator: StatusAggregator::new(Arc::clone(&backend), status_config),
            backend,
        })
    }

    /// Name of the active backend ("sqlite" or "mongodb").
    #[getter]
    fn backend(&self) -> &'static str {
        self.backend.kind().as_str()
    }

    /// Current status snapshot as a dict. Never raises for backend failures;
    /// those come back with status "error".
    fn get_status(&self, py: Python<'_>) -> PyResult<PyObject> {
        let snapshot = py.allow_threads(|| get_runtime().block_on(self.aggregator.get_status()));
        snapshot_to_py(py, &snapshot)
    }

    /// Call `agent()` and log the outcome. Returns the agent's truthiness;
    /// an exception from the agent counts as failure and is logged.
    fn run_agent(&self, py: Python<'_>, agent: PyObject) -> bool {
        let aggregator = &self.aggregator;
        py.allow_threads(move || {
            get_runtime().block_on(aggregator.run_agent(move || async move {
                Python::with_gil(|py| agent.call0(py).and_then(|out| out.bind(py).is_truthy()))
            }))
        })
    }

    /// The most recent agent log entries as a list of dicts.
    #[pyo3(signature = (limit=10))]
    fn recent_logs(&self, py: Python<'_>, limit: usize) -> PyResult<PyObject> {
        let backend = Arc::clone(&self.backend);
        let logs = py
            .allow_threads(|| {
                get_runtime().block_on(async move {
                    let session = backend.session().await?;
                    session.get_agent_logs(limit).await
                })
            })
            .map_err(store_err_to_py)?;

        let list = pyo3::types::PyList::empty(py);
        for entry in &logs {
            list.append(log_entry_to_py(py, entry)?)?;
        }
        Ok(list.into_any().unbind())
    }

    fn __repr__(&self) -> String {
        format!("StatusMonitor(backend={})", self.backend.kind())
    }
}
