use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use serde_json::Value;

use opsdesk_core::{LogEntry, StatusSnapshot};

/// Recursively convert a serde_json::Value to a Python object.
fn json_to_py_object(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    let obj = match value {
        Value::Null => py.None(),
        Value::Bool(b) => b.into_pyobject(py)?.to_owned().into_any().unbind(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into_pyobject(py)?.into_any().unbind()
            } else if let Some(u) = n.as_u64() {
                u.into_pyobject(py)?.into_any().unbind()
            } else if let Some(f) = n.as_f64() {
                f.into_pyobject(py)?.into_any().unbind()
            } else {
                py.None()
            }
        }
        Value::String(s) => s.into_pyobject(py)?.into_any().unbind(),
        Value::Array(arr) => {
            let list = PyList::empty(py);
            for item in arr {
                list.append(json_to_py_object(py, item)?)?;
            }
            list.into_any().unbind()
        }
        Value::Object(map) => {
            let d = PyDict::new(py);
            for (k, v) in map {
                d.set_item(k, json_to_py_object(py, v)?)?;
            }
            d.into_any().unbind()
        }
    };
    Ok(obj)
}

/// Convert a status snapshot to the dict shape the gateway returns as JSON.
/// Absent metrics become `{}` and `error` is only present on degraded snapshots.
pub fn snapshot_to_py(py: Python<'_>, snapshot: &StatusSnapshot) -> PyResult<PyObject> {
    let value = serde_json::to_value(snapshot)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))?;
    json_to_py_object(py, &value)
}

/// Convert a log entry to a flat dict with string-valued action and status.
pub fn log_entry_to_py(py: Python<'_>, entry: &LogEntry) -> PyResult<PyObject> {
    let d = PyDict::new(py);
    d.set_item("id", &entry.id)?;
    d.set_item("timestamp", entry.timestamp.to_rfc3339())?;
    d.set_item("action", entry.action.to_string())?;
    d.set_item("status", entry.status.as_str())?;
    d.set_item("details", &entry.details)?;
    Ok(d.into_any().unbind())
}
