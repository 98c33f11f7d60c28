use pyo3::prelude::*;

#[pymodule]
fn opsdesk_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", "0.1.0")?;
    m.add_class::<StatusMonitor>()?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    Ok(())
}

mod convert;
mod monitor;

pub use monitor::{init_logging, StatusMonitor};
