//! # py-shape-limit
//!
//! `py-shape-limit` a Python wrapper for `shape-limit`.


mod python;

#[pyo3::prelude::pymodule]
fn py_shape_limit(
    m: pyo3::prelude::Bound<'_, pyo3::prelude::PyModule>,
) -> pyo3::prelude::PyResult<()> {
    python::init_python_module(&m)?;
    Ok(())
}
