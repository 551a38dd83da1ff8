use std::sync::Arc;
use std::time::Duration;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use shape_limit::ConfigError;
use shape_limit::DEFAULT_COLD_FACTOR;
use shape_limit::PassCounter;
use shape_limit::TrafficShaper;
use shape_limit::UniformRate;
use shape_limit::WarmUp;

fn config_error(err: ConfigError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Spaces passes evenly, queueing callers for up to `max_queueing_delay_ms`.
#[pyclass(name = "UniformRate", frozen)]
struct PyUniformRate(UniformRate);

#[pymethods]
impl PyUniformRate {
    #[new]
    fn new(max_queueing_delay_ms: u64, target_rate: f64) -> Self {
        PyUniformRate(UniformRate::new(
            Duration::from_millis(max_queueing_delay_ms),
            target_rate,
        ))
    }

    /// Blocks the calling thread for the queueing delay, with the GIL released.
    #[pyo3(signature = (acquire_count = 1, prioritized = false))]
    fn can_pass(&self, py: Python<'_>, acquire_count: i32, prioritized: bool) -> bool {
        py.detach(|| self.0.can_pass(acquire_count, prioritized))
    }

    #[getter]
    fn latest_passed_ms(&self) -> Option<i64> {
        self.0.latest_passed_millis()
    }
}

/// Ramps the allowed rate up from `target_rate / cold_factor` while traffic rises.
///
/// The shaper reads throughput from an internal counter; report every pass with
/// `record`.
#[pyclass(name = "WarmUp", frozen)]
struct PyWarmUp {
    shaper: WarmUp,
    counter: Arc<PassCounter>,
}

#[pymethods]
impl PyWarmUp {
    #[new]
    #[pyo3(signature = (target_rate, warm_up_period_secs, cold_factor = DEFAULT_COLD_FACTOR))]
    fn new(target_rate: f64, warm_up_period_secs: u32, cold_factor: u32) -> PyResult<Self> {
        let counter = Arc::new(PassCounter::new());
        let shaper = WarmUp::new(
            target_rate,
            warm_up_period_secs,
            cold_factor,
            counter.clone(),
        )
        .map_err(config_error)?;
        Ok(PyWarmUp { shaper, counter })
    }

    #[pyo3(signature = (acquire_count = 1, prioritized = false))]
    fn can_pass(&self, py: Python<'_>, acquire_count: i32, prioritized: bool) -> bool {
        py.detach(|| self.shaper.can_pass(acquire_count, prioritized))
    }

    fn record(&self, count: u64) {
        self.counter.record(count);
    }

    #[getter]
    fn warning_token(&self) -> i64 {
        self.shaper.warning_token()
    }

    #[getter]
    fn max_token(&self) -> i64 {
        self.shaper.max_token()
    }

    #[getter]
    fn slope(&self) -> f64 {
        self.shaper.slope()
    }

    #[getter]
    fn stored_tokens(&self) -> i64 {
        self.shaper.stored_tokens()
    }

    #[getter]
    fn allowed_rate(&self) -> f64 {
        self.shaper.allowed_rate()
    }
}

pub fn init_python_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyUniformRate>()?;
    m.add_class::<PyWarmUp>()?;
    Ok(())
}
