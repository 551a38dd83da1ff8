use std::sync::Arc;
use std::time::Duration;

use shape_limit::PassCounter;
use shape_limit::TrafficShaper;
use tower::Layer;

use crate::service::ShapingService;

/// Applies traffic shaping to requests.
#[derive(Debug)]
pub struct ShapingLayer<L>
where
    L: ?Sized,
{
    shaper: Arc<L>,
    pass_counter: Option<Arc<PassCounter>>,
    timeout: Option<Duration>,
}

impl<L> Clone for ShapingLayer<L>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            shaper: Arc::clone(&self.shaper),
            pass_counter: self.pass_counter.clone(),
            timeout: self.timeout,
        }
    }
}

impl<L> ShapingLayer<L>
where
    L: TrafficShaper + ?Sized,
{
    /// Create a ShapingLayer
    pub fn new(shaper: Arc<L>) -> Self {
        ShapingLayer {
            shaper,
            pass_counter: None,
            timeout: None,
        }
    }

    /// Record every admitted request in `counter`.
    ///
    /// Share the same counter with a [`shape_limit::WarmUp`] shaper so it sees the
    /// traffic this layer lets through.
    pub fn with_pass_counter(mut self, counter: Arc<PassCounter>) -> Self {
        self.pass_counter = Some(counter);
        self
    }

    /// Bound the inner service call.
    ///
    /// If the call takes longer than this duration, the service
    /// will return `ShapeError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<L, S> Layer<S> for ShapingLayer<L>
where
    L: ?Sized,
{
    type Service = ShapingService<L, S>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = ShapingService::new(service, self.shaper.clone());
        if let Some(counter) = &self.pass_counter {
            svc = svc.with_pass_counter(counter.clone());
        }
        if let Some(timeout) = self.timeout {
            svc = svc.with_timeout(timeout);
        }
        svc
    }
}
