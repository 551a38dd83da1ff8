use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use shape_limit::PassCounter;
use shape_limit::TrafficShaper;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::util::BoxCloneSyncService;

use crate::ShapeError;
use crate::ShapingService;

/// A pre-composed traffic shaping stack.
///
/// Load shedding is the shaper's own decision: a request the shaper refuses fails at
/// once, and an admitted request waits at most the shaper's queueing bound before it
/// is forwarded.
///
/// ### Error Responsibilities:
/// - **Rejection (`ShapeError::Rejected`)**: The shaper refused the request. This
///   happens at the `poll_ready` stage and is near-instant.
/// - **Timeout (`ShapeError::Timeout`)**: Occurs if the *inner service*
///   takes longer than `max_wait` to respond (e.g., a slow database query).
/// - **Inner (`ShapeError::Inner`)**: Any other error from the inner service.
pub struct ManagedShapingLayer<L, Req>
where
    L: ?Sized,
{
    shaper: Arc<L>,
    pass_counter: Option<Arc<PassCounter>>,
    max_wait: Duration,
    _phantom: PhantomData<fn(Req)>,
}

// Note: Deriving Clone causes issues when using the layer with Axum.
// We'll just implemented it explicitly.
impl<L, Req> Clone for ManagedShapingLayer<L, Req>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            shaper: self.shaper.clone(),
            pass_counter: self.pass_counter.clone(),
            max_wait: self.max_wait,
            _phantom: PhantomData,
        }
    }
}

impl<S, L, Req> Layer<S> for ManagedShapingLayer<L, Req>
where
    L: TrafficShaper + ?Sized + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Response: 'static,
    Req: Send + 'static,
{
    type Service = BoxCloneSyncService<Req, S::Response, BoxError>;

    fn layer(&self, inner: S) -> Self::Service {
        let mut shaped = ShapingService::new(inner, self.shaper.clone());
        if let Some(counter) = &self.pass_counter {
            shaped = shaped.with_pass_counter(counter.clone());
        }

        let svc = tower::ServiceBuilder::new()
            .timeout(self.max_wait)
            .service(shaped);

        // Map the mixed errors into ShapeError
        let mapped_svc = tower::util::MapErr::new(svc, |err: BoxError| {
            if err.is::<tower::timeout::error::Elapsed>() {
                BoxError::from(ShapeError::Timeout)
            } else if err.is::<ShapeError>() {
                err
            } else {
                // Wrap any other inner service errors
                Box::from(ShapeError::Inner(err.to_string()))
            }
        });

        BoxCloneSyncService::new(mapped_svc)
    }
}

impl<L, Req> ManagedShapingLayer<L, Req>
where
    L: TrafficShaper + ?Sized,
{
    pub fn new(shaper: Arc<L>, max_wait: Duration) -> Self {
        Self {
            shaper,
            pass_counter: None,
            max_wait,
            _phantom: PhantomData,
        }
    }

    /// Record every admitted request in `counter`.
    pub fn with_pass_counter(mut self, counter: Arc<PassCounter>) -> Self {
        self.pass_counter = Some(counter);
        self
    }
}
