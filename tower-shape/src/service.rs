use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tokio::time::Sleep;
use tokio::time::Timeout;
use tokio::time::sleep;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;

use shape_limit::PassCounter;
use shape_limit::TrafficShaper;

use crate::error::ShapeError;

#[derive(Clone, Debug)]
struct ShapingServiceMetrics {
    admitted: Counter<u64>,
    queued: Counter<u64>,
    rejected: Counter<u64>,
}

/// Asks a [`TrafficShaper`] about every request before it reaches the inner service.
///
/// Admitted requests that must queue wait inside `poll_ready`. The wait is a tokio
/// timer, so dropping the readiness future cancels it. The queued slot is not handed
/// back: the shaper has already counted it.
#[derive(Debug)]
pub struct ShapingService<L, S>
where
    L: ?Sized,
{
    inner: S,
    shaper: Arc<L>,
    pass_counter: Option<Arc<PassCounter>>,
    sleep: Option<Pin<Box<Sleep>>>,
    permit_acquired: bool,
    timeout: Option<Duration>,
    instruments: ShapingServiceMetrics,
}

pin_project! {
    /// A future that wraps the inner service future with a timeout.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Timeout<F>,
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: From<BoxError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(BoxError::from(ShapeError::Timeout)))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// Manually implement Clone because Pin<Box<Sleep>> cannot be cloned
impl<L, S> Clone for ShapingService<L, S>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shaper: Arc::clone(&self.shaper),
            pass_counter: self.pass_counter.clone(),
            // We start with a fresh sleep state for the new clone
            sleep: None,
            permit_acquired: false,
            timeout: self.timeout,
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, Req> Service<Req> for ShapingService<L, S>
where
    L: TrafficShaper + ?Sized + 'static,
    S: Service<Req, Error = BoxError>,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // 1. Finish any queueing delay we were told to observe
        if let Some(ref mut fut) = self.sleep {
            match fut.as_mut().poll(cx) {
                Poll::Ready(_) => {
                    self.sleep = None;
                    self.permit_acquired = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        // 2. Check inner service readiness FIRST to avoid reserving slots we cannot use
        match self.inner.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        // 3. Ask the shaper if we don't have a permit yet
        if !self.permit_acquired {
            let labels = [KeyValue::new("shaper", self.shaper.kind())];
            match self.shaper.admit(1, false) {
                ControlFlow::Continue(wait) => {
                    self.instruments.admitted.add(1, &labels);
                    if let Some(counter) = &self.pass_counter {
                        counter.record(1);
                    }

                    if wait.is_zero() {
                        self.permit_acquired = true;
                    } else {
                        self.instruments.queued.add(1, &labels);
                        tracing::trace!(?wait, "request queued by shaper");

                        let mut sleep_fut = Box::pin(sleep(wait));
                        match sleep_fut.as_mut().poll(cx) {
                            Poll::Pending => {
                                self.sleep = Some(sleep_fut);
                                return Poll::Pending;
                            }
                            Poll::Ready(_) => {
                                self.permit_acquired = true;
                            }
                        }
                    }
                }
                ControlFlow::Break(reason) => {
                    self.instruments.rejected.add(1, &labels);
                    return Poll::Ready(Err(BoxError::from(ShapeError::Rejected { reason })));
                }
            }
        }

        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        self.permit_acquired = false;
        let timeout_duration = self
            .timeout
            .unwrap_or(Duration::from_secs(3600 * 24 * 365)); // Effective infinity

        ResponseFuture {
            inner: timeout(timeout_duration, self.inner.call(req)),
        }
    }
}

impl<L, S> ShapingService<L, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, shaper: Arc<L>) -> Self {
        let meter = global::meter("shaping_service");
        let instruments = ShapingServiceMetrics {
            admitted: meter.u64_counter("admitted").build(),
            queued: meter.u64_counter("queued").build(),
            rejected: meter.u64_counter("rejected").build(),
        };

        Self {
            inner,
            shaper,
            pass_counter: None,
            sleep: None,
            permit_acquired: false,
            timeout: None,
            instruments,
        }
    }

    pub fn with_pass_counter(mut self, counter: Arc<PassCounter>) -> Self {
        self.pass_counter = Some(counter);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
