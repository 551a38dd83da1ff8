use shape_limit::Reason;

/// Errors produced by the Tower Shape middleware stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShapeError {
    /// The shaper refused the request.
    ///
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`,
    /// with a `Retry-After` header when the refusal was a queueing delay.
    #[error("Request rejected by traffic shaping: {reason:?}")]
    Rejected {
        /// Why the shaper refused.
        reason: Reason,
    },

    /// The admitted request did not complete within the allowed time.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out")]
    Timeout,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ShapeError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match &self {
            Self::Rejected { reason } => {
                let header = match reason {
                    Reason::QueueingDelay { wait } => {
                        let secs = wait.as_secs().max(1);
                        Some((
                            axum::http::header::RETRY_AFTER,
                            axum::http::HeaderValue::from(secs),
                        ))
                    }
                    Reason::RateExceeded { .. } | Reason::Closed => None,
                };
                (StatusCode::TOO_MANY_REQUESTS, self.to_string(), header)
            }
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string(), None),
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
