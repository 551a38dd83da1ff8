//! # Tower Shape
//!
//! `tower-shape` puts the [`shape_limit`] traffic shaping controllers in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## How requests flow
//!
//! Every request is put to the shaper in `poll_ready`:
//!
//! 1. **Admitted**: the service becomes ready immediately.
//! 2. **Queued**: a uniform rate shaper reserved a later slot. The service stays
//!    pending for that long on a tokio timer, then becomes ready. Dropping the
//!    readiness future cancels the wait.
//! 3. **Rejected**: readiness fails with [`ShapeError::Rejected`].
//!
//! The [`ManagedShapingLayer`] adds a deadline on the inner call and maps every error
//! into the cloneable [`ShapeError`] domain.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`ShapeError`], allowing automatic conversion
//!   to HTTP status codes (429, 408, 500).

mod error;
mod layer;
mod managed_layer;
mod service;
mod utils;


pub use error::ShapeError;
pub use layer::ShapingLayer;
pub use managed_layer::ManagedShapingLayer;
pub use service::ResponseFuture;
pub use service::ShapingService;
pub use utils::ServiceBuilderExt;
