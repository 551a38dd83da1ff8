use axum::{
    Router, error_handling::HandleErrorLayer, extract::Request, http::StatusCode,
    response::IntoResponse, routing::get,
};
use shape_limit::{PassCounter, ShaperRule};
use std::sync::Arc;
use std::time::Duration;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_shape::{ManagedShapingLayer, ShapeError};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info,shape_limit=debug"))
        .init();

    // 1. Setup Shaper: ramp up to 10 req/s over 10 seconds
    let counter = Arc::new(PassCounter::new());
    let shaper = ShaperRule::warm_up(10.0, 10).build(counter.clone())?;

    // 2. Setup Managed Layer, fed by the same counter the shaper reads
    let managed_layer = ManagedShapingLayer::<_, Request>::new(shaper, Duration::from_millis(500))
        .with_pass_counter(counter);

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Shape!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_shape_error))
                // 2. The middle layer: introduces BoxError
                .layer(managed_layer)
                // 3. Converts the Route's Infallible to BoxError
                // so that ManagedShapingLayer is happy wrapping it.
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}

/// The signature must match BoxError -> IntoResponse
async fn handle_shape_error(err: tower::BoxError) -> impl IntoResponse {
    if let Some(shape_err) = err.downcast_ref::<ShapeError>() {
        shape_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
