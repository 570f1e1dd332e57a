//! HTTP router for the Queuestack server

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Host, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use tower_http::trace::TraceLayer;

use queuestack_core::RequestId;
use queuestack_sqs::{handlers, QueueRegistry};

use crate::admin;

/// Service state for the main router
pub struct AppState {
    pub registry: Arc<QueueRegistry>,
}

/// Middleware to add an x-amzn-requestid header to all responses
async fn add_request_id(request: axum::http::Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let request_id = RequestId::new();
    if let Ok(value) = request_id.as_str().parse() {
        response.headers_mut().insert("x-amzn-requestid", value);
    }
    response
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(health_check))
        .route("/admin", get(admin::admin_page))
        .route("/admin/api/queues", get(admin::queue_snapshot))
        .route("/", get(banner).post(handle_sqs))
        .route("/*path", post(handle_sqs))
        .layer(middleware::from_fn(add_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

async fn health_check() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"status":"healthy"}"#))
        .unwrap()
}

async fn banner() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("Queuestack - local SQS emulator\n"))
        .unwrap()
}

/// Every POST lands on the protocol adapter, whichever path the SDK used.
async fn handle_sqs(
    State(state): State<Arc<AppState>>,
    Host(host): Host,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handlers::handle_request(State(state.registry.clone()), Host(host), headers, body).await
}
