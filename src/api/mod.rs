use crate::config::Config;
use crate::error::Result;
use crate::services::registry::SessionRegistry;
use crate::store::MessageStore;
use axum::body::Body;
use axum::http::Request;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod inbox;
pub mod middleware;
pub mod schemas;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub store: Arc<dyn MessageStore>,
}

/// Configures and returns the application router.
pub fn app_router(config: Config, registry: Arc<SessionRegistry>, store: Arc<dyn MessageStore>) -> Router {
    let state = AppState { config, registry, store };

    let api_routes = Router::new()
        .route("/sessions", post(inbox::login))
        .route("/sessions", delete(inbox::logout))
        .route("/threads", get(inbox::list_threads))
        .route("/threads/close", post(inbox::close_thread))
        .route("/threads/{conversationKey}", get(inbox::open_thread))
        .route("/threads/{conversationKey}", delete(inbox::delete_thread))
        .route("/threads/{conversationKey}/messages", post(inbox::reply))
        .route("/threads/{conversationKey}/read", put(inbox::mark_read))
        .route("/messages", post(inbox::send_message))
        .route("/messages/{id}", delete(inbox::delete_message));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %response.status().as_u16(),
                            "request completed"
                        );
                    },
                ),
        )
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Result<StatusCode> {
    state.store.probe().await?;
    Ok(StatusCode::OK)
}
