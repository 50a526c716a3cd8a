mod draft;
mod status;
mod upload;

use crate::routers::draft::update_draft;
use crate::routers::status::session_status;
use crate::routers::upload::{abort_session, create_session, session_entry};
use crate::services::states::SpoolState;
use axum::Router;
use axum::http::{HeaderName, Request};
use axum::routing::{get, post, put};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::info_span;

pub const VIDEOS_BASE: &str = "/api/v1/videos";

async fn healthz() -> &'static str {
    "ok"
}

pub fn router(state: Arc<SpoolState>) -> Router {
    let video_router = Router::new()
        .route("/", post(create_session))
        .route(
            "/session/{upload_id}",
            put(session_entry).delete(abort_session),
        )
        .route("/{upload_id}/status", get(session_status))
        .route("/{upload_id}/draft", put(update_draft))
        .with_state(state.clone());
    let trace_header = HeaderName::from_static("x-spool-request-id");
    Router::new()
        .route("/healthz", get(healthz))
        .nest(VIDEOS_BASE, video_router)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    trace_header.clone(),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                        let rid = req
                            .extensions()
                            .get::<RequestId>()
                            .and_then(|r| r.header_value().to_str().ok())
                            .unwrap_or("unknown");
                        info_span!(
                            "http.request",
                            request_id = %rid,
                            method = %req.method(),
                            uri = %req.uri(),
                        )
                    }),
                )
                .layer(PropagateRequestIdLayer::new(trace_header))
                .concurrency_limit(state.config.common.concurrency_limit),
        )
}
