//! 路由装配：共享接口先检查会话，再鉴权，最后进入处理器。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::{self, AuthManager};
use crate::config::{AUTH_REQUEST_MAX_BYTES, DELETE_REQUEST_MAX_BYTES, ZIP_REQUEST_MAX_BYTES};
use crate::events::{self, EventHub, EventStreamConfig};
use crate::session::{self, SessionSlot};
use crate::settings::{self, SharedSettings};
use crate::{archive, files, frontend, http, upload};

/// 请求处理所需的共享状态。
#[derive(Clone)]
pub struct AppContext {
    pub session: Arc<SessionSlot>,
    pub auth: Arc<AuthManager>,
    pub settings: SharedSettings,
    pub events: EventHub,
    pub stream: EventStreamConfig,
}

pub fn build_router(ctx: &AppContext) -> Router {
    let share_routes = Router::new()
        .route("/api/files", get(files::list_files))
        .route("/api/download", get(files::download_file))
        .route("/api/preview", get(files::preview_file))
        .route(
            "/api/download-zip",
            post(archive::download_zip).layer(DefaultBodyLimit::max(ZIP_REQUEST_MAX_BYTES)),
        )
        .route(
            "/api/delete",
            post(files::delete_paths).layer(DefaultBodyLimit::max(DELETE_REQUEST_MAX_BYTES)),
        )
        .route(
            "/api/upload",
            post(upload::upload_files).layer(DefaultBodyLimit::disable()),
        )
        .route_layer(middleware::from_fn(auth::auth_middleware))
        .route_layer(middleware::from_fn(session::require_running));

    let session_routes = Router::new()
        .route("/api/events", get(events::stream_events))
        .route("/api/settings", get(settings::missing_setting_key).put(settings::missing_setting_key))
        .route(
            "/api/settings/{key}",
            get(settings::get_setting).put(settings::put_setting),
        )
        .route_layer(middleware::from_fn(auth::auth_middleware));

    Router::new()
        .merge(share_routes)
        .merge(session_routes)
        .route(
            "/api/auth",
            post(auth::auth_login).layer(DefaultBodyLimit::max(AUTH_REQUEST_MAX_BYTES)),
        )
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| http::request_span(request))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(ctx.session.clone()))
        .layer(Extension(ctx.auth.clone()))
        .layer(Extension(ctx.settings.clone()))
        .layer(Extension(ctx.events.clone()))
        .layer(Extension(ctx.stream))
}
