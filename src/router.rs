use axum::{
    Router,
    http::header::HeaderName,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{
    AppState,
    error::handle_404,
    middleware::{log_request, set_request_id, set_session},
    routes,
};

fn session_routes(state: AppState) -> Router {
    Router::new()
        .route("/session", post(routes::session::create_session))
        .route("/session", get(routes::session::read_session))
        .route("/session", delete(routes::session::delete_session))
        .route(
            "/session/change-password",
            post(routes::session::change_password),
        )
        .route("/session/change-theme", post(routes::session::change_theme))
        .route(
            "/session/mark-announcement-read",
            post(routes::session::mark_announcement_read),
        )
        .with_state(state)
}

fn user_routes(state: AppState) -> Router {
    Router::new()
        .route("/user", post(routes::user::create_user))
        .route("/user", get(routes::user::read_users))
        .route("/user/{user_id}", get(routes::user::read_user))
        .route("/user/{user_id}", patch(routes::user::update_user))
        .route("/user/{user_id}", delete(routes::user::delete_user))
        .with_state(state)
}

fn role_routes(state: AppState) -> Router {
    Router::new()
        .route("/role", post(routes::role::create_role))
        .route("/role", get(routes::role::read_roles))
        .route("/role/{role_id}", get(routes::role::read_role))
        .route("/role/{role_id}", patch(routes::role::update_role))
        .route("/role/{role_id}", delete(routes::role::delete_role))
        .with_state(state)
}

fn announcement_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/announcement",
            post(routes::announcement::create_announcement),
        )
        .route(
            "/announcement",
            get(routes::announcement::read_announcements),
        )
        .route(
            "/announcement/{announcement_id}",
            get(routes::announcement::read_announcement),
        )
        .route(
            "/announcement/{announcement_id}",
            patch(routes::announcement::update_announcement),
        )
        .route(
            "/announcement/{announcement_id}",
            delete(routes::announcement::delete_announcement),
        )
        .with_state(state)
}

fn audit_routes(state: AppState) -> Router {
    Router::new()
        .route("/audit", get(routes::audit::read_audits))
        .with_state(state)
}

fn dashboard_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/dashboard/total-request-count",
            get(routes::dashboard::total_request_count),
        )
        .route(
            "/dashboard/total-request-duration",
            get(routes::dashboard::total_request_duration),
        )
        .route(
            "/dashboard/total-session-count",
            get(routes::dashboard::total_session_count),
        )
        .with_state(state)
}

/// 完整的应用路由：域路由 + 请求中间件链 + 兜底 404
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::permissive().expose_headers([
        HeaderName::from_static("x-request-id"),
        HeaderName::from_static("x-token-expires"),
    ]);

    Router::new()
        .merge(session_routes(state.clone()))
        .merge(user_routes(state.clone()))
        .merge(role_routes(state.clone()))
        .merge(announcement_routes(state.clone()))
        .merge(audit_routes(state.clone()))
        .merge(dashboard_routes(state.clone()))
        .route("/ping", get(routes::ping::ping))
        .fallback(handle_404)
        // 自外向内：CORS → 请求 id/台账 → 会话解析 → 请求日志
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(from_fn(set_request_id))
                .layer(from_fn_with_state(state.clone(), set_session))
                .layer(from_fn_with_state(state, log_request)),
        )
}
