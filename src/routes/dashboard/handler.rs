use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::authorize;
use crate::routes::session::model::Session;

pub async fn total_request_count(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    authorize(&session, None)?;
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM requests")
        .fetch_one(&state.pool)
        .await?;
    Ok((StatusCode::OK, Json(json!({ "count": count }))).into_response())
}

pub async fn total_request_duration(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    authorize(&session, None)?;
    let count = sqlx::query_scalar::<_, Option<i64>>("SELECT SUM(duration_ms) FROM requests")
        .fetch_one(&state.pool)
        .await?
        .unwrap_or(0);
    Ok((StatusCode::OK, Json(json!({ "count": count }))).into_response())
}

pub async fn total_session_count(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    authorize(&session, None)?;
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT session_token) FROM requests")
            .fetch_one(&state.pool)
            .await?;
    Ok((StatusCode::OK, Json(json!({ "count": count }))).into_response())
}
