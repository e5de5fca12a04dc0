use axum::{
    Json,
    extract::{Extension, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::authorize;
use crate::routes::role::model::Permission;
use crate::routes::session::model::Session;

use super::model::Audit;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub model_type: Option<String>,
    pub model_id: Option<String>,
    pub offset: Option<String>,
}

pub async fn read_audits(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<AuditQuery>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::AuditRead))?;
    let (Some(model_type), Some(model_id), Some(offset)) =
        (query.model_type, query.model_id, query.offset)
    else {
        return Ok(invalid_request());
    };
    let (Ok(model_id), Ok(offset)) = (Uuid::parse_str(&model_id), offset.parse::<i64>()) else {
        return Ok(invalid_request());
    };

    let audits = Audit::read_page(&state.pool, &model_type, model_id, offset).await?;
    Ok((StatusCode::OK, Json(audits)).into_response())
}

fn invalid_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "message": "Invalid request" })),
    )
        .into_response()
}
