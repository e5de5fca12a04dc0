use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::authorize;
use crate::routes::audit::model::{Auditor, ModelChange};
use crate::routes::role::model::Permission;
use crate::routes::session::model::Session;

use super::model::Announcement;

pub async fn create_announcement(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::AnnouncementCreate))?;
    let mut announcement = Announcement::default();
    let errors = announcement.validate(&payload);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    announcement.create(&state.pool).await?;
    auditor.add(
        "Announcement created",
        "Announcement",
        announcement.announcement_id,
        None,
    );
    Ok((StatusCode::OK, Json(announcement.for_client())).into_response())
}

pub async fn read_announcements(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::AnnouncementRead))?;
    let announcements = Announcement::read_all(&state.pool).await?;
    Ok((StatusCode::OK, Json(announcements)).into_response())
}

pub async fn read_announcement(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(announcement_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::AnnouncementRead))?;
    let Some(announcement) = Announcement::read(&state.pool, announcement_id).await? else {
        return Err(AppError::NotFound("Announcement"));
    };
    Ok((StatusCode::OK, Json(announcement.for_client())).into_response())
}

pub async fn update_announcement(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Path(announcement_id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::AnnouncementUpdate))?;
    let Some(mut announcement) = Announcement::read(&state.pool, announcement_id).await? else {
        return Err(AppError::NotFound("Announcement"));
    };
    let mut changes = ModelChange::new(&announcement);
    let errors = announcement.validate(&payload);
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    announcement.update(&state.pool).await?;
    changes.set_after(&announcement);
    auditor.add(
        "Announcement updated",
        "Announcement",
        announcement.announcement_id,
        Some(&changes),
    );
    Ok((StatusCode::OK, Json(announcement.for_client())).into_response())
}

pub async fn delete_announcement(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Path(announcement_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::AnnouncementDelete))?;
    let Some(announcement) = Announcement::read(&state.pool, announcement_id).await? else {
        return Err(AppError::NotFound("Announcement"));
    };
    announcement.delete(&state.pool).await?;
    auditor.add(
        "Announcement deleted",
        "Announcement",
        announcement.announcement_id,
        None,
    );
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Announcement deleted" })),
    )
        .into_response())
}
