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
use crate::routes::session::model::Session;

use super::model::{Permission, Role};

pub async fn create_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::RoleCreate))?;
    let mut role = Role::default();
    let errors = role.validate(&state.pool, &payload).await?;
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    role.create(&state.pool).await?;
    auditor.add(
        format!("Role \"{}\" created", role.name),
        "Role",
        role.role_id,
        None,
    );
    Ok((StatusCode::OK, Json(role.for_client())).into_response())
}

pub async fn read_roles(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::RoleRead))?;
    let roles = Role::read_all(&state.pool).await?;
    Ok((StatusCode::OK, Json(roles)).into_response())
}

pub async fn read_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(role_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::RoleRead))?;
    let Some(role) = Role::read(&state.pool, role_id).await? else {
        return Err(AppError::NotFound("Role"));
    };
    Ok((StatusCode::OK, Json(role.for_client())).into_response())
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Path(role_id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::RoleUpdate))?;
    let Some(mut role) = Role::read(&state.pool, role_id).await? else {
        return Err(AppError::NotFound("Role"));
    };
    let mut changes = ModelChange::new(&role);
    let errors = role.validate(&state.pool, &payload).await?;
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    role.update(&state.pool).await?;
    changes.set_after(&role);
    auditor.add(
        format!("Role \"{}\" updated", role.name),
        "Role",
        role.role_id,
        Some(&changes),
    );
    Ok((StatusCode::OK, Json(role.for_client())).into_response())
}

pub async fn delete_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Path(role_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::RoleDelete))?;
    let Some(role) = Role::read(&state.pool, role_id).await? else {
        return Err(AppError::NotFound("Role"));
    };
    role.delete(&state.pool).await?;
    auditor.add(
        format!("Role \"{}\" deleted", role.name),
        "Role",
        role.role_id,
        None,
    );
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Role deleted" })),
    )
        .into_response())
}
