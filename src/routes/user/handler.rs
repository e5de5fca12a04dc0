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

use super::model::User;

pub async fn create_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::UserCreate))?;
    let mut user = User::default();
    let errors = user.validate(&state.pool, &payload, true).await?;
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    user.create(&state.pool).await?;
    auditor.add(
        format!("User \"{}\" created", user.username),
        "User",
        user.user_id,
        None,
    );
    Ok((StatusCode::OK, Json(user.for_client())).into_response())
}

pub async fn read_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::UserRead))?;
    let users = User::read_all(&state.pool).await?;
    Ok((StatusCode::OK, Json(users)).into_response())
}

pub async fn read_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::UserRead))?;
    let Some(user) = User::read(&state.pool, user_id).await? else {
        return Err(AppError::NotFound("User"));
    };
    Ok((StatusCode::OK, Json(user.for_client())).into_response())
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::UserUpdate))?;
    let Some(mut user) = User::read(&state.pool, user_id).await? else {
        return Err(AppError::NotFound("User"));
    };
    // 不允许把自己的账号停用
    let wants_inactive = payload.get("isInactive").and_then(Value::as_bool) == Some(true);
    if session.user_id == Some(user.user_id) && wants_inactive {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Cannot make your own account inactive" })),
        )
            .into_response());
    }

    let mut changes = ModelChange::new(&user);
    changes.before.insert(
        "role_names".into(),
        json!(user.read_role_names(&state.pool).await?),
    );
    let errors = user.validate(&state.pool, &payload, false).await?;
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    user.update(&state.pool).await?;
    changes.set_after(&user);
    changes.after.insert(
        "role_names".into(),
        json!(user.read_role_names(&state.pool).await?),
    );
    auditor.add(
        format!("User \"{}\" updated", user.username),
        "User",
        user.user_id,
        Some(&changes),
    );
    Ok((StatusCode::OK, Json(user.for_client())).into_response())
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize(&session, Some(Permission::UserDelete))?;
    let Some(user) = User::read(&state.pool, user_id).await? else {
        return Err(AppError::NotFound("User"));
    };
    if session.user_id == Some(user.user_id) {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Cannot delete your own account" })),
        )
            .into_response());
    }
    user.delete(&state.pool).await?;
    auditor.add(
        format!("User \"{}\" deleted", user.username),
        "User",
        user.user_id,
        None,
    );
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "User deleted" })),
    )
        .into_response())
}
