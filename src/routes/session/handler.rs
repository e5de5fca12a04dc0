use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::authorize;
use crate::routes::audit::model::{Auditor, ModelChange};
use crate::routes::announcement::model::Announcement;
use crate::routes::user::model::{LoginOutcome, PASSWORD_MIN_LENGTH, User};

use super::model::Session;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub new_password1: Option<String>,
    pub new_password2: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeThemeRequest {
    #[serde(default)]
    pub theme: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAnnouncementReadRequest {
    pub announcement_id: Uuid,
}

/// 用户名错和密码错返回完全一致的 401，防止账号枚举
fn account_locked() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "message": "Account locked, try back later" })),
    )
        .into_response()
}

fn invalid_credentials() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "message": "Invalid username or password",
            "errors": ["username", "password"],
        })),
    )
        .into_response()
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(auditor): Extension<Auditor>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response, AppError> {
    let Some(mut user) = User::read_by_username(&state.pool, &req.username).await? else {
        return Ok(invalid_credentials());
    };
    // 登录请求的日志行要落在这名用户头上，即使后面失败
    auditor.set_actor(Some(user.user_id), None);

    let now = Utc::now();
    // 锁定先于验密，锁定期内不付散列成本
    if user.is_locked_out(now) {
        return Ok(account_locked());
    }
    let password_ok = user.verify_password(&req.password);
    match user.register_attempt(now, password_ok) {
        LoginOutcome::LockedOut => return Ok(account_locked()),
        LoginOutcome::Failed => {
            user.update(&state.pool).await?;
            return Ok(invalid_credentials());
        }
        LoginOutcome::Succeeded => {}
    }

    if user.password_is_expired {
        let Some(new_password) = req.new_password1.as_deref().filter(|p| !p.is_empty()) else {
            return Ok((
                StatusCode::ACCEPTED,
                Json(json!({ "message": "Password is expired" })),
            )
                .into_response());
        };
        if new_password.chars().count() < PASSWORD_MIN_LENGTH {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "message": format!(
                        "Password must be at least {PASSWORD_MIN_LENGTH} characters"
                    ),
                    "errors": ["newPassword"],
                })),
            )
                .into_response());
        }
        if Some(new_password) != req.new_password2.as_deref() {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "message": "Passwords do not match",
                    "errors": ["newPassword"],
                })),
            )
                .into_response());
        }
        user.set_password(new_password)?;
        user.password_is_expired = false;
        user.update(&state.pool).await?;
        auditor.add(
            format!("User \"{}\" changed password", user.username),
            "User",
            user.user_id,
            None,
        );
    }

    let session = Session::create(&state.pool, user.user_id).await?;
    user.last_token = session.last_token.clone();
    user.token_expires = session.token_expires;
    user.update(&state.pool).await?;

    auditor.set_actor(Some(user.user_id), session.last_token.clone());
    auditor.add(
        format!("User \"{}\" logged in", user.username),
        "User",
        user.user_id,
        None,
    );
    Ok((StatusCode::OK, Json(session.for_client())).into_response())
}

pub async fn read_session(Extension(session): Extension<Session>) -> Response {
    (StatusCode::OK, Json(session.for_client())).into_response()
}

/// 幂等：对已失效的会话注销同样返回空投影
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response, AppError> {
    if let Some(token) = &session.last_token {
        Session::delete(&state.pool, token).await?;
    }
    Ok((StatusCode::OK, Json(Session::default().for_client())).into_response())
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Response, AppError> {
    authorize(&session, None)?;
    let user_id = session.user_id.ok_or(AppError::Unauthorized)?;
    let Some(mut user) = User::read(&state.pool, user_id).await? else {
        return Err(AppError::NotFound("User"));
    };

    let mut error_fields: Vec<&str> = Vec::new();
    if req.current_password.is_none() {
        error_fields.push("currentPassword");
    }
    if req.password.is_none() {
        error_fields.push("password");
    }
    if req.password_confirm.is_none() {
        error_fields.push("passwordConfirm");
    }
    if !error_fields.is_empty() {
        return Ok(password_error("Missing password", error_fields));
    }

    let current_password = req.current_password.as_deref().unwrap_or_default();
    let password = req.password.as_deref().unwrap_or_default();
    let password_confirm = req.password_confirm.as_deref().unwrap_or_default();

    if !user.verify_password(current_password) {
        return Ok(password_error(
            "Current password is incorrect",
            vec!["currentPassword"],
        ));
    }
    if password.chars().count() < PASSWORD_MIN_LENGTH {
        return Ok(password_error(
            &format!("Password must be at least {PASSWORD_MIN_LENGTH} characters"),
            vec!["password"],
        ));
    }
    if password != password_confirm {
        return Ok(password_error(
            "Passwords do not match",
            vec!["password", "passwordConfirm"],
        ));
    }

    user.set_password(password)?;
    user.password_is_expired = false;
    user.update(&state.pool).await?;
    auditor.add(
        format!("User \"{}\" changed password", user.username),
        "User",
        user.user_id,
        None,
    );
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Password changed successfully" })),
    )
        .into_response())
}

fn password_error(message: &str, error_fields: Vec<&str>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "message": message, "errorFields": error_fields })),
    )
        .into_response()
}

pub async fn change_theme(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auditor): Extension<Auditor>,
    Json(req): Json<ChangeThemeRequest>,
) -> Result<Response, AppError> {
    authorize(&session, None)?;
    let user_id = session.user_id.ok_or(AppError::Unauthorized)?;
    if req.theme != "light" && req.theme != "dark" {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Invalid theme" })),
        )
            .into_response());
    }
    let Some(mut user) = User::read(&state.pool, user_id).await? else {
        return Err(AppError::NotFound("User"));
    };

    let mut changes = ModelChange::new(&user);
    user.theme = req.theme;
    user.update(&state.pool).await?;
    changes.set_after(&user);
    auditor.add(
        format!("User \"{}\" updated", user.username),
        "User",
        user.user_id,
        Some(&changes),
    );
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Theme changed" })),
    )
        .into_response())
}

pub async fn mark_announcement_read(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<MarkAnnouncementReadRequest>,
) -> Result<Response, AppError> {
    authorize(&session, None)?;
    let user_id = session.user_id.ok_or(AppError::Unauthorized)?;
    let Some(user) = User::read(&state.pool, user_id).await? else {
        return Err(AppError::NotFound("User"));
    };
    let Some(announcement) = Announcement::read(&state.pool, req.announcement_id).await? else {
        return Err(AppError::NotFound("Announcement"));
    };
    user.mark_announcement_read(&state.pool, announcement.announcement_id)
        .await?;

    // 重新派生会话，客户端直接拿到刷新后的公告列表
    let token = session.last_token.as_deref().unwrap_or_default();
    let session = Session::read(&state.pool, token, false).await?;
    Ok((StatusCode::OK, Json(session.for_client())).into_response())
}
