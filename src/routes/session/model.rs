use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::routes::role::model::Permission;
use crate::utils::generate_id;

/// 会话有效期，秒。每次带令牌的读取都会滑动续期
pub const SESSION_TIMEOUT_LENGTH: i64 = 900;

pub fn generate_expiration(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(SESSION_TIMEOUT_LENGTH)
}

#[derive(Debug, Serialize, Clone, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RoleOption {
    pub value: Uuid,
    pub title: String,
}

#[derive(Debug, Serialize, Clone, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnnouncement {
    pub announcement_id: Uuid,
    pub announce_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

/// 请求期间由用户行派生出的只读会话投影。
/// 有效当且仅当令牌命中一个未停用且未过期的用户行。
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub last_token: Option<String>,
    pub token_expires: Option<DateTime<Utc>>,
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_is_expired: bool,
    pub theme: Option<String>,
    pub home_page: Option<String>,
    pub permissions: Vec<String>,
    pub available_roles: Vec<RoleOption>,
    pub announcements: Vec<SessionAnnouncement>,
    pub is_valid: bool,
}

#[derive(FromRow)]
struct SessionRow {
    last_token: Option<String>,
    token_expires: Option<DateTime<Utc>>,
    user_id: Uuid,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    password_is_expired: bool,
    theme: String,
    home_page: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub last_token: Option<String>,
    pub token_expires: Option<DateTime<Utc>>,
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_is_expired: bool,
    pub theme: Option<String>,
    pub home_page: Option<String>,
    pub permissions: Vec<String>,
    pub available_roles: Vec<RoleOption>,
    pub announcements: Vec<SessionAnnouncement>,
}

impl Session {
    /// 按令牌解析会话；`touch` 为真时滑动续期。
    /// 未命中返回无效会话，视为匿名而非错误。
    pub async fn read(pool: &PgPool, token: &str, touch: bool) -> Result<Self, sqlx::Error> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT
                last_token, token_expires, user_id, username, email,
                first_name, last_name, password_is_expired, theme, home_page
            FROM users
            WHERE is_inactive = FALSE
              AND last_token = $1
              AND token_expires > NOW()
            "#,
        )
        .bind(token)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(Session::default());
        };

        let mut session = Session {
            last_token: row.last_token,
            token_expires: row.token_expires,
            user_id: Some(row.user_id),
            username: Some(row.username),
            email: Some(row.email),
            first_name: Some(row.first_name),
            last_name: Some(row.last_name),
            password_is_expired: row.password_is_expired,
            theme: Some(row.theme),
            home_page: Some(row.home_page),
            is_valid: true,
            ..Session::default()
        };
        if touch {
            session.touch(pool).await?;
        }
        session.permissions = Self::read_permissions(pool, row.user_id).await?;
        session.available_roles = Self::read_available_roles(pool).await?;
        session.announcements = Self::read_announcements(pool, row.user_id).await?;
        Ok(session)
    }

    /// 登录成功后签发新令牌，覆盖旧令牌（单活跃会话）
    pub async fn create(pool: &PgPool, user_id: Uuid) -> Result<Self, sqlx::Error> {
        let token = generate_id().to_string();
        let expires = generate_expiration(Utc::now());
        sqlx::query("UPDATE users SET last_token = $1, token_expires = $2 WHERE user_id = $3")
            .bind(&token)
            .bind(expires)
            .bind(user_id)
            .execute(pool)
            .await?;
        Self::read(pool, &token, false).await
    }

    async fn touch(&mut self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let expires = generate_expiration(Utc::now());
        sqlx::query("UPDATE users SET last_token = $1, token_expires = $2 WHERE user_id = $3")
            .bind(&self.last_token)
            .bind(expires)
            .bind(self.user_id)
            .execute(pool)
            .await?;
        self.token_expires = Some(expires);
        Ok(())
    }

    /// 注销：按令牌清空，不论会话是否仍有效（幂等）
    pub async fn delete(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET last_token = NULL, token_expires = NULL WHERE last_token = $1",
        )
        .bind(token)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// 所有已分配角色的权限并集，重复值折叠
    async fn read_permissions(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT rp.permission
            FROM role_permissions rp
            JOIN user_roles ur ON rp.role_id = ur.role_id
            WHERE ur.user_id = $1
            GROUP BY rp.permission
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    async fn read_available_roles(pool: &PgPool) -> Result<Vec<RoleOption>, sqlx::Error> {
        sqlx::query_as::<_, RoleOption>("SELECT role_id AS value, name AS title FROM roles")
            .fetch_all(pool)
            .await
    }

    /// 当前生效且本人未读过的公告
    async fn read_announcements(
        pool: &PgPool,
        user_id: Uuid,
    ) -> Result<Vec<SessionAnnouncement>, sqlx::Error> {
        sqlx::query_as::<_, SessionAnnouncement>(
            r#"
            SELECT announcement_id, announce_at, expires_at, title, body
            FROM announcements
            WHERE announce_at <= NOW()
              AND expires_at > NOW()
              AND announcement_id NOT IN (
                SELECT announcement_id FROM announcements_read WHERE user_id = $1
              )
            ORDER BY announce_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.iter().any(|p| p == permission.as_str())
    }

    pub fn for_client(&self) -> SessionView {
        SessionView {
            last_token: self.last_token.clone(),
            token_expires: self.token_expires,
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            password_is_expired: self.password_is_expired,
            theme: self.theme.clone(),
            home_page: self.home_page.clone(),
            permissions: self.permissions.clone(),
            available_roles: self.available_roles.clone(),
            announcements: self.announcements.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_check_matches_by_name() {
        let session = Session {
            permissions: vec!["ROLE_READ".into(), "AUDIT_READ".into()],
            is_valid: true,
            ..Session::default()
        };
        assert!(session.has_permission(Permission::RoleRead));
        assert!(session.has_permission(Permission::AuditRead));
        assert!(!session.has_permission(Permission::RoleDelete));
    }

    #[test]
    fn anonymous_session_is_invalid_and_empty() {
        let session = Session::default();
        assert!(!session.is_valid);
        assert!(!session.has_permission(Permission::UserRead));
        let view = serde_json::to_value(session.for_client()).unwrap();
        assert_eq!(view["userId"], serde_json::Value::Null);
        assert_eq!(view["permissions"], serde_json::json!([]));
    }

    #[test]
    fn expiration_slides_by_the_timeout_length() {
        let now = Utc::now();
        let expires = generate_expiration(now);
        assert_eq!((expires - now).num_seconds(), SESSION_TIMEOUT_LENGTH);
    }

    #[test]
    fn projection_uses_wire_names() {
        let session = Session {
            username: Some("admin".into()),
            ..Session::default()
        };
        let view = serde_json::to_value(session.for_client()).unwrap();
        assert!(view.get("passwordIsExpired").is_some());
        assert!(view.get("availableRoles").is_some());
        assert!(view.get("password_is_expired").is_none());
    }
}
