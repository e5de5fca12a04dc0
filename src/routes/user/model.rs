use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::utils::{generate_id, hash_password, verify_password};
use crate::validation::{Field, FieldError, Rule, validate};

pub const PASSWORD_MIN_LENGTH: usize = 5;
pub const MAX_LOGIN_ATTEMPTS: i32 = 5;
/// 锁定窗口，秒。窗口内连续失败达到阈值即锁定
pub const LOGIN_TIMEOUT_LENGTH: i64 = 900;

const SCHEMA: &[Field] = &[
    Field {
        name: "username",
        label: "Username",
        rules: &[
            Rule::Required,
            Rule::Alphanum,
            Rule::MinLen(2),
            Rule::MaxLen(255),
        ],
    },
    Field {
        name: "email",
        label: "Email",
        rules: &[Rule::Required, Rule::Email],
    },
    Field {
        name: "password",
        label: "Password",
        rules: &[
            Rule::Required,
            Rule::Nullable,
            Rule::AllowEmpty,
            Rule::MinLen(PASSWORD_MIN_LENGTH),
        ],
    },
    Field {
        name: "passwordConfirm",
        label: "Password Confirmation",
        rules: &[
            Rule::Required,
            Rule::Nullable,
            Rule::AllowEmpty,
            Rule::MinLen(PASSWORD_MIN_LENGTH),
        ],
    },
    Field {
        name: "passwordIsExpired",
        label: "Password is expired",
        rules: &[Rule::Required, Rule::Bool],
    },
    Field {
        name: "firstName",
        label: "First Name",
        rules: &[Rule::Required, Rule::MinLen(1), Rule::MaxLen(50)],
    },
    Field {
        name: "lastName",
        label: "Last Name",
        rules: &[Rule::Required, Rule::MinLen(1), Rule::MaxLen(50)],
    },
    Field {
        name: "theme",
        label: "Theme",
        rules: &[Rule::Required, Rule::MinLen(1), Rule::MaxLen(255)],
    },
    Field {
        name: "homePage",
        label: "Home Page",
        rules: &[Rule::Required, Rule::MinLen(1), Rule::MaxLen(255)],
    },
    Field {
        name: "isInactive",
        label: "Inactive",
        rules: &[Rule::Required, Rule::Bool],
    },
    Field {
        name: "roles",
        label: "Roles",
        rules: &[Rule::Required, Rule::UuidArray],
    },
];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    /// bcrypt 散列；进入审计差异时会被脱敏
    pub password: Option<String>,
    pub password_is_expired: bool,
    pub first_name: String,
    pub last_name: String,
    pub theme: String,
    pub home_page: String,
    pub last_token: Option<String>,
    pub token_expires: Option<DateTime<Utc>>,
    pub login_attempt_count: i32,
    pub last_login_attempt_at: Option<DateTime<Utc>>,
    pub lifetime_login_count: i32,
    pub is_inactive: bool,
    #[sqlx(skip)]
    pub roles: Vec<Uuid>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub has_active_session: bool,
    pub is_inactive: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_is_expired: bool,
    pub first_name: String,
    pub last_name: String,
    pub theme: String,
    pub home_page: String,
    pub has_active_session: bool,
    pub token_expires: Option<DateTime<Utc>>,
    pub last_login_attempt_at: Option<DateTime<Utc>>,
    pub lifetime_login_count: i32,
    pub is_inactive: bool,
    pub roles: Vec<Uuid>,
}

impl Default for User {
    fn default() -> Self {
        User {
            user_id: generate_id(),
            username: String::new(),
            email: String::new(),
            password: None,
            password_is_expired: false,
            first_name: String::new(),
            last_name: String::new(),
            theme: "light".into(),
            home_page: "dashboard".into(),
            last_token: None,
            token_expires: None,
            login_attempt_count: 0,
            last_login_attempt_at: None,
            lifetime_login_count: 0,
            is_inactive: false,
            roles: Vec::new(),
        }
    }
}

impl User {
    pub async fn read_all(pool: &PgPool) -> Result<Vec<UserSummary>, sqlx::Error> {
        sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT
                user_id,
                username,
                email,
                first_name,
                last_name,
                (token_expires IS NOT NULL AND token_expires > NOW()) AS has_active_session,
                is_inactive
            FROM users
            ORDER BY first_name
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn read(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Self::with_roles(pool, user).await
    }

    pub async fn read_by_username(
        pool: &PgPool,
        username: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(pool)
            .await?;
        Self::with_roles(pool, user).await
    }

    async fn with_roles(
        pool: &PgPool,
        user: Option<User>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let Some(mut user) = user else {
            return Ok(None);
        };
        user.roles =
            sqlx::query_scalar::<_, Uuid>("SELECT role_id FROM user_roles WHERE user_id = $1")
                .bind(user.user_id)
                .fetch_all(pool)
                .await?;
        Ok(Some(user))
    }

    pub async fn read_role_names(&self, pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM user_roles ur
            LEFT JOIN roles r ON ur.role_id = r.role_id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(self.user_id)
        .fetch_all(pool)
        .await
    }

    /// 校验载荷并套用到自身；`is_new` 时密码必填。
    /// 密码相关检查有先后依赖，保持顺序短路；其余错误一次性收集。
    pub async fn validate(
        &mut self,
        pool: &PgPool,
        payload: &Value,
        is_new: bool,
    ) -> Result<Vec<FieldError>, AppValidationError> {
        let (values, mut errors) = validate(SCHEMA, payload);
        if errors.is_empty() {
            let password = values.get("password").and_then(Value::as_str).unwrap_or("");
            let confirm = values
                .get("passwordConfirm")
                .and_then(Value::as_str)
                .unwrap_or("");
            if is_new && password.is_empty() {
                errors.push(FieldError::new("password", "Missing password"));
            } else if password != confirm {
                errors.push(FieldError::new("passwordConfirm", "Passwords do not match"));
            } else if !password.is_empty() {
                self.set_password(password)?;
            }
            self.apply(&values);
        }
        if !self.is_unique(pool).await? {
            errors.push(FieldError::new("username", "\"Username\" already in use"));
        }
        Ok(errors)
    }

    fn apply(&mut self, values: &serde_json::Map<String, Value>) {
        let get_str = |key: &str| values.get(key).and_then(Value::as_str).map(str::to_string);
        if let Some(v) = get_str("username") {
            self.username = v;
        }
        if let Some(v) = get_str("email") {
            self.email = v;
        }
        if let Some(v) = values.get("passwordIsExpired").and_then(Value::as_bool) {
            self.password_is_expired = v;
        }
        if let Some(v) = get_str("firstName") {
            self.first_name = v;
        }
        if let Some(v) = get_str("lastName") {
            self.last_name = v;
        }
        if let Some(v) = get_str("theme") {
            self.theme = v;
        }
        if let Some(v) = get_str("homePage") {
            self.home_page = v;
        }
        if let Some(v) = values.get("isInactive").and_then(Value::as_bool) {
            self.is_inactive = v;
        }
        if let Some(roles) = values.get("roles").and_then(Value::as_array) {
            self.roles = roles
                .iter()
                .filter_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
                .collect();
        }
    }

    async fn is_unique(&self, pool: &PgPool) -> Result<bool, sqlx::Error> {
        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE username = $1 AND user_id <> $2",
        )
        .bind(&self.username)
        .bind(self.user_id)
        .fetch_one(pool)
        .await?;
        Ok(taken == 0)
    }

    pub async fn create(&mut self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, username, email, password, password_is_expired,
                first_name, last_name, theme, home_page, last_token,
                token_expires, login_attempt_count, last_login_attempt_at,
                lifetime_login_count, is_inactive
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(self.user_id)
        .bind(&self.username)
        .bind(&self.email)
        .bind(&self.password)
        .bind(self.password_is_expired)
        .bind(&self.first_name)
        .bind(&self.last_name)
        .bind(&self.theme)
        .bind(&self.home_page)
        .bind(&self.last_token)
        .bind(self.token_expires)
        .bind(self.login_attempt_count)
        .bind(self.last_login_attempt_at)
        .bind(self.lifetime_login_count)
        .bind(self.is_inactive)
        .execute(&mut *tx)
        .await?;
        self.set_roles(&mut tx).await?;
        tx.commit().await?;
        self.reload(pool).await
    }

    pub async fn update(&mut self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE users SET
                username = $1, email = $2, password = $3, password_is_expired = $4,
                first_name = $5, last_name = $6, theme = $7, home_page = $8,
                last_token = $9, token_expires = $10, login_attempt_count = $11,
                last_login_attempt_at = $12, lifetime_login_count = $13, is_inactive = $14
            WHERE user_id = $15
            "#,
        )
        .bind(&self.username)
        .bind(&self.email)
        .bind(&self.password)
        .bind(self.password_is_expired)
        .bind(&self.first_name)
        .bind(&self.last_name)
        .bind(&self.theme)
        .bind(&self.home_page)
        .bind(&self.last_token)
        .bind(self.token_expires)
        .bind(self.login_attempt_count)
        .bind(self.last_login_attempt_at)
        .bind(self.lifetime_login_count)
        .bind(self.is_inactive)
        .bind(self.user_id)
        .execute(&mut *tx)
        .await?;
        self.set_roles(&mut tx).await?;
        tx.commit().await?;
        self.reload(pool).await
    }

    pub async fn delete(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM users WHERE user_id = $1")
            .bind(self.user_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn validate_roles(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<bool, sqlx::Error> {
        let known = sqlx::query_scalar::<_, Uuid>("SELECT role_id FROM roles")
            .fetch_all(&mut **tx)
            .await?;
        Ok(self.roles.iter().all(|id| known.contains(id)))
    }

    /// 整组替换角色关联；任何一个 id 不存在则整组静默跳过
    async fn set_roles(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
        if !self.validate_roles(tx).await? {
            return Ok(());
        }
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(self.user_id)
            .execute(&mut **tx)
            .await?;
        for role_id in &self.roles {
            sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
                .bind(self.user_id)
                .bind(role_id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn reload(&mut self, pool: &PgPool) -> Result<(), sqlx::Error> {
        if let Some(fresh) = Self::read(pool, self.user_id).await? {
            *self = fresh;
        }
        Ok(())
    }

    pub async fn mark_announcement_read(
        &self,
        pool: &PgPool,
        announcement_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO announcements_read (announcement_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(announcement_id)
        .bind(self.user_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub fn set_password(&mut self, password: &str) -> Result<(), bcrypt::BcryptError> {
        self.password = Some(hash_password(password)?);
        Ok(())
    }

    pub fn verify_password(&self, password: &str) -> bool {
        match &self.password {
            Some(hash) => verify_password(password, hash).unwrap_or(false),
            None => false,
        }
    }

    /// 失败次数达到阈值且距最后一次尝试仍在窗口内
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        let Some(last_attempt) = self.last_login_attempt_at else {
            return false;
        };
        self.login_attempt_count >= MAX_LOGIN_ATTEMPTS
            && (now - last_attempt).num_seconds() < LOGIN_TIMEOUT_LENGTH
    }

    /// 一次登录尝试的计数规则，只改内存状态，由调用方落库。
    /// 窗口已过时计数器先归零再计本次结果，所以过窗后的首次
    /// 失败记 1 次，首次成功直接放行。
    pub fn register_attempt(&mut self, now: DateTime<Utc>, password_ok: bool) -> LoginOutcome {
        if self.is_locked_out(now) {
            return LoginOutcome::LockedOut;
        }
        if self.login_attempt_count >= MAX_LOGIN_ATTEMPTS {
            self.login_attempt_count = 0;
        }
        self.last_login_attempt_at = Some(now);
        if !password_ok {
            self.login_attempt_count += 1;
            return LoginOutcome::Failed;
        }
        self.login_attempt_count = 0;
        self.lifetime_login_count += 1;
        LoginOutcome::Succeeded
    }

    pub fn has_active_session(&self, now: DateTime<Utc>) -> bool {
        self.token_expires.is_some_and(|expires| expires > now)
    }

    pub fn for_client(&self) -> UserView {
        UserView {
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            password_is_expired: self.password_is_expired,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            theme: self.theme.clone(),
            home_page: self.home_page.clone(),
            has_active_session: self.has_active_session(Utc::now()),
            token_expires: self.token_expires,
            last_login_attempt_at: self.last_login_attempt_at,
            lifetime_login_count: self.lifetime_login_count,
            is_inactive: self.is_inactive,
            roles: self.roles.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    LockedOut,
    Failed,
    Succeeded,
}

/// 校验过程里既可能出基础设施错，也可能出散列错
#[derive(Debug)]
pub enum AppValidationError {
    Db(sqlx::Error),
    Hash(bcrypt::BcryptError),
}

impl From<sqlx::Error> for AppValidationError {
    fn from(err: sqlx::Error) -> Self {
        AppValidationError::Db(err)
    }
}

impl From<bcrypt::BcryptError> for AppValidationError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppValidationError::Hash(err)
    }
}

impl From<AppValidationError> for crate::error::AppError {
    fn from(err: AppValidationError) -> Self {
        match err {
            AppValidationError::Db(e) => e.into(),
            AppValidationError::Hash(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn user_after_attempts(count: i32, seconds_ago: i64, now: DateTime<Utc>) -> User {
        User {
            login_attempt_count: count,
            last_login_attempt_at: Some(now - Duration::seconds(seconds_ago)),
            ..User::default()
        }
    }

    #[test]
    fn lockout_requires_threshold_and_window() {
        let now = Utc::now();
        assert!(user_after_attempts(MAX_LOGIN_ATTEMPTS, 10, now).is_locked_out(now));
        assert!(!user_after_attempts(MAX_LOGIN_ATTEMPTS - 1, 10, now).is_locked_out(now));
    }

    #[test]
    fn lockout_expires_with_the_window() {
        let now = Utc::now();
        let user = user_after_attempts(MAX_LOGIN_ATTEMPTS, LOGIN_TIMEOUT_LENGTH + 1, now);
        assert!(!user.is_locked_out(now));
    }

    #[test]
    fn correct_password_succeeds_once_the_window_has_elapsed() {
        let now = Utc::now();
        let mut user = user_after_attempts(MAX_LOGIN_ATTEMPTS, LOGIN_TIMEOUT_LENGTH + 1, now);
        assert_eq!(user.register_attempt(now, true), LoginOutcome::Succeeded);
        assert_eq!(user.login_attempt_count, 0);
        assert_eq!(user.lifetime_login_count, 1);
    }

    #[test]
    fn failed_attempt_after_the_window_counts_as_the_first() {
        let now = Utc::now();
        let mut user = user_after_attempts(MAX_LOGIN_ATTEMPTS, LOGIN_TIMEOUT_LENGTH + 1, now);
        assert_eq!(user.register_attempt(now, false), LoginOutcome::Failed);
        assert_eq!(user.login_attempt_count, 1);
        assert_eq!(user.last_login_attempt_at, Some(now));
    }

    #[test]
    fn attempts_inside_the_window_are_rejected_without_counting() {
        let now = Utc::now();
        let mut user = user_after_attempts(MAX_LOGIN_ATTEMPTS, 10, now);
        assert_eq!(user.register_attempt(now, true), LoginOutcome::LockedOut);
        assert_eq!(user.login_attempt_count, MAX_LOGIN_ATTEMPTS);
    }

    #[test]
    fn failures_accumulate_toward_the_threshold() {
        let now = Utc::now();
        let mut user = User::default();
        for expected in 1..=MAX_LOGIN_ATTEMPTS {
            assert_eq!(user.register_attempt(now, false), LoginOutcome::Failed);
            assert_eq!(user.login_attempt_count, expected);
        }
        assert!(user.is_locked_out(now));
    }

    #[test]
    fn never_attempted_is_never_locked() {
        let user = User::default();
        assert!(!user.is_locked_out(Utc::now()));
    }

    #[test]
    fn verify_password_round_trip() {
        let mut user = User::default();
        user.set_password("hunter2").unwrap();
        assert!(user.verify_password("hunter2"));
        assert!(!user.verify_password("hunter3"));
    }

    #[test]
    fn verify_password_without_hash_is_false() {
        assert!(!User::default().verify_password("anything"));
    }

    #[test]
    fn active_session_needs_future_expiration() {
        let now = Utc::now();
        let mut user = User::default();
        assert!(!user.has_active_session(now));
        user.token_expires = Some(now + Duration::seconds(60));
        assert!(user.has_active_session(now));
        user.token_expires = Some(now - Duration::seconds(60));
        assert!(!user.has_active_session(now));
    }
}
