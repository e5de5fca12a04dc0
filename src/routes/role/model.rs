use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::utils::generate_id;
use crate::validation::{Field, FieldError, Rule, validate};

/// 封闭的权限集合，角色只能引用这里列出的值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    UserCreate,
    UserRead,
    UserUpdate,
    UserDelete,
    RoleCreate,
    RoleRead,
    RoleUpdate,
    RoleDelete,
    AnnouncementCreate,
    AnnouncementRead,
    AnnouncementUpdate,
    AnnouncementDelete,
    AuditRead,
}

pub const PERMISSION_NAMES: &[&str] = &[
    "USER_CREATE",
    "USER_READ",
    "USER_UPDATE",
    "USER_DELETE",
    "ROLE_CREATE",
    "ROLE_READ",
    "ROLE_UPDATE",
    "ROLE_DELETE",
    "ANNOUNCEMENT_CREATE",
    "ANNOUNCEMENT_READ",
    "ANNOUNCEMENT_UPDATE",
    "ANNOUNCEMENT_DELETE",
    "AUDIT_READ",
];

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::UserCreate => "USER_CREATE",
            Permission::UserRead => "USER_READ",
            Permission::UserUpdate => "USER_UPDATE",
            Permission::UserDelete => "USER_DELETE",
            Permission::RoleCreate => "ROLE_CREATE",
            Permission::RoleRead => "ROLE_READ",
            Permission::RoleUpdate => "ROLE_UPDATE",
            Permission::RoleDelete => "ROLE_DELETE",
            Permission::AnnouncementCreate => "ANNOUNCEMENT_CREATE",
            Permission::AnnouncementRead => "ANNOUNCEMENT_READ",
            Permission::AnnouncementUpdate => "ANNOUNCEMENT_UPDATE",
            Permission::AnnouncementDelete => "ANNOUNCEMENT_DELETE",
            Permission::AuditRead => "AUDIT_READ",
        }
    }

    pub fn is_valid_name(name: &str) -> bool {
        PERMISSION_NAMES.contains(&name)
    }
}

const SCHEMA: &[Field] = &[
    Field {
        name: "name",
        label: "Name",
        rules: &[Rule::Required, Rule::MinLen(2), Rule::MaxLen(50)],
    },
    Field {
        name: "description",
        label: "Description",
        rules: &[Rule::Required, Rule::Nullable, Rule::MaxLen(150)],
    },
    Field {
        name: "permissions",
        label: "Permissions",
        rules: &[Rule::Required, Rule::OneOfArray(PERMISSION_NAMES)],
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RoleSummary {
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(FromRow)]
struct RoleRow {
    role_id: Uuid,
    name: String,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleView {
    pub role_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

impl Role {
    pub async fn read_all(pool: &PgPool) -> Result<Vec<RoleSummary>, sqlx::Error> {
        sqlx::query_as::<_, RoleSummary>(
            "SELECT role_id, name, description FROM roles ORDER BY name",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn read(pool: &PgPool, role_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT role_id, name, description FROM roles WHERE role_id = $1",
        )
        .bind(role_id)
        .fetch_optional(pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let permissions = Self::read_permissions(pool, role_id).await?;
        Ok(Some(Role {
            role_id: row.role_id,
            name: row.name,
            description: row.description,
            permissions,
        }))
    }

    async fn read_permissions(pool: &PgPool, role_id: Uuid) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT permission FROM role_permissions WHERE role_id = $1",
        )
        .bind(role_id)
        .fetch_all(pool)
        .await
    }

    /// 按 schema 校验载荷并套用到自身，同时检查名称唯一
    pub async fn validate(
        &mut self,
        pool: &PgPool,
        payload: &Value,
    ) -> Result<Vec<FieldError>, sqlx::Error> {
        let (values, mut errors) = validate(SCHEMA, payload);
        if errors.is_empty() {
            self.apply(&values);
        }
        if !self.is_unique(pool).await? {
            errors.push(FieldError::new("name", "\"Name\" already in use"));
        }
        Ok(errors)
    }

    fn apply(&mut self, values: &serde_json::Map<String, Value>) {
        if let Some(name) = values.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(description) = values.get("description") {
            self.description = description.as_str().map(str::to_string);
        }
        if let Some(permissions) = values.get("permissions").and_then(Value::as_array) {
            self.permissions = permissions
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
    }

    async fn is_unique(&self, pool: &PgPool) -> Result<bool, sqlx::Error> {
        let taken = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM roles WHERE name = $1 AND role_id <> $2",
        )
        .bind(&self.name)
        .bind(self.role_id)
        .fetch_one(pool)
        .await?;
        Ok(taken == 0)
    }

    pub async fn create(&mut self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("INSERT INTO roles (role_id, name, description) VALUES ($1, $2, $3)")
            .bind(self.role_id)
            .bind(&self.name)
            .bind(&self.description)
            .execute(&mut *tx)
            .await?;
        self.set_permissions(&mut tx).await?;
        tx.commit().await?;
        self.reload(pool).await
    }

    pub async fn update(&mut self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE roles SET name = $1, description = $2 WHERE role_id = $3")
            .bind(&self.name)
            .bind(&self.description)
            .bind(self.role_id)
            .execute(&mut *tx)
            .await?;
        self.set_permissions(&mut tx).await?;
        tx.commit().await?;
        self.reload(pool).await
    }

    pub async fn delete(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(self.role_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// 任何未知权限值都会使整组替换被静默跳过（整体校验，不逐项过滤）
    pub fn validate_permissions(&self) -> bool {
        self.permissions
            .iter()
            .all(|name| Permission::is_valid_name(name))
    }

    async fn set_permissions(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
        if !self.validate_permissions() {
            return Ok(());
        }
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(self.role_id)
            .execute(&mut **tx)
            .await?;
        for permission in &self.permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, permission) VALUES ($1, $2)")
                .bind(self.role_id)
                .bind(permission)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn reload(&mut self, pool: &PgPool) -> Result<(), sqlx::Error> {
        if let Some(fresh) = Self::read(pool, self.role_id).await? {
            *self = fresh;
        }
        Ok(())
    }

    pub fn for_client(&self) -> RoleView {
        RoleView {
            role_id: self.role_id,
            name: self.name.clone(),
            description: self.description.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role {
            role_id: generate_id(),
            name: String::new(),
            description: None,
            permissions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn permission_names_round_trip_through_serde() {
        for name in PERMISSION_NAMES {
            let parsed: Permission = serde_json::from_value(json!(name)).unwrap();
            assert_eq!(parsed.as_str(), *name);
        }
        assert!(serde_json::from_value::<Permission>(json!("ROOT")).is_err());
    }

    #[test]
    fn unknown_permission_fails_the_whole_set() {
        let role = Role {
            permissions: vec!["ROLE_READ".into(), "NOT_A_PERMISSION".into()],
            ..Role::default()
        };
        assert!(!role.validate_permissions());

        let role = Role {
            permissions: vec!["ROLE_READ".into(), "ROLE_DELETE".into()],
            ..Role::default()
        };
        assert!(role.validate_permissions());
    }

    #[test]
    fn empty_permission_set_is_valid() {
        assert!(Role::default().validate_permissions());
    }

    #[test]
    fn schema_rejects_bad_payload_shape() {
        let (_, errors) = validate(
            SCHEMA,
            &json!({ "name": "x", "description": null, "permissions": ["ROLE_READ", "BOGUS"] }),
        );
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "permissions"]);
    }
}
