use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// 这些字段属于会话内部状态，永远不进入审计差异
pub const MODEL_CHANGE_BLACKLIST: &[&str] = &["last_token", "token_expires"];
/// 这些字段记录变更事实但不记录值
pub const MODEL_CHANGE_CENSORED: &[&str] = &["password"];
pub const CENSOR_STRING: &str = "*****";
/// 读取侧过滤：角色 id 列表对审计读者无意义（role_names 仍保留）
pub const AUDIT_FIELD_BLACKLIST: &[&str] = &["roles"];

pub const AUDIT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub field: String,
    pub before: Value,
    pub after: Value,
}

/// 记录一条业务数据变更前后的快照，产出最小字段差异。
///
/// 纯值比较，不触碰存储；畸形快照只会得到空差异，不会报错。
#[derive(Debug, Default, Clone)]
pub struct ModelChange {
    pub before: Map<String, Value>,
    pub after: Map<String, Value>,
}

fn snapshot<T: Serialize>(record: &T) -> Map<String, Value> {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

impl ModelChange {
    pub fn new<T: Serialize>(before: &T) -> Self {
        ModelChange {
            before: snapshot(before),
            after: Map::new(),
        }
    }

    pub fn set_after<T: Serialize>(&mut self, after: &T) {
        self.after = snapshot(after);
    }

    /// 序列化后的差异数组；无变化时返回 None，调用方据此跳过记录
    pub fn changes(&self) -> Option<String> {
        let rows: Vec<ChangeRow> = self
            .before
            .keys()
            .filter(|field| !MODEL_CHANGE_BLACKLIST.contains(&field.as_str()))
            .filter(|field| self.before.get(*field) != self.after.get(*field))
            .map(|field| {
                let censored = MODEL_CHANGE_CENSORED.contains(&field.as_str());
                let pick = |map: &Map<String, Value>| {
                    if censored {
                        Value::String(CENSOR_STRING.into())
                    } else {
                        map.get(field).cloned().unwrap_or(Value::Null)
                    }
                };
                ChangeRow {
                    field: field.clone(),
                    before: pick(&self.before),
                    after: pick(&self.after),
                }
            })
            .collect();
        if rows.is_empty() {
            None
        } else {
            serde_json::to_string(&rows).ok()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub message: String,
    pub model_type: String,
    pub model_id: Option<Uuid>,
    pub changes: Option<String>,
}

#[derive(Debug, Default)]
struct AuditorInner {
    audits: Vec<AuditEntry>,
    user_id: Option<Uuid>,
    token: Option<String>,
}

/// 请求级审计台账：处理期间在内存累积，响应完成后统一落库。
///
/// 同时承载本次请求的行为人身份，请求日志行据此反查用户
/// （登录请求在会话建立后补记）。
#[derive(Debug, Clone, Default)]
pub struct Auditor(Arc<Mutex<AuditorInner>>);

impl Auditor {
    pub fn new() -> Self {
        Self::default()
    }

    // 台账处在请求路径上，锁中毒也继续用现有数据，不放大成 panic
    fn inner(&self) -> std::sync::MutexGuard<'_, AuditorInner> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(
        &self,
        message: impl Into<String>,
        model_type: &str,
        model_id: Uuid,
        changes: Option<&ModelChange>,
    ) {
        let entry = AuditEntry {
            message: message.into(),
            model_type: model_type.to_string(),
            model_id: Some(model_id),
            changes: changes.and_then(ModelChange::changes),
        };
        self.inner().audits.push(entry);
    }

    pub fn set_actor(&self, user_id: Option<Uuid>, token: Option<String>) {
        let mut inner = self.inner();
        inner.user_id = user_id;
        inner.token = token;
    }

    pub fn actor(&self) -> (Option<Uuid>, Option<String>) {
        let inner = self.inner();
        (inner.user_id, inner.token.clone())
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner().audits.clone()
    }
}

#[derive(Debug, Serialize, FromRow)]
struct AuditPageRow {
    timestamp: DateTime<Utc>,
    message: String,
    changes: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditView {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub changes: Option<Vec<ChangeRow>>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// 读取侧的字段过滤，产出新集合而非原地删除
pub fn filter_changes(raw: &str) -> Option<Vec<ChangeRow>> {
    let rows: Vec<ChangeRow> = serde_json::from_str(raw).ok()?;
    Some(
        rows.into_iter()
            .filter(|row| !AUDIT_FIELD_BLACKLIST.contains(&row.field.as_str()))
            .collect(),
    )
}

pub struct Audit;

impl Audit {
    /// 按时间倒序分页读取某条记录的审计轨迹，附带行为人姓名
    pub async fn read_page(
        pool: &PgPool,
        model_type: &str,
        model_id: Uuid,
        offset: i64,
    ) -> Result<Vec<AuditView>, sqlx::Error> {
        let rows = sqlx::query_as::<_, AuditPageRow>(
            r#"
            SELECT
                a.timestamp,
                a.message,
                a.changes,
                u.first_name,
                u.last_name
            FROM audits a
            LEFT JOIN requests r ON a.request_id = r.request_id
            LEFT JOIN users u ON r.user_id = u.user_id
            WHERE a.model_type = $1 AND a.model_id = $2
            ORDER BY a.timestamp DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(model_type)
        .bind(model_id)
        .bind(AUDIT_PAGE_SIZE)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AuditView {
                timestamp: row.timestamp,
                message: row.message,
                changes: row.changes.as_deref().and_then(filter_changes),
                first_name: row.first_name,
                last_name: row.last_name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Record {
        name: String,
        permissions: Vec<String>,
        password: String,
        last_token: Option<String>,
    }

    fn record(name: &str, permissions: &[&str], password: &str, token: Option<&str>) -> Record {
        Record {
            name: name.into(),
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
            password: password.into(),
            last_token: token.map(str::to_string),
        }
    }

    #[test]
    fn reports_exactly_the_changed_fields() {
        let mut change = ModelChange::new(&record("Editors", &["ROLE_READ"], "h1", None));
        change.set_after(&record("Editors", &["ROLE_READ", "ROLE_DELETE"], "h1", None));
        let rows: Vec<ChangeRow> = serde_json::from_str(&change.changes().unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "permissions");
        assert_eq!(rows[0].before, json!(["ROLE_READ"]));
        assert_eq!(rows[0].after, json!(["ROLE_READ", "ROLE_DELETE"]));
    }

    #[test]
    fn blacklisted_fields_never_appear_even_when_changed() {
        let mut change = ModelChange::new(&record("a", &[], "h", Some("t1")));
        change.set_after(&record("a", &[], "h", Some("t2")));
        assert!(change.changes().is_none());
    }

    #[test]
    fn censored_fields_are_reported_without_values() {
        let mut change = ModelChange::new(&record("a", &[], "old-hash", None));
        change.set_after(&record("a", &[], "new-hash", None));
        let rows: Vec<ChangeRow> = serde_json::from_str(&change.changes().unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "password");
        assert_eq!(rows[0].before, json!(CENSOR_STRING));
        assert_eq!(rows[0].after, json!(CENSOR_STRING));
    }

    #[test]
    fn identical_snapshots_yield_no_delta() {
        let mut change = ModelChange::new(&record("a", &["ROLE_READ"], "h", None));
        change.set_after(&record("a", &["ROLE_READ"], "h", None));
        assert!(change.changes().is_none());
    }

    #[test]
    fn comparison_is_by_value_not_formatting() {
        let mut change = ModelChange::default();
        change.before.insert("count".into(), json!(3));
        change.after.insert("count".into(), json!(3));
        change.before.insert("tags".into(), json!(["a", "b"]));
        change.after.insert("tags".into(), json!(["b", "a"]));
        let rows: Vec<ChangeRow> = serde_json::from_str(&change.changes().unwrap()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "tags");
    }

    #[test]
    fn missing_after_snapshot_diffs_against_null() {
        let change = ModelChange::new(&record("a", &[], "h", None));
        let rows: Vec<ChangeRow> = serde_json::from_str(&change.changes().unwrap()).unwrap();
        let name = rows.iter().find(|r| r.field == "name").unwrap();
        assert_eq!(name.after, Value::Null);
    }

    #[test]
    fn read_filter_strips_role_ids_but_keeps_names() {
        let raw = json!([
            { "field": "roles", "before": ["id1"], "after": ["id1", "id2"] },
            { "field": "role_names", "before": ["Admins"], "after": ["Admins", "Editors"] }
        ])
        .to_string();
        let rows = filter_changes(&raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "role_names");
    }

    #[test]
    fn auditor_keeps_working_after_a_poisoning_panic() {
        let auditor = Auditor::new();
        let id = Uuid::now_v7();
        auditor.add("Role \"a\" created", "Role", id, None);

        let poisoner = auditor.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.0.lock().unwrap();
            panic!("while holding the ledger lock");
        })
        .join();

        auditor.add("Role \"a\" updated", "Role", id, None);
        assert_eq!(auditor.entries().len(), 2);
        assert_eq!(auditor.actor(), (None, None));
    }

    #[test]
    fn auditor_accumulates_in_order() {
        let auditor = Auditor::new();
        let id = Uuid::now_v7();
        auditor.add("Role \"a\" created", "Role", id, None);
        auditor.add("Role \"a\" updated", "Role", id, None);
        let entries = auditor.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "Role \"a\" created");
        assert_eq!(entries[1].message, "Role \"a\" updated");
    }
}
