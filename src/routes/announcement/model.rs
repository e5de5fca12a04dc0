use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::utils::generate_id;
use crate::validation::{Field, FieldError, Rule, validate};

const SCHEMA: &[Field] = &[
    Field {
        name: "announceAt",
        label: "Announce At",
        rules: &[Rule::Required, Rule::MinLen(1)],
    },
    Field {
        name: "expiresAt",
        label: "Expires At",
        rules: &[Rule::Required, Rule::MinLen(1)],
    },
    Field {
        name: "title",
        label: "Title",
        rules: &[Rule::Required, Rule::MinLen(1), Rule::MaxLen(255)],
    },
    Field {
        name: "body",
        label: "Body",
        rules: &[Rule::Required, Rule::MinLen(1), Rule::MaxLen(1000)],
    },
];

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Announcement {
    pub announcement_id: Uuid,
    pub announce_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementSummary {
    pub announcement_id: Uuid,
    pub announce_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementView {
    pub announcement_id: Uuid,
    pub announce_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

impl Default for Announcement {
    fn default() -> Self {
        let now = Utc::now();
        Announcement {
            announcement_id: generate_id(),
            announce_at: now,
            expires_at: now,
            title: String::new(),
            body: String::new(),
        }
    }
}

impl Announcement {
    pub async fn read_all(pool: &PgPool) -> Result<Vec<AnnouncementSummary>, sqlx::Error> {
        sqlx::query_as::<_, AnnouncementSummary>(
            r#"
            SELECT announcement_id, announce_at, expires_at, title
            FROM announcements
            ORDER BY announce_at DESC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn read(pool: &PgPool, announcement_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Announcement>(
            "SELECT * FROM announcements WHERE announcement_id = $1",
        )
        .bind(announcement_id)
        .fetch_optional(pool)
        .await
    }

    /// 公告时间必须早于过期时间
    pub fn validate(&mut self, payload: &Value) -> Vec<FieldError> {
        let (values, mut errors) = validate(SCHEMA, payload);
        if errors.is_empty() {
            let announce_at = parse_datetime(values.get("announceAt"));
            let expires_at = parse_datetime(values.get("expiresAt"));
            match (announce_at, expires_at) {
                (Some(announce_at), Some(expires_at)) => {
                    if expires_at < announce_at {
                        errors.push(FieldError::new(
                            "announceAt",
                            "Must announce before expiration",
                        ));
                    } else {
                        self.announce_at = announce_at;
                        self.expires_at = expires_at;
                    }
                }
                _ => {
                    if announce_at.is_none() {
                        errors.push(FieldError::new(
                            "announceAt",
                            "\"Announce At\" must be a valid date",
                        ));
                    }
                    if expires_at.is_none() {
                        errors.push(FieldError::new(
                            "expiresAt",
                            "\"Expires At\" must be a valid date",
                        ));
                    }
                }
            }
            if let Some(title) = values.get("title").and_then(Value::as_str) {
                self.title = title.to_string();
            }
            if let Some(body) = values.get("body").and_then(Value::as_str) {
                self.body = body.to_string();
            }
        }
        errors
    }

    pub async fn create(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO announcements (announcement_id, announce_at, expires_at, title, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(self.announcement_id)
        .bind(self.announce_at)
        .bind(self.expires_at)
        .bind(&self.title)
        .bind(&self.body)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE announcements
            SET announce_at = $1, expires_at = $2, title = $3, body = $4
            WHERE announcement_id = $5
            "#,
        )
        .bind(self.announce_at)
        .bind(self.expires_at)
        .bind(&self.title)
        .bind(&self.body)
        .bind(self.announcement_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM announcements WHERE announcement_id = $1")
            .bind(self.announcement_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn for_client(&self) -> AnnouncementView {
        AnnouncementView {
            announcement_id: self.announcement_id,
            announce_at: self.announce_at,
            expires_at: self.expires_at,
            title: self.title.clone(),
            body: self.body.clone(),
        }
    }
}

fn parse_datetime(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(announce_at: &str, expires_at: &str) -> Value {
        json!({
            "announceAt": announce_at,
            "expiresAt": expires_at,
            "title": "Maintenance window",
            "body": "The system will be down for one hour."
        })
    }

    #[test]
    fn accepts_ordered_dates() {
        let mut announcement = Announcement::default();
        let errors = announcement.validate(&payload(
            "2026-01-01T00:00:00Z",
            "2026-01-02T00:00:00Z",
        ));
        assert!(errors.is_empty());
        assert_eq!(announcement.title, "Maintenance window");
    }

    #[test]
    fn rejects_expiration_before_announce() {
        let mut announcement = Announcement::default();
        let errors = announcement.validate(&payload(
            "2026-01-02T00:00:00Z",
            "2026-01-01T00:00:00Z",
        ));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "announceAt");
        assert_eq!(errors[0].message, "Must announce before expiration");
    }

    #[test]
    fn rejects_unparseable_dates() {
        let mut announcement = Announcement::default();
        let errors = announcement.validate(&payload("soon", "later"));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn collects_schema_errors_for_missing_fields() {
        let mut announcement = Announcement::default();
        let errors = announcement.validate(&json!({ "title": "x" }));
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["announceAt", "expiresAt", "body"]);
    }
}
