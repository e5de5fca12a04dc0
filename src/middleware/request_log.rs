use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, header::USER_AGENT},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::AppState;
use crate::middleware::RequestId;
use crate::routes::audit::model::Auditor;
use crate::utils::generate_id;

/// 响应完成后把请求行与累积的审计条目写成一个事务。
/// 落库在派生任务里进行：失败只记日志，永不影响客户端响应。
pub async fn log_request(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0)
        .unwrap_or_else(generate_id);
    let auditor = req.extensions().get::<Auditor>().cloned().unwrap_or_default();
    let method = req.method().to_string();
    // 查询串不入库
    let path = req.uri().path().to_string();
    let ip_address = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let response = next.run(req).await;

    let status_code = response.status().as_u16() as i32;
    let duration_ms = start.elapsed().as_millis() as i64;
    let pool = state.pool.clone();
    tokio::spawn(async move {
        if let Err(err) = flush(
            &pool, request_id, &auditor, &method, &path, status_code, ip_address, user_agent,
            duration_ms,
        )
        .await
        {
            tracing::error!("request log flush failed: {err}");
        }
    });

    response
}

#[allow(clippy::too_many_arguments)]
async fn flush(
    pool: &PgPool,
    request_id: Uuid,
    auditor: &Auditor,
    method: &str,
    path: &str,
    status_code: i32,
    ip_address: Option<String>,
    user_agent: Option<String>,
    duration_ms: i64,
) -> Result<(), sqlx::Error> {
    let (user_id, session_token) = auditor.actor();
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO requests (
            request_id, user_id, timestamp, session_token, method,
            path, status_code, ip_address, user_agent, duration_ms
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(request_id)
    .bind(user_id)
    .bind(now)
    .bind(&session_token)
    .bind(method)
    .bind(path)
    .bind(status_code)
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(duration_ms)
    .execute(&mut *tx)
    .await?;

    for entry in auditor.entries() {
        sqlx::query(
            r#"
            INSERT INTO audits (
                audit_id, request_id, timestamp, message, model_type, model_id, changes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(generate_id())
        .bind(request_id)
        .bind(now)
        .bind(&entry.message)
        .bind(&entry.model_type)
        .bind(entry.model_id)
        .bind(&entry.changes)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await
}
