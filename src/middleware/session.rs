use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::AppState;
use crate::routes::audit::model::Auditor;
use crate::routes::session::model::Session;

/// 把 Bearer 令牌解析成会话并滑动续期。
/// 解析失败或查库出错都落回匿名会话，绝不阻断请求。
pub async fn set_session(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let session = match &bearer {
        Some(TypedHeader(Authorization(bearer))) => {
            match Session::read(&state.pool, bearer.token(), true).await {
                Ok(session) => session,
                Err(err) => {
                    tracing::error!("session read failed: {err}");
                    Session::default()
                }
            }
        }
        None => Session::default(),
    };

    // 请求日志行据此反查行为人
    if session.is_valid {
        if let Some(auditor) = req.extensions().get::<Auditor>() {
            auditor.set_actor(session.user_id, session.last_token.clone());
        }
    }

    let touched_expiration = if session.is_valid {
        session.token_expires
    } else {
        None
    };
    req.extensions_mut().insert(session);

    let mut response = next.run(req).await;
    if let Some(expires) = touched_expiration {
        if let Ok(value) = HeaderValue::from_str(&expires.to_rfc3339()) {
            response.headers_mut().insert("X-Token-Expires", value);
        }
    }
    response
}
