use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::routes::audit::model::Auditor;
use crate::utils::generate_id;

#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// 为每个请求分配 id 和审计台账，并在响应头回显 X-Request-Id
pub async fn set_request_id(mut req: Request<Body>, next: Next) -> Response {
    let id = generate_id();
    req.extensions_mut().insert(RequestId(id));
    req.extensions_mut().insert(Auditor::new());

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}
