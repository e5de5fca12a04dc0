mod auth;
mod request_id;
mod request_log;
mod session;

pub use auth::authorize;
pub use request_id::{RequestId, set_request_id};
pub use request_log::log_request;
pub use session::set_session;
