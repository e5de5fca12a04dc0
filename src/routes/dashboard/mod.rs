mod handler;

pub use handler::{total_request_count, total_request_duration, total_session_count};
