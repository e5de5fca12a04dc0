mod handler;
pub mod model;

pub use handler::{create_user, delete_user, read_user, read_users, update_user};
