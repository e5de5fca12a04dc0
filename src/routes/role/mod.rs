mod handler;
pub mod model;

pub use handler::{create_role, delete_role, read_role, read_roles, update_role};
