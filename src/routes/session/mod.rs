mod handler;
pub mod model;

pub use handler::{
    change_password,
    change_theme,
    create_session,
    delete_session,
    mark_announcement_read,
    read_session,
};
