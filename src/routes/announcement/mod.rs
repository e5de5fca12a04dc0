mod handler;
pub mod model;

pub use handler::{
    create_announcement,
    delete_announcement,
    read_announcement,
    read_announcements,
    update_announcement,
};
