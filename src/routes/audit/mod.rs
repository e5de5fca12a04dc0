mod handler;
pub mod model;

pub use handler::read_audits;
