pub mod announcement;
pub mod audit;
pub mod dashboard;
pub mod ping;
pub mod role;
pub mod session;
pub mod user;
