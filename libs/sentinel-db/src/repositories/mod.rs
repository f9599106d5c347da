pub mod discount_repo;
pub mod monitoring_repo;
pub mod notification_repo;
pub mod pg;
pub mod subscription_repo;
pub mod ticket_repo;
pub mod user_repo;

pub use pg::{PgStore, PgUnitOfWork};
