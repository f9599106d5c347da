pub mod db;
pub mod models;
pub mod repositories;
pub mod store;

pub use sqlx;
pub use store::{Store, UnitOfWork};
