pub mod discount;
pub mod monitoring;
pub mod notification;
pub mod subscription;
pub mod ticket;
pub mod user;
