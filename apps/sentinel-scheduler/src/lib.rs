pub mod api;
pub mod app;
pub mod clients;
pub mod config;
pub mod error;
pub mod report;
pub mod scheduler;
pub mod services;
pub mod templates;

pub use config::SchedulerConfig;
pub use error::{CoreError, CoreResult, TickError};
pub use scheduler::{CycleCheck, CycleScheduler, SchedulerDeps};
