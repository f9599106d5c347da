pub mod admin_notifier;
pub mod autopay;
pub mod event_log;
pub mod health_monitor;
pub mod housekeeping;
pub mod lifecycle;
pub mod maintenance;
pub mod notification_ledger;
pub mod notifier;
pub mod ticket_sla;
