pub mod maintenance_store;
pub mod panel;
pub mod pricing;
pub mod telegram;

pub use maintenance_store::{MaintenanceStore, RedisMaintenanceStore, VolatileMaintenanceStore};
pub use panel::{NoopPanel, PanelClient, PanelUserUpdate, VpnPanel};
pub use pricing::{PlanPricing, Pricing};
pub use telegram::{ChannelMembership, NotificationGateway, TelegramGateway, TelegramMembership};
