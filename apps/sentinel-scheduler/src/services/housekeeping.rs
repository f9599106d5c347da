use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sentinel_db::UnitOfWork;
use tracing::info;

use crate::error::CoreResult;
use crate::report::BatchReport;
use crate::scheduler::CycleCheck;

/// Sweeps expired discount offers and old monitoring log rows.
pub struct Housekeeping {
    retention_days: i64,
}

impl Housekeeping {
    pub fn new(retention_days: i64) -> Self {
        Self { retention_days }
    }
}

#[async_trait]
impl CycleCheck for Housekeeping {
    fn name(&self) -> &'static str {
        "housekeeping"
    }

    async fn run(&self, uow: &mut dyn UnitOfWork, now: DateTime<Utc>) -> CoreResult<BatchReport> {
        let mut report = BatchReport::new(self.name());

        let offers = uow.deactivate_expired_offers(now).await?;
        let logs = uow
            .prune_logs(now - Duration::days(self.retention_days))
            .await?;
        if offers > 0 || logs > 0 {
            info!(
                "Housekeeping: {} discount offers expired, {} log rows pruned",
                offers, logs
            );
        }
        report.succeeded = offers + logs;
        Ok(report)
    }
}
