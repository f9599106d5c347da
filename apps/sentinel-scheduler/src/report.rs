use std::fmt::Display;

use chrono::{DateTime, Utc};
use sentinel_db::models::monitoring::NewLogEntry;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

const MAX_RECORDED_ERRORS: usize = 20;

/// What happened to one candidate of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Acted,
    /// Handled without the main action, e.g. autopay declined for lack of funds.
    Declined,
    Skipped,
}

/// Per-batch aggregate. One item error never aborts the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub name: &'static str,
    pub succeeded: u64,
    pub declined: u64,
    pub skipped: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub fn record(&mut self, item: impl Display, outcome: CoreResult<ItemOutcome>) {
        match outcome {
            Ok(ItemOutcome::Acted) => self.succeeded += 1,
            Ok(ItemOutcome::Declined) => self.declined += 1,
            Ok(ItemOutcome::Skipped) => self.skipped += 1,
            Err(err) => self.failure(item, &err),
        }
    }

    pub fn failure(&mut self, item: impl Display, err: &CoreError) {
        self.failed += 1;
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(format!("{}: {}", item, err));
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded += other.succeeded;
        self.declined += other.declined;
        self.skipped += other.skipped;
        self.failed += other.failed;
        for err in other.errors {
            if self.errors.len() >= MAX_RECORDED_ERRORS {
                break;
            }
            self.errors.push(format!("{}/{}", other.name, err));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded == 0 && self.declined == 0 && self.failed == 0
    }

    pub fn log(&self) {
        if self.failed > 0 {
            warn!(
                batch = self.name,
                succeeded = self.succeeded,
                declined = self.declined,
                skipped = self.skipped,
                failed = self.failed,
                "Batch finished with errors: {:?}",
                self.errors
            );
        } else if !self.is_empty() {
            info!(
                batch = self.name,
                succeeded = self.succeeded,
                declined = self.declined,
                skipped = self.skipped,
                "Batch finished"
            );
        }
    }

    pub fn to_log_entry(&self, event_type: &str, now: DateTime<Utc>) -> NewLogEntry {
        NewLogEntry {
            event_type: event_type.to_string(),
            message: format!(
                "{}: {} succeeded, {} declined, {} skipped, {} failed",
                self.name, self.succeeded, self.declined, self.skipped, self.failed
            ),
            payload: Some(json!({
                "batch": self.name,
                "succeeded": self.succeeded,
                "declined": self.declined,
                "skipped": self.skipped,
                "failed": self.failed,
                "errors": self.errors,
            })),
            success: self.failed == 0,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_capped_but_counted() {
        let mut report = BatchReport::new("expire");
        for id in 0..30 {
            report.record(id, Err(CoreError::DataIntegrity("missing user".into())));
        }
        report.record(99, Ok(ItemOutcome::Acted));
        assert_eq!(report.failed, 30);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.errors.len(), MAX_RECORDED_ERRORS);
    }

    #[test]
    fn merge_prefixes_child_errors() {
        let mut child = BatchReport::new("autopay");
        child.record("sub 7", Err(CoreError::transient("panel", "502")));
        let mut parent = BatchReport::new("cycle");
        parent.merge(child);
        assert_eq!(parent.failed, 1);
        assert!(parent.errors[0].starts_with("autopay/sub 7"));
    }
}
