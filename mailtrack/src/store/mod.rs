//! Record store for email logs.
//!
//! The store is the only serialization point for open transitions: every
//! backend must apply [`RecordStore::conditional_update`] atomically per
//! tracking id so that concurrent opens of one email have a single winner.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: process-local, used when no database is configured
//! - [`PostgresStore`]: durable, selected by `DATABASE_URL`

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::email::{EmailLog, EmailStatus, NewEmailLog, TrackingId};
use crate::error::StoreResult;
use crate::Config;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Outcome of a conditional Sent -> Opened update.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate {
    /// The record was transitioned; carries the updated record.
    Applied(EmailLog),
    /// The record exists but the open condition did not hold; carries the
    /// record as currently stored.
    Rejected(EmailLog),
    /// No record has this tracking id.
    Missing,
}

/// Filter for listing records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub group_label: Option<String>,
    pub sent_since: Option<DateTime<Utc>>,
    pub status: Option<EmailStatus>,
}

impl LogFilter {
    pub fn matches(&self, log: &EmailLog) -> bool {
        if let Some(group) = &self.group_label {
            if &log.group_label != group {
                return false;
            }
        }
        if let Some(since) = self.sent_since {
            if log.sent_at < since {
                return false;
            }
        }
        if let Some(status) = self.status {
            if log.status != status {
                return false;
            }
        }
        true
    }
}

/// Durable mapping from tracking id to email log.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` if the id is taken.
    async fn create(&self, new_log: NewEmailLog, sent_at: DateTime<Utc>) -> StoreResult<EmailLog>;

    /// Look up a record by tracking id.
    async fn find(&self, tracking_id: &TrackingId) -> StoreResult<Option<EmailLog>>;

    /// Atomically mark the record opened if it is still `Sent` and its
    /// stored sender IP is unset or differs from `request_ip`.
    async fn conditional_update(
        &self,
        tracking_id: &TrackingId,
        request_ip: Option<&str>,
        opened_at: DateTime<Utc>,
    ) -> StoreResult<ConditionalUpdate>;

    /// Records matching `filter`, newest first by `sent_at`.
    async fn list(&self, filter: &LogFilter) -> StoreResult<Vec<EmailLog>>;
}

/// Build the store selected by configuration.
pub async fn connect(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database_max_connections).await?;
            info!(backend = "postgres", "record_store_ready");
            Ok(Arc::new(store))
        }
        None => {
            info!(backend = "memory", "record_store_ready");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn log(group: &str, status: EmailStatus, sent_at: DateTime<Utc>) -> EmailLog {
        EmailLog {
            tracking_id: TrackingId::parse("E1").unwrap(),
            recipient_address: "a@x.com".to_string(),
            group_label: group.to_string(),
            status,
            sender_origin_ip: None,
            sent_at,
            opened_at: None,
        }
    }

    #[test]
    fn test_default_filter_matches_everything() {
        let filter = LogFilter::default();
        assert!(filter.matches(&log("sales", EmailStatus::Sent, Utc::now())));
    }

    #[test]
    fn test_filter_by_group_and_status() {
        let filter = LogFilter {
            group_label: Some("sales".to_string()),
            status: Some(EmailStatus::Opened),
            ..Default::default()
        };
        assert!(!filter.matches(&log("sales", EmailStatus::Sent, Utc::now())));
        assert!(!filter.matches(&log("ops", EmailStatus::Opened, Utc::now())));
    }

    #[test]
    fn test_filter_by_sent_since_is_inclusive() {
        let now = Utc::now();
        let filter = LogFilter {
            sent_since: Some(now),
            ..Default::default()
        };
        assert!(filter.matches(&log("sales", EmailStatus::Sent, now)));
        assert!(!filter.matches(&log(
            "sales",
            EmailStatus::Sent,
            now - Duration::seconds(1)
        )));
    }
}
