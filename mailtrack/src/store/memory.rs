//! In-process record store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ConditionalUpdate, LogFilter, RecordStore};
use crate::email::{EmailLog, EmailStatus, NewEmailLog, TrackingId};
use crate::error::{StoreError, StoreResult};
use crate::track::detector::open_allowed;

/// Record store backed by a map behind an async `RwLock`.
///
/// The conditional update checks and writes under a single write guard, so
/// it is atomic per tracking id.
#[derive(Clone, Default)]
pub struct MemoryStore {
    logs: Arc<RwLock<HashMap<TrackingId, EmailLog>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.logs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, new_log: NewEmailLog, sent_at: DateTime<Utc>) -> StoreResult<EmailLog> {
        let mut logs = self.logs.write().await;
        if logs.contains_key(&new_log.tracking_id) {
            return Err(StoreError::Duplicate(new_log.tracking_id.to_string()));
        }

        let log = new_log.into_log(sent_at);
        logs.insert(log.tracking_id.clone(), log.clone());
        Ok(log)
    }

    async fn find(&self, tracking_id: &TrackingId) -> StoreResult<Option<EmailLog>> {
        Ok(self.logs.read().await.get(tracking_id).cloned())
    }

    async fn conditional_update(
        &self,
        tracking_id: &TrackingId,
        request_ip: Option<&str>,
        opened_at: DateTime<Utc>,
    ) -> StoreResult<ConditionalUpdate> {
        let mut logs = self.logs.write().await;
        let Some(log) = logs.get_mut(tracking_id) else {
            return Ok(ConditionalUpdate::Missing);
        };

        if !open_allowed(log, request_ip) {
            return Ok(ConditionalUpdate::Rejected(log.clone()));
        }

        log.status = EmailStatus::Opened;
        log.opened_at = Some(opened_at);
        Ok(ConditionalUpdate::Applied(log.clone()))
    }

    async fn list(&self, filter: &LogFilter) -> StoreResult<Vec<EmailLog>> {
        let logs = self.logs.read().await;
        let mut matching: Vec<EmailLog> = logs
            .values()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_log(id: &str, group: &str, ip: Option<&str>) -> NewEmailLog {
        NewEmailLog {
            tracking_id: TrackingId::parse(id).unwrap(),
            recipient_address: format!("{}@x.com", id.to_lowercase()),
            group_label: group.to_string(),
            sender_origin_ip: ip.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryStore::new();
        let created = store
            .create(new_log("E1", "sales", Some("1.2.3.4")), Utc::now())
            .await
            .unwrap();

        assert_eq!(created.status, EmailStatus::Sent);
        assert!(created.opened_at.is_none());

        let found = store.find(&created.tracking_id).await.unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let store = MemoryStore::new();
        store
            .create(new_log("E1", "sales", None), Utc::now())
            .await
            .unwrap();

        let err = store
            .create(new_log("E1", "ops", None), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == "E1"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_conditional_update_missing() {
        let store = MemoryStore::new();
        let id = TrackingId::parse("E2").unwrap();
        let result = store
            .conditional_update(&id, Some("9.9.9.9"), Utc::now())
            .await
            .unwrap();
        assert_eq!(result, ConditionalUpdate::Missing);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_conditional_update_applies_once() {
        let store = MemoryStore::new();
        let id = TrackingId::parse("E1").unwrap();
        store
            .create(new_log("E1", "sales", Some("1.2.3.4")), Utc::now())
            .await
            .unwrap();

        let first_at = Utc::now();
        let first = store
            .conditional_update(&id, Some("9.9.9.9"), first_at)
            .await
            .unwrap();
        assert!(matches!(first, ConditionalUpdate::Applied(ref log) if log.opened_at == Some(first_at)));

        let second = store
            .conditional_update(&id, Some("9.9.9.9"), first_at + Duration::seconds(5))
            .await
            .unwrap();
        match second {
            ConditionalUpdate::Rejected(log) => assert_eq!(log.opened_at, Some(first_at)),
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conditional_update_same_ip_rejected() {
        let store = MemoryStore::new();
        let id = TrackingId::parse("E1").unwrap();
        store
            .create(new_log("E1", "sales", Some("1.2.3.4")), Utc::now())
            .await
            .unwrap();

        let result = store
            .conditional_update(&id, Some("1.2.3.4"), Utc::now())
            .await
            .unwrap();
        assert!(matches!(result, ConditionalUpdate::Rejected(ref log) if log.status == EmailStatus::Sent));
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts_newest_first() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .create(new_log("OLD", "sales", None), now - Duration::days(3))
            .await
            .unwrap();
        store.create(new_log("NEW", "sales", None), now).await.unwrap();
        store.create(new_log("OPS", "ops", None), now).await.unwrap();

        let filter = LogFilter {
            group_label: Some("sales".to_string()),
            ..Default::default()
        };
        let logs = store.list(&filter).await.unwrap();
        let ids: Vec<&str> = logs.iter().map(|l| l.tracking_id.as_str()).collect();
        assert_eq!(ids, vec!["NEW", "OLD"]);
    }
}
