//! Open-event detection.
//!
//! Decides whether a pixel fetch is a genuine first open of an email and, if
//! so, performs the Sent -> Opened transition through the record store.
//!
//! Deduplication is a single heuristic: a fetch coming from the same IP the
//! email was sent from is not counted. This cannot tell a recipient sharing
//! the sender's NAT from the sender re-opening their own copy; such opens are
//! suppressed too.
//!
//! The store deadline can expire after the transition has been committed but
//! before the store replies. The record is then Opened, the caller sees a
//! timeout and no event is broadcast; later fetches report `AlreadyOpened`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::email::{EmailLog, OpenEvent, TrackingId};
use crate::error::{StoreError, StoreResult};
use crate::store::{ConditionalUpdate, RecordStore};

/// Why a known record was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoTransitionReason {
    /// The fetch came from the sender's own IP.
    SameOrigin,
    /// The record was already opened.
    AlreadyOpened,
}

impl NoTransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoTransitionReason::SameOrigin => "same_origin",
            NoTransitionReason::AlreadyOpened => "already_opened",
        }
    }
}

/// Result of running detection for one tracking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// This request won the Sent -> Opened transition.
    TransitionApplied(OpenEvent),
    /// The record exists but no transition happened.
    NoTransition(NoTransitionReason),
    /// No record has this tracking id.
    NotFound,
}

/// Treat blank IPs as unknown.
pub fn normalize_ip(ip: Option<&str>) -> Option<&str> {
    ip.map(str::trim).filter(|ip| !ip.is_empty())
}

/// Whether a fetch from `request_ip` may open `log`.
///
/// An unknown request IP never equals a stored IP, and a record without a
/// stored sender IP can be opened from anywhere.
pub fn open_allowed(log: &EmailLog, request_ip: Option<&str>) -> bool {
    if log.is_opened() {
        return false;
    }
    match (normalize_ip(log.sender_origin_ip.as_deref()), normalize_ip(request_ip)) {
        (Some(sender), Some(request)) => sender != request,
        _ => true,
    }
}

fn rejection_reason(log: &EmailLog) -> NoTransitionReason {
    if log.is_opened() {
        NoTransitionReason::AlreadyOpened
    } else {
        NoTransitionReason::SameOrigin
    }
}

/// Runs open detection against a record store.
#[derive(Clone)]
pub struct OpenDetector {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl OpenDetector {
    pub fn new(store: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Detect an open, bounded by the configured store deadline.
    pub async fn detect(
        &self,
        tracking_id: &TrackingId,
        request_ip: Option<&str>,
    ) -> StoreResult<OpenOutcome> {
        match tokio::time::timeout(self.timeout, self.detect_inner(tracking_id, request_ip)).await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn detect_inner(
        &self,
        tracking_id: &TrackingId,
        request_ip: Option<&str>,
    ) -> StoreResult<OpenOutcome> {
        let request_ip = normalize_ip(request_ip);

        let Some(log) = self.store.find(tracking_id).await? else {
            debug!(tracking_id = %tracking_id, "open_tracking_id_not_found");
            return Ok(OpenOutcome::NotFound);
        };

        if !open_allowed(&log, request_ip) {
            let reason = rejection_reason(&log);
            debug!(
                tracking_id = %tracking_id,
                reason = reason.as_str(),
                "open_suppressed"
            );
            return Ok(OpenOutcome::NoTransition(reason));
        }

        let outcome = match self
            .store
            .conditional_update(tracking_id, request_ip, Utc::now())
            .await?
        {
            ConditionalUpdate::Applied(updated) => {
                info!(
                    tracking_id = %tracking_id,
                    group_label = %updated.group_label,
                    request_ip = request_ip.unwrap_or("unknown"),
                    "open_transition_applied"
                );
                OpenOutcome::TransitionApplied(OpenEvent::opened(updated.tracking_id))
            }
            // Lost a race with a concurrent open.
            ConditionalUpdate::Rejected(current) => {
                let reason = rejection_reason(&current);
                debug!(
                    tracking_id = %tracking_id,
                    reason = reason.as_str(),
                    "open_conditional_update_rejected"
                );
                OpenOutcome::NoTransition(reason)
            }
            ConditionalUpdate::Missing => OpenOutcome::NotFound,
        };

        Ok(outcome)
    }
}
