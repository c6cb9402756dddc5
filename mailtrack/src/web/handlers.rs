//! HTTP endpoint handlers.
//!
//! The tracking handler must never fail visibly: whatever the detector or
//! store report, the mail client gets the same pixel.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::client_ip::{normalize_ip_text, ClientIp};
use crate::email::{EmailLog, EmailStatus, NewEmailLog, TrackingId};
use crate::error::{ApiError, StoreError, StoreResult};
use crate::notify::Notifier;
use crate::store::{LogFilter, RecordStore};
use crate::track::{track_open, OpenDetector, Pixel};
use crate::Config;

/// Largest `days` window accepted by the listing endpoint.
pub const MAX_DAYS_WINDOW: i64 = 36_500;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub detector: OpenDetector,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RecordStore>) -> Self {
        let detector = OpenDetector::new(store.clone(), config.store_timeout());
        let notifier = Notifier::new(config.observer_buffer);
        Self {
            config: Arc::new(config),
            store,
            detector,
            notifier,
        }
    }

    /// Run a store call under the configured deadline.
    async fn with_deadline<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.config.store_timeout(), call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.config.store_timeout_ms)))
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Liveness text on the root path.
pub async fn root() -> &'static str {
    "OK"
}

// =============================================================================
// Tracking Pixel
// =============================================================================

/// Tracking pixel endpoint.
///
/// Always answers 200 with the pixel; the outcome is only logged.
pub async fn track(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    path: Result<Path<String>, PathRejection>,
) -> Pixel {
    let raw = path.ok().map(|Path(id)| id);
    let outcome = track_open(&state.detector, &state.notifier, raw.as_deref(), ip.as_deref()).await;

    info!(
        request_ip = ip.as_deref().unwrap_or("unknown"),
        outcome = ?outcome,
        "track_request_complete"
    );

    Pixel
}

/// Tracking endpoint hit without an id.
pub async fn track_without_id() -> Pixel {
    Pixel
}

// =============================================================================
// Ingestion
// =============================================================================

/// Request body for registering a sent email.
///
/// The snake_case names used by older senders are accepted as aliases.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmailLogRequest {
    #[serde(default, alias = "email_id")]
    pub tracking_id: Option<String>,
    #[serde(default, alias = "email")]
    pub recipient_address: Option<String>,
    #[serde(default, alias = "people")]
    pub group_label: Option<String>,
    #[serde(default, alias = "sender_ip")]
    pub sender_origin_ip: Option<String>,
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl CreateEmailLogRequest {
    /// Validate the request. `requester_ip` is stored as the sender IP when
    /// the body does not carry one.
    pub fn validate(self, requester_ip: Option<String>) -> Result<NewEmailLog, ApiError> {
        let tracking_id = required(self.tracking_id);
        let recipient_address = required(self.recipient_address);
        let group_label = required(self.group_label);

        let (tracking_id, recipient_address, group_label) =
            match (tracking_id, recipient_address, group_label) {
                (Some(id), Some(to), Some(group)) => (id, to, group),
                (id, to, group) => {
                    let missing: Vec<&str> = [
                        ("trackingId", id.is_none()),
                        ("recipientAddress", to.is_none()),
                        ("groupLabel", group.is_none()),
                    ]
                    .into_iter()
                    .filter_map(|(name, absent)| absent.then_some(name))
                    .collect();
                    return Err(ApiError::Validation(format!(
                        "Missing required fields: {}",
                        missing.join(", ")
                    )));
                }
            };

        let tracking_id = TrackingId::parse(&tracking_id)
            .map_err(|e| ApiError::Validation(format!("Invalid trackingId: {}", e)))?;

        let sender_origin_ip = self
            .sender_origin_ip
            .as_deref()
            .and_then(normalize_ip_text)
            .or(requester_ip);

        Ok(NewEmailLog {
            tracking_id,
            recipient_address,
            group_label,
            sender_origin_ip,
        })
    }
}

/// Register a sent email.
pub async fn create_email_log(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Result<Json<CreateEmailLogRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let new_log = request.validate(ip)?;

    let log = state
        .with_deadline(state.store.create(new_log, Utc::now()))
        .await
        .map_err(|e| {
            error!(error = %e, "email_log_create_failed");
            ApiError::from(e)
        })?;

    info!(
        tracking_id = %log.tracking_id,
        group_label = %log.group_label,
        has_sender_ip = log.sender_origin_ip.is_some(),
        "email_log_created"
    );

    Ok((StatusCode::CREATED, Json(log)))
}

// =============================================================================
// Reporting
// =============================================================================

/// Query parameters for listing email logs.
#[derive(Debug, Default, Deserialize)]
pub struct ListEmailsQuery {
    pub people: Option<String>,
    pub days: Option<String>,
    pub status: Option<String>,
}

/// Start of the window "sent within the last `days` days": UTC midnight of
/// the current day, minus `days` days.
pub fn sent_since_cutoff(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
        - Duration::days(days)
}

impl ListEmailsQuery {
    pub fn into_filter(self, now: DateTime<Utc>) -> Result<LogFilter, ApiError> {
        let group_label = self
            .people
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && p != "All");

        let sent_since = match self.days.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => {
                let days: i64 = raw
                    .parse()
                    .ok()
                    .filter(|d| (0..=MAX_DAYS_WINDOW).contains(d))
                    .ok_or_else(|| ApiError::Validation(format!("Invalid days: {}", raw)))?;
                Some(sent_since_cutoff(now, days))
            }
            None => None,
        };

        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<EmailStatus>().map_err(ApiError::Validation)?),
            None => None,
        };

        Ok(LogFilter {
            group_label,
            sent_since,
            status,
        })
    }
}

/// Group records by label.
///
/// Groups come out in alphabetical label order, whatever order the store
/// returned. Within a group the store's order is kept, which for every
/// backend is newest `sent_at` first.
pub fn group_by_label(logs: Vec<EmailLog>) -> BTreeMap<String, Vec<EmailLog>> {
    let mut groups: BTreeMap<String, Vec<EmailLog>> = BTreeMap::new();
    for log in logs {
        groups.entry(log.group_label.clone()).or_default().push(log);
    }
    groups
}

/// List email logs grouped by group label.
pub async fn list_emails(
    State(state): State<AppState>,
    query: Result<Query<ListEmailsQuery>, QueryRejection>,
) -> Result<Json<BTreeMap<String, Vec<EmailLog>>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let filter = query.into_filter(Utc::now())?;

    let logs = state
        .with_deadline(state.store.list(&filter))
        .await
        .map_err(|e| {
            error!(error = %e, "email_log_list_failed");
            ApiError::from(e)
        })?;

    info!(count = logs.len(), filter = ?filter, "email_logs_listed");

    Ok(Json(group_by_label(logs)))
}
