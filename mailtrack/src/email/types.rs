//! Email log records and the events derived from them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest tracking id accepted, in bytes.
pub const MAX_TRACKING_ID_LEN: usize = 256;

// =============================================================================
// Tracking Id
// =============================================================================

/// Opaque identifier embedded in an email's pixel URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

/// Reasons a raw tracking id is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingIdError {
    Empty,
    TooLong,
    ControlCharacter,
}

impl fmt::Display for TrackingIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingIdError::Empty => write!(f, "tracking id is empty"),
            TrackingIdError::TooLong => {
                write!(f, "tracking id exceeds {} bytes", MAX_TRACKING_ID_LEN)
            }
            TrackingIdError::ControlCharacter => {
                write!(f, "tracking id contains control characters")
            }
        }
    }
}

impl TrackingId {
    /// Parse a raw id, trimming surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self, TrackingIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TrackingIdError::Empty);
        }
        if trimmed.len() > MAX_TRACKING_ID_LEN {
            return Err(TrackingIdError::TooLong);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(TrackingIdError::ControlCharacter);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Delivery status of a logged email. Only ever moves Sent -> Opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmailStatus {
    Sent,
    Opened,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Sent => "Sent",
            EmailStatus::Opened => "Opened",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sent" => Ok(EmailStatus::Sent),
            "opened" => Ok(EmailStatus::Opened),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

// =============================================================================
// Email Log
// =============================================================================

/// A sent email as held by the record store.
///
/// `opened_at` is set if and only if `status` is [`EmailStatus::Opened`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailLog {
    pub tracking_id: TrackingId,
    pub recipient_address: String,
    pub group_label: String,
    pub status: EmailStatus,
    pub sender_origin_ip: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl EmailLog {
    pub fn is_opened(&self) -> bool {
        self.status == EmailStatus::Opened
    }
}

/// Validated input for registering a sent email.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmailLog {
    pub tracking_id: TrackingId,
    pub recipient_address: String,
    pub group_label: String,
    pub sender_origin_ip: Option<String>,
}

impl NewEmailLog {
    /// Build the initial record: always `Sent`, never opened.
    pub fn into_log(self, sent_at: DateTime<Utc>) -> EmailLog {
        EmailLog {
            tracking_id: self.tracking_id,
            recipient_address: self.recipient_address,
            group_label: self.group_label,
            status: EmailStatus::Sent,
            sender_origin_ip: self.sender_origin_ip,
            sent_at,
            opened_at: None,
        }
    }
}

// =============================================================================
// Open Event
// =============================================================================

/// State transition pushed to real-time observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEvent {
    pub tracking_id: TrackingId,
    pub status: EmailStatus,
}

impl OpenEvent {
    pub fn opened(tracking_id: TrackingId) -> Self {
        Self {
            tracking_id,
            status: EmailStatus::Opened,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_id_trims() {
        let id = TrackingId::parse("  E1 ").unwrap();
        assert_eq!(id.as_str(), "E1");
    }

    #[test]
    fn test_tracking_id_rejects_malformed() {
        assert_eq!(TrackingId::parse("   "), Err(TrackingIdError::Empty));
        assert_eq!(
            TrackingId::parse(&"x".repeat(MAX_TRACKING_ID_LEN + 1)),
            Err(TrackingIdError::TooLong)
        );
        assert_eq!(
            TrackingId::parse("ab\u{0}cd"),
            Err(TrackingIdError::ControlCharacter)
        );
    }

    #[test]
    fn test_status_parse_case_insensitive() {
        assert_eq!("opened".parse::<EmailStatus>(), Ok(EmailStatus::Opened));
        assert_eq!("SENT".parse::<EmailStatus>(), Ok(EmailStatus::Sent));
        assert!("bounced".parse::<EmailStatus>().is_err());
    }

    #[test]
    fn test_new_log_starts_sent() {
        let log = NewEmailLog {
            tracking_id: TrackingId::parse("E1").unwrap(),
            recipient_address: "a@x.com".to_string(),
            group_label: "sales".to_string(),
            sender_origin_ip: Some("1.2.3.4".to_string()),
        }
        .into_log(Utc::now());

        assert_eq!(log.status, EmailStatus::Sent);
        assert!(log.opened_at.is_none());
        assert!(!log.is_opened());
    }

    #[test]
    fn test_open_event_wire_format() {
        let event = OpenEvent::opened(TrackingId::parse("E1").unwrap());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "trackingId": "E1", "status": "Opened" })
        );
    }
}
