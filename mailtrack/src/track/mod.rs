//! Open tracking.
//!
//! ## Flow
//!
//! ```text
//! GET /track/{id} → OpenDetector → (TransitionApplied) → Notifier → Pixel
//! ```
//!
//! The pixel is returned no matter what happened along the way.

pub mod detector;
pub mod pixel;

use tracing::{debug, warn};

use crate::email::TrackingId;
use crate::notify::Notifier;

pub use detector::{normalize_ip, open_allowed, NoTransitionReason, OpenDetector, OpenOutcome};
pub use pixel::{Pixel, PIXEL_CONTENT_TYPE, PIXEL_PNG};

/// What a tracking request amounted to. Never visible to the mail client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Missing or malformed tracking id; detection was skipped.
    Malformed,
    /// Detection ran.
    Detected(OpenOutcome),
    /// The store failed or timed out; treated as no transition.
    Degraded,
}

/// Run detection for a tracking request and notify observers on a transition.
pub async fn track_open(
    detector: &OpenDetector,
    notifier: &Notifier,
    raw_tracking_id: Option<&str>,
    request_ip: Option<&str>,
) -> TrackOutcome {
    let tracking_id = match raw_tracking_id.map(TrackingId::parse) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            debug!(error = %e, "track_malformed_id");
            return TrackOutcome::Malformed;
        }
        None => {
            debug!("track_missing_id");
            return TrackOutcome::Malformed;
        }
    };

    match detector.detect(&tracking_id, request_ip).await {
        Ok(outcome) => {
            if let OpenOutcome::TransitionApplied(event) = &outcome {
                notifier.broadcast(event).await;
            }
            TrackOutcome::Detected(outcome)
        }
        Err(e) => {
            warn!(
                tracking_id = %tracking_id,
                error = %e,
                "track_store_degraded"
            );
            TrackOutcome::Degraded
        }
    }
}
