//! Mailtrack - email open tracking.
//!
//! Records sent emails, serves a tracking pixel whose fetch marks an email
//! as opened, and pushes open events to connected dashboards.
//!
//! ## Architecture
//!
//! ```text
//! POST /emails ──────────────────────────→ RecordStore
//! GET /track/{id} → OpenDetector ─(CAS)──→ RecordStore
//!                        │
//!                        └─ TransitionApplied → Notifier → WebSocket observers
//! ```

pub mod config;
pub mod email;
pub mod error;
pub mod notify;
pub mod store;
pub mod track;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use email::{EmailLog, EmailStatus, NewEmailLog, OpenEvent, TrackingId};
pub use error::{ApiError, StoreError, StoreResult};
pub use notify::Notifier;
pub use store::{ConditionalUpdate, LogFilter, MemoryStore, PostgresStore, RecordStore};
pub use track::{track_open, NoTransitionReason, OpenDetector, OpenOutcome, TrackOutcome};
pub use web::{router, AppState};
