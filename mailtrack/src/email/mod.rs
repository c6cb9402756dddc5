//! Email log data model.
//!
//! A record is created in the `Sent` state when an email goes out and moves
//! to `Opened` at most once, when its tracking pixel is fetched.

pub mod types;

pub use types::{
    EmailLog, EmailStatus, NewEmailLog, OpenEvent, TrackingId, TrackingIdError,
    MAX_TRACKING_ID_LEN,
};
