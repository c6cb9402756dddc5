//! Real-time notification of open events.
//!
//! Observers (dashboard WebSocket clients) register with the [`Notifier`]
//! while connected. Delivery is fire-and-forget: there is no queue for
//! disconnected observers and no replay on reconnect.

pub mod fanout;

pub use fanout::{BroadcastReport, Notifier, ObserverId, Subscription};
