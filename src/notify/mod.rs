//! Change delivery: subscriber mailboxes and file watching.
//!
//! Subscribers receive accepted configuration values through single-slot
//! mailboxes that coalesce instead of queueing. File watching feeds
//! file-backed sources.

mod mailbox;
pub mod subscriber;

#[cfg(feature = "file-watch")]
pub mod watcher;

pub use subscriber::{BroadcastReport, SubscriberRegistry, Subscription, Unsubscriber};

#[cfg(feature = "file-watch")]
pub use watcher::FileWatcher;
