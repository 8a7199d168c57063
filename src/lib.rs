//! # hotstore
//!
//! A typed, in-process store for live-reloadable configuration.
//!
//! ## Overview
//!
//! `hotstore` holds a single configuration value of any type `T` and lets it
//! be replaced at runtime:
//! - Lock-free reads using `arc-swap`; readers never see a partial update
//! - Validated updates with a strictly increasing version per accepted value
//! - Subscribers that receive every update they keep up with, and are dropped
//!   rather than allowed to slow down writers
//! - Bootstrap and watch orchestration over any number of sources (files,
//!   environment variables, in-process channels, or your own)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hotstore::prelude::*;
//! use hotstore::sources::{EnvSource, FileSource};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize, Clone, Default)]
//! struct AppConfig {
//!     port: u16,
//! }
//!
//! # async fn example() -> hotstore::error::Result<()> {
//! let store = ConfigStore::builder()
//!     .with_validator(|_old: Option<&AppConfig>, new: &AppConfig| {
//!         if new.port == 0 {
//!             return Err(ValidationError::invalid_field("port", "must be non-zero"));
//!         }
//!         Ok(())
//!     })
//!     .with_source(FileSource::<AppConfig>::new("config/default.yaml"))
//!     .with_source(EnvSource::<AppConfig>::new("APP", "__"))
//!     .build();
//!
//! let shutdown = Shutdown::new();
//! let (report, watchers) = store.start(shutdown.signal()).await?;
//! println!("bootstrapped from {} source(s)", report.applied.len());
//!
//! // Lock-free reads
//! println!("Server port: {}", store.get().port);
//!
//! // React to changes
//! let mut updates = store.subscribe();
//! while let Some(snapshot) = updates.recv().await {
//!     println!("version {}: port {}", snapshot.version(), snapshot.port);
//! }
//!
//! shutdown.trigger();
//! watchers.join().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `file-watch` (default): watch [`FileSource`](sources::FileSource) files
//!   for changes with `notify`
//! - `history`: bounded version history and revert
//! - `gradual-rollout`: strategy-gated proposals
//! - `metrics`: OpenTelemetry metrics

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod notify;
pub mod sources;

#[cfg(any(feature = "history", feature = "gradual-rollout"))]
pub mod features;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        BootstrapMode, BootstrapReport, ConfigSnapshot, ConfigStore, ConfigStoreBuilder,
        ConfigSubscription, InvalidPolicy, Shutdown, ShutdownSignal, UpdateOrigin, UpdateOutcome,
        Validate, Validator, WatchExit, WatchGroup,
    };
    pub use crate::error::{ConfigError, Result, ValidationError};
    pub use crate::sources::Source;
}
