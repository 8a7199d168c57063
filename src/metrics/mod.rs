//! Built-in metrics for store operations.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Accepted and rejected updates, by origin
//! - Validation failures
//! - Source load, watch and update failures
//! - Subscribers dropped for falling behind, and active subscribers
//! - Current version, update duration and configuration age
//!
//! # Examples
//!
//! ```rust,no_run
//! use hotstore::prelude::*;
//! use opentelemetry::global;
//!
//! # #[derive(Clone, Default)] struct AppConfig {}
//! let store: ConfigStore<AppConfig> = ConfigStore::builder()
//!     .with_metrics(global::meter("my-app"))
//!     .build();
//! ```

mod store_metrics;

pub use store_metrics::StoreMetrics;
pub(crate) use store_metrics::UpdateTimer;
