//! Core store types: the store, its options, validation, source
//! orchestration and cancellation.

mod loader;
mod options;
mod shutdown;
mod store;
mod validation;

pub use loader::{BootstrapReport, WatchExit, WatchGroup};
pub use options::{BootstrapMode, ConfigStoreBuilder, InvalidPolicy, StoreOptions};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use store::{
    ConfigSnapshot, ConfigStore, ConfigSubscription, ConfigUnsubscriber, UpdateOrigin,
    UpdateOutcome,
};
pub use validation::{AsyncValidator, Validate, ValidationOptions, Validator};
