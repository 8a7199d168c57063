//! Store options and the fluent builder that produces them.

use crate::core::ConfigStore;
use crate::core::validation::{
    AsyncValidator, SelfValidator, Validate, ValidationOptions, Validator,
};
use crate::error::ValidationError;
use crate::sources::Source;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::StoreMetrics;

/// What happens to a candidate that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidPolicy {
    /// Keep the current value and report the rejection.
    #[default]
    Reject,
    /// Publish the candidate anyway; validation is advisory and only logged.
    Publish,
}

/// How [`ConfigStore::bootstrap`] treats a failing source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Try every source and report the failures.
    #[default]
    ContinueOnError,
    /// Stop at the first failing source.
    FailFast,
}

/// Explicit configuration for a [`ConfigStore`].
///
/// Usually assembled through [`ConfigStore::builder`].
pub struct StoreOptions<T> {
    /// Synchronous validator run on every candidate.
    pub validator: Option<Arc<dyn Validator<T>>>,
    /// Async validator run first by the async proposal paths.
    pub async_validator: Option<Arc<dyn AsyncValidator<T>>>,
    /// Timeout and retry settings for `async_validator`.
    pub validation_options: ValidationOptions,
    /// Behaviour on validation failure.
    pub invalid_policy: InvalidPolicy,
    /// Behaviour of `bootstrap()` when a source fails.
    pub bootstrap_mode: BootstrapMode,
    /// Sources registered up front, in order.
    pub sources: Vec<Arc<dyn Source<T>>>,
    /// Number of accepted snapshots to keep for revert, if any.
    #[cfg(feature = "history")]
    pub history_capacity: Option<usize>,
    /// Metrics recorder.
    #[cfg(feature = "metrics")]
    pub metrics: Option<StoreMetrics>,
}

impl<T> Default for StoreOptions<T> {
    fn default() -> Self {
        Self {
            validator: None,
            async_validator: None,
            validation_options: ValidationOptions::default(),
            invalid_policy: InvalidPolicy::default(),
            bootstrap_mode: BootstrapMode::default(),
            sources: Vec::new(),
            #[cfg(feature = "history")]
            history_capacity: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }
}

impl<T> fmt::Debug for StoreOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("validator", &self.validator.is_some())
            .field("async_validator", &self.async_validator.is_some())
            .field("validation_options", &self.validation_options)
            .field("invalid_policy", &self.invalid_policy)
            .field("bootstrap_mode", &self.bootstrap_mode)
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`ConfigStore`].
///
/// # Examples
///
/// ```rust
/// use hotstore::prelude::*;
///
/// #[derive(Debug, Clone, Default)]
/// struct Limits {
///     max_connections: u32,
/// }
///
/// let store = ConfigStore::builder()
///     .with_validator(|_old: Option<&Limits>, new: &Limits| {
///         if new.max_connections == 0 {
///             return Err(ValidationError::custom("max_connections must be non-zero"));
///         }
///         Ok(())
///     })
///     .with_bootstrap_mode(BootstrapMode::FailFast)
///     .build();
///
/// assert_eq!(store.version(), 0);
/// ```
pub struct ConfigStoreBuilder<T> {
    options: StoreOptions<T>,
}

impl<T: Send + Sync + 'static> ConfigStore<T> {
    /// Create a builder for a store.
    pub fn builder() -> ConfigStoreBuilder<T> {
        ConfigStoreBuilder::new()
    }
}

impl<T: Send + Sync + 'static> ConfigStoreBuilder<T> {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            options: StoreOptions::default(),
        }
    }

    /// Validate candidates with a closure receiving the current value (if
    /// any) and the candidate.
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(Option<&T>, &T) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.with_shared_validator(Arc::new(validator))
    }

    /// Validate candidates with an existing [`Validator`].
    pub fn with_shared_validator(mut self, validator: Arc<dyn Validator<T>>) -> Self {
        self.options.validator = Some(validator);
        self
    }

    /// Validate candidates with their own [`Validate`] implementation.
    pub fn with_self_validation(self) -> Self
    where
        T: Validate,
    {
        self.with_shared_validator(Arc::new(SelfValidator))
    }

    /// Run an async validator before the synchronous one on async proposals.
    pub fn with_async_validator<V>(mut self, validator: V) -> Self
    where
        V: AsyncValidator<T> + 'static,
    {
        self.options.async_validator = Some(Arc::new(validator));
        self
    }

    /// Set timeout and retry behaviour for the async validator.
    pub fn with_validation_options(mut self, options: ValidationOptions) -> Self {
        self.options.validation_options = options;
        self
    }

    /// `true` rejects invalid candidates, `false` publishes them anyway.
    pub fn with_rollback(self, enabled: bool) -> Self {
        self.with_invalid_policy(if enabled {
            InvalidPolicy::Reject
        } else {
            InvalidPolicy::Publish
        })
    }

    /// Set the invalid-candidate policy.
    pub fn with_invalid_policy(mut self, policy: InvalidPolicy) -> Self {
        self.options.invalid_policy = policy;
        self
    }

    /// Set the bootstrap failure policy.
    pub fn with_bootstrap_mode(mut self, mode: BootstrapMode) -> Self {
        self.options.bootstrap_mode = mode;
        self
    }

    /// Register a source.
    pub fn with_source<S>(mut self, source: S) -> Self
    where
        S: Source<T> + 'static,
    {
        self.options.sources.push(Arc::new(source));
        self
    }

    /// Keep the last `capacity` accepted snapshots for revert.
    #[cfg(feature = "history")]
    pub fn with_history(mut self, capacity: usize) -> Self {
        self.options.history_capacity = Some(capacity);
        self
    }

    /// Record store metrics through the given meter.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.options.metrics = Some(StoreMetrics::new(meter));
        self
    }

    /// Finish building and return the options without creating a store.
    pub fn into_options(self) -> StoreOptions<T> {
        self.options
    }

    /// Build the store.
    pub fn build(self) -> ConfigStore<T> {
        ConfigStore::with_options(self.options)
    }
}

impl<T: Send + Sync + 'static> Default for ConfigStoreBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ChannelSource;

    #[derive(Debug, Clone, Default)]
    struct Ports {
        port: u16,
    }

    impl Validate for Ports {
        fn validate(&self) -> Result<(), ValidationError> {
            if self.port == 0 {
                return Err(ValidationError::invalid_field("port", "must be non-zero"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_defaults() {
        let options = StoreOptions::<Ports>::default();
        assert!(options.validator.is_none());
        assert_eq!(options.invalid_policy, InvalidPolicy::Reject);
        assert_eq!(options.bootstrap_mode, BootstrapMode::ContinueOnError);
        assert!(options.sources.is_empty());
    }

    #[test]
    fn test_with_rollback_maps_to_policy() {
        let on = ConfigStore::<Ports>::builder().with_rollback(true).into_options();
        assert_eq!(on.invalid_policy, InvalidPolicy::Reject);

        let off = ConfigStore::<Ports>::builder().with_rollback(false).into_options();
        assert_eq!(off.invalid_policy, InvalidPolicy::Publish);
    }

    #[test]
    fn test_self_validation() {
        let store = ConfigStore::<Ports>::builder().with_self_validation().build();
        assert!(store.propose_update(Ports { port: 0 }).is_err());
        assert_eq!(store.propose_update(Ports { port: 80 }).unwrap(), 1);
    }

    #[test]
    fn test_with_source_registers_in_order() {
        let (first, _f1) = ChannelSource::new("first", Some(Ports { port: 1 }));
        let (second, _f2) = ChannelSource::new("second", Some(Ports { port: 2 }));

        let store = ConfigStore::builder()
            .with_source(first)
            .with_source(second)
            .build();

        assert_eq!(store.source_ids(), vec!["first", "second"]);
    }
}
