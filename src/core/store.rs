//! The configuration store: lock-free reads, validated atomic updates, and
//! coalescing subscribers.

use crate::core::options::{BootstrapMode, InvalidPolicy, StoreOptions};
use crate::core::validation::{
    AsyncValidator, ValidationOptions, Validator, run_async_validator,
};
use crate::error::{ConfigError, Result, ValidationError};
use crate::notify::{SubscriberRegistry, Subscription, Unsubscriber};
use crate::sources::Source;
use crate::core::shutdown::ShutdownSignal;
use arc_swap::ArcSwapOption;
use futures::Stream;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(feature = "history")]
use crate::features::history::ConfigHistory;

#[cfg(feature = "metrics")]
use crate::metrics::StoreMetrics;

/// Where an update came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// A direct `propose*` call.
    Manual,
    /// A registered source, by id.
    Source(Arc<str>),
    /// A revert to the value recorded at the given version.
    Revert(u64),
}

impl UpdateOrigin {
    pub(crate) fn source(id: &str) -> Self {
        Self::Source(Arc::from(id))
    }

    /// Short label suitable for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Source(_) => "source",
            Self::Revert(_) => "revert",
        }
    }
}

impl fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Source(id) => write!(f, "source:{}", id),
            Self::Revert(version) => write!(f, "revert:{}", version),
        }
    }
}

/// An accepted configuration value together with its version.
///
/// Snapshots are immutable; cloning one is cheap.
pub struct ConfigSnapshot<T> {
    version: u64,
    value: Arc<T>,
    origin: UpdateOrigin,
}

impl<T> ConfigSnapshot<T> {
    /// Position of this value in the store's sequence of accepted updates.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Shared handle to the value.
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// Where the value came from.
    pub fn origin(&self) -> &UpdateOrigin {
        &self.origin
    }
}

impl<T> Clone for ConfigSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            value: Arc::clone(&self.value),
            origin: self.origin.clone(),
        }
    }
}

impl<T> Deref for ConfigSnapshot<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for ConfigSnapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSnapshot")
            .field("version", &self.version)
            .field("value", &self.value)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Result of proposing a candidate value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The candidate was published under this version.
    Accepted {
        /// Version assigned to the candidate
        version: u64,
    },
    /// The candidate failed validation and nothing changed.
    Rejected(ValidationError),
}

impl UpdateOutcome {
    /// Convert into a `Result`, mapping rejection to
    /// [`ConfigError::ValidationRejected`].
    pub fn into_result(self) -> Result<u64> {
        match self {
            Self::Accepted { version } => Ok(version),
            Self::Rejected(reason) => Err(ConfigError::ValidationRejected(reason)),
        }
    }

    /// Whether the candidate was published.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Subscription handle yielded by [`ConfigStore::subscribe`].
pub type ConfigSubscription<T> = Subscription<ConfigSnapshot<T>>;

/// Removal handle for a [`ConfigSubscription`].
pub type ConfigUnsubscriber<T> = Unsubscriber<ConfigSnapshot<T>>;

pub(crate) struct StoreInner<T: Send + Sync + 'static> {
    pub(crate) current: ArcSwapOption<ConfigSnapshot<T>>,
    /// Serializes version assignment, publication and broadcast.
    write_lock: Mutex<()>,
    subscribers: SubscriberRegistry<ConfigSnapshot<T>>,
    validator: Option<Arc<dyn Validator<T>>>,
    async_validator: Option<Arc<dyn AsyncValidator<T>>>,
    validation_options: ValidationOptions,
    invalid_policy: InvalidPolicy,
    pub(crate) bootstrap_mode: BootstrapMode,
    pub(crate) sources: Mutex<Vec<Arc<dyn Source<T>>>>,
    #[cfg(feature = "history")]
    pub(crate) history: Option<ConfigHistory<T>>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<StoreMetrics>,
}

/// A live-reloadable configuration value.
///
/// Reads are lock-free through `arc-swap`. Every accepted update gets the
/// next version number, becomes visible to [`get`](Self::get), and is then
/// offered to each subscriber's single-slot channel. Subscribers that have
/// not consumed the previous value are dropped instead of slowing the writer.
///
/// Cloning a store yields another handle to the same state.
///
/// # Examples
///
/// ```rust
/// use hotstore::prelude::*;
///
/// #[derive(Debug, Clone, Default)]
/// struct ServerConfig {
///     port: u16,
/// }
///
/// let store = ConfigStore::builder()
///     .with_validator(|_old: Option<&ServerConfig>, new: &ServerConfig| {
///         if new.port < 1024 {
///             return Err(ValidationError::invalid_field("port", "must be >= 1024"));
///         }
///         Ok(())
///     })
///     .with_rollback(true)
///     .build();
///
/// assert_eq!(store.propose_update(ServerConfig { port: 8080 }).unwrap(), 1);
/// assert!(store.propose_update(ServerConfig { port: 80 }).is_err());
/// assert_eq!(store.get().port, 8080);
/// assert_eq!(store.version(), 1);
/// ```
pub struct ConfigStore<T: Send + Sync + 'static> {
    pub(crate) inner: Arc<StoreInner<T>>,
}

impl<T: Send + Sync + 'static> ConfigStore<T> {
    /// Create an empty store with default options.
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Create an empty store from explicit options.
    pub fn with_options(options: StoreOptions<T>) -> Self {
        let subscribers = SubscriberRegistry::new();

        #[cfg(feature = "metrics")]
        if let Some(metrics) = options.metrics.clone() {
            subscribers.on_change(move |count| metrics.update_subscriber_count(count));
        }

        Self {
            inner: Arc::new(StoreInner {
                current: ArcSwapOption::empty(),
                write_lock: Mutex::new(()),
                subscribers,
                validator: options.validator,
                async_validator: options.async_validator,
                validation_options: options.validation_options,
                invalid_policy: options.invalid_policy,
                bootstrap_mode: options.bootstrap_mode,
                sources: Mutex::new(options.sources),
                #[cfg(feature = "history")]
                history: options.history_capacity.map(ConfigHistory::new),
                #[cfg(feature = "metrics")]
                metrics: options.metrics,
            }),
        }
    }

    /// Get the current value, or `T::default()` before the first accepted update.
    ///
    /// Never blocks. A reader sees either the value before or after any given
    /// update, never a mix.
    pub fn get(&self) -> Arc<T>
    where
        T: Default,
    {
        self.inner
            .current
            .load_full()
            .map(|snapshot| Arc::clone(&snapshot.value))
            .unwrap_or_default()
    }

    /// Get the current value with its version, if any update was accepted.
    pub fn snapshot(&self) -> Option<ConfigSnapshot<T>> {
        self.inner
            .current
            .load_full()
            .map(|snapshot| (*snapshot).clone())
    }

    /// Number of accepted updates so far. Zero means unset.
    pub fn version(&self) -> u64 {
        Option::as_ref(&self.inner.current.load()).map_or(0, |snapshot| snapshot.version)
    }

    /// Propose a new value.
    ///
    /// The configured validator runs outside the write lock against the
    /// current value. If another update is published while it runs, the
    /// candidate is validated again against the newer value, so it is never
    /// published on top of a value it was not checked against. On success the candidate is published with the next version and
    /// broadcast to subscribers. On failure the [`InvalidPolicy`] decides:
    /// `Reject` leaves the store untouched, `Publish` publishes anyway.
    pub fn propose(&self, candidate: T) -> UpdateOutcome {
        self.apply(candidate, UpdateOrigin::Manual)
    }

    /// Like [`propose`](Self::propose), returning the new version.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationRejected`] if the candidate was rejected.
    pub fn propose_update(&self, candidate: T) -> Result<u64> {
        self.propose(candidate).into_result()
    }

    /// Propose a new value, running the async validator first when one is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationRejected`] if the candidate was
    /// rejected, or [`ConfigError::ValidationTimeout`] if async validation
    /// never completed. Neither changes the store.
    pub async fn propose_update_async(&self, candidate: T) -> Result<u64> {
        self.apply_async(candidate, UpdateOrigin::Manual)
            .await?
            .into_result()
    }

    pub(crate) fn apply(&self, candidate: T, origin: UpdateOrigin) -> UpdateOutcome {
        #[cfg(feature = "metrics")]
        let _timer = self.start_timer(&origin);

        if self.inner.validator.is_none() {
            return UpdateOutcome::Accepted {
                version: self.publish(candidate, origin),
            };
        }

        let mut candidate = candidate;
        loop {
            let old = self.inner.current.load_full();
            if let Err(reason) = self.check(old_value(&old), &candidate) {
                return self.handle_invalid(candidate, origin, reason);
            }
            match self.publish_if_current(candidate, origin.clone(), version_of(&old)) {
                Ok(version) => return UpdateOutcome::Accepted { version },
                Err(stale) => {
                    debug!(%origin, "configuration changed during validation, revalidating");
                    candidate = stale;
                }
            }
        }
    }

    pub(crate) async fn apply_async(
        &self,
        candidate: T,
        origin: UpdateOrigin,
    ) -> Result<UpdateOutcome> {
        let Some(validator) = &self.inner.async_validator else {
            return Ok(self.apply(candidate, origin));
        };

        #[cfg(feature = "metrics")]
        let _timer = self.start_timer(&origin);

        let mut candidate = candidate;
        loop {
            let old = self.inner.current.load_full();
            let verdict = run_async_validator(
                validator.as_ref(),
                old_value(&old),
                &candidate,
                &self.inner.validation_options,
            )
            .await?
            .and_then(|()| self.check(old_value(&old), &candidate));
            if let Err(reason) = verdict {
                return Ok(self.handle_invalid(candidate, origin, reason));
            }
            match self.publish_if_current(candidate, origin.clone(), version_of(&old)) {
                Ok(version) => return Ok(UpdateOutcome::Accepted { version }),
                Err(stale) => {
                    debug!(%origin, "configuration changed during validation, revalidating");
                    candidate = stale;
                }
            }
        }
    }

    fn check(&self, old: Option<&T>, candidate: &T) -> std::result::Result<(), ValidationError> {
        match &self.inner.validator {
            Some(validator) => validator.validate(old, candidate),
            None => Ok(()),
        }
    }

    #[cfg(feature = "metrics")]
    fn start_timer(&self, origin: &UpdateOrigin) -> Option<crate::metrics::UpdateTimer> {
        self.inner
            .metrics
            .as_ref()
            .map(|metrics| metrics.start_update(origin.label()))
    }

    fn handle_invalid(
        &self,
        candidate: T,
        origin: UpdateOrigin,
        reason: ValidationError,
    ) -> UpdateOutcome {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_validation_failure();
        }

        match self.inner.invalid_policy {
            InvalidPolicy::Reject => {
                warn!(%origin, error = %reason, "rejected configuration update");
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_rejected(origin.label());
                }
                UpdateOutcome::Rejected(reason)
            }
            InvalidPolicy::Publish => {
                warn!(%origin, error = %reason, "publishing configuration that failed validation");
                UpdateOutcome::Accepted {
                    version: self.publish(candidate, origin),
                }
            }
        }
    }

    fn publish(&self, candidate: T, origin: UpdateOrigin) -> u64 {
        let guard = self.inner.write_lock.lock();
        self.publish_locked(guard, candidate, origin)
    }

    /// Publish only if the current version is still `expected`, the one the
    /// candidate was validated against. Otherwise hand the candidate back.
    fn publish_if_current(
        &self,
        candidate: T,
        origin: UpdateOrigin,
        expected: u64,
    ) -> std::result::Result<u64, T> {
        let guard = self.inner.write_lock.lock();
        if self.version() != expected {
            return Err(candidate);
        }
        Ok(self.publish_locked(guard, candidate, origin))
    }

    /// Assign the next version, swap the value in and broadcast it.
    fn publish_locked(
        &self,
        guard: MutexGuard<'_, ()>,
        candidate: T,
        origin: UpdateOrigin,
    ) -> u64 {
        let version = self.version() + 1;
        let snapshot = ConfigSnapshot {
            version,
            value: Arc::new(candidate),
            origin,
        };

        self.inner.current.store(Some(Arc::new(snapshot.clone())));

        #[cfg(feature = "history")]
        if let Some(history) = &self.inner.history {
            history.record(&snapshot);
        }

        let report = self.inner.subscribers.broadcast(&snapshot);
        drop(guard);

        debug!(
            version,
            origin = %snapshot.origin,
            delivered = report.delivered,
            dropped_slow = report.dropped_slow,
            "published configuration"
        );

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_accepted(snapshot.origin.label(), version);
            metrics.record_broadcast(report);
        }

        version
    }

    /// Register a subscriber.
    ///
    /// If a value is current, it is the subscriber's first delivery. The
    /// subscriber then receives every accepted update it keeps up with; if it
    /// still holds an unread value when the next one is published, it is
    /// removed and its channel closed.
    pub fn subscribe(&self) -> ConfigSubscription<T> {
        // Holding the write lock keeps the seed ordered before any broadcast.
        let guard = self.inner.write_lock.lock();
        let seed = self.snapshot();
        let subscription = self.inner.subscribers.subscribe(seed);
        drop(guard);

        debug!(id = subscription.id(), "subscriber registered");
        subscription
    }

    /// Subscribe and yield updates as a stream until `signal` is cancelled.
    ///
    /// The stream starts with the current value, if any. It ends, and the
    /// subscriber is removed, when the signal fires or when the subscriber
    /// is dropped for falling behind.
    pub fn watch(
        &self,
        signal: ShutdownSignal,
    ) -> impl Stream<Item = ConfigSnapshot<T>> + Send + use<T> {
        self.subscribe().into_stream_until(signal)
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &ConfigUnsubscriber<T>) -> bool {
        handle.unsubscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.subscriber_count()
    }

    /// Register a source for [`bootstrap`](Self::bootstrap) and
    /// [`watch_sources`](Self::watch_sources).
    ///
    /// Sources are loaded in registration order. A source registered after
    /// its watch loops have been started is not watched until the next call.
    pub fn register_source<S>(&self, source: S)
    where
        S: Source<T> + 'static,
    {
        self.register_shared_source(Arc::new(source));
    }

    /// Register an already shared source.
    pub fn register_shared_source(&self, source: Arc<dyn Source<T>>) {
        debug!(source = %source.id(), "source registered");
        self.inner.sources.lock().push(source);
    }

    /// Ids of registered sources in registration order.
    pub fn source_ids(&self) -> Vec<String> {
        self.inner.sources.lock().iter().map(|s| s.id()).collect()
    }

    pub(crate) fn sources_snapshot(&self) -> Vec<Arc<dyn Source<T>>> {
        self.inner.sources.lock().clone()
    }
}

type Current<T> = Option<Arc<ConfigSnapshot<T>>>;

fn old_value<T>(current: &Current<T>) -> Option<&T> {
    current.as_deref().map(|snapshot| snapshot.value.as_ref())
}

fn version_of<T>(current: &Current<T>) -> u64 {
    current.as_ref().map_or(0, |snapshot| snapshot.version)
}

impl<T: Send + Sync + 'static> Default for ConfigStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct TestConfig {
        value: i32,
    }

    fn positive_only() -> ConfigStore<TestConfig> {
        ConfigStore::builder()
            .with_validator(|_old: Option<&TestConfig>, new: &TestConfig| {
                if new.value <= 0 {
                    return Err(ValidationError::invalid_field("value", "must be positive"));
                }
                Ok(())
            })
            .build()
    }

    #[test]
    fn test_unset_store_returns_default() {
        let store: ConfigStore<TestConfig> = ConfigStore::new();
        assert_eq!(*store.get(), TestConfig::default());
        assert_eq!(store.version(), 0);
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_accepted_updates_bump_version() {
        let store = ConfigStore::new();
        assert_eq!(store.propose_update(TestConfig { value: 1 }).unwrap(), 1);
        assert_eq!(store.propose_update(TestConfig { value: 2 }).unwrap(), 2);

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.version(), 2);
        assert_eq!((*snapshot).value, 2);
        assert_eq!(snapshot.origin(), &UpdateOrigin::Manual);
    }

    #[test]
    fn test_rejected_update_leaves_state() {
        let store = positive_only();
        store.propose_update(TestConfig { value: 5 }).unwrap();

        let outcome = store.propose(TestConfig { value: -1 });
        assert!(matches!(outcome, UpdateOutcome::Rejected(_)));
        assert_eq!(store.get().value, 5);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_publish_policy_accepts_invalid() {
        let store = ConfigStore::builder()
            .with_validator(|_old: Option<&TestConfig>, new: &TestConfig| {
                if new.value <= 0 {
                    return Err(ValidationError::custom("must be positive"));
                }
                Ok(())
            })
            .with_rollback(false)
            .build();

        assert_eq!(store.propose_update(TestConfig { value: -3 }).unwrap(), 1);
        assert_eq!(store.get().value, -3);
    }

    #[test]
    fn test_validator_sees_previous_value() {
        let store = ConfigStore::builder()
            .with_validator(|old: Option<&TestConfig>, new: &TestConfig| match old {
                Some(old) if new.value < old.value => {
                    Err(ValidationError::custom("value must not decrease"))
                }
                _ => Ok(()),
            })
            .build();

        store.propose_update(TestConfig { value: 10 }).unwrap();
        assert!(store.propose_update(TestConfig { value: 3 }).is_err());
        assert!(store.propose_update(TestConfig { value: 11 }).is_ok());
    }

    #[test]
    fn test_subscribe_seeds_current_value() {
        let store = ConfigStore::new();
        store.propose_update(TestConfig { value: 7 }).unwrap();

        let mut sub = store.subscribe();
        let first = sub.try_recv().unwrap();
        assert_eq!(first.version(), 1);
        assert_eq!((*first).value, 7);
    }

    #[test]
    fn test_subscribe_on_empty_store_has_no_seed() {
        let store: ConfigStore<TestConfig> = ConfigStore::new();
        let mut sub = store.subscribe();
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_unsubscribe_through_store() {
        let store: ConfigStore<TestConfig> = ConfigStore::new();
        let sub = store.subscribe();
        let handle = sub.unsubscriber();

        assert!(store.unsubscribe(&handle));
        assert!(!store.unsubscribe(&handle));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let store = ConfigStore::new();
        let other = store.clone();
        store.propose_update(TestConfig { value: 4 }).unwrap();
        assert_eq!(other.get().value, 4);
        assert_eq!(other.version(), 1);
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(UpdateOrigin::Manual.to_string(), "manual");
        assert_eq!(UpdateOrigin::source("file:a.yaml").to_string(), "source:file:a.yaml");
        assert_eq!(UpdateOrigin::Revert(3).label(), "revert");
    }
}
