//! Bounded version history with revert.
//!
//! When enabled through
//! [`ConfigStoreBuilder::with_history`](crate::core::ConfigStoreBuilder::with_history),
//! every accepted snapshot is recorded. Reverting re-proposes an earlier value
//! as a new version, so versions keep increasing and subscribers see the
//! revert like any other update.

use crate::core::{ConfigSnapshot, ConfigStore, UpdateOrigin};
use crate::error::{ConfigError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

/// A recorded snapshot.
pub struct HistoryEntry<T> {
    /// Version the value was published under
    pub version: u64,
    /// When it was published
    pub timestamp: DateTime<Utc>,
    /// The value
    pub value: Arc<T>,
    /// Where it came from
    pub origin: UpdateOrigin,
}

impl<T> Clone for HistoryEntry<T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            timestamp: self.timestamp,
            value: Arc::clone(&self.value),
            origin: self.origin.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for HistoryEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("version", &self.version)
            .field("timestamp", &self.timestamp)
            .field("value", &self.value)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Configuration history tracker.
///
/// Keeps at most `max_size` entries; the oldest are dropped first.
pub(crate) struct ConfigHistory<T> {
    entries: Mutex<VecDeque<HistoryEntry<T>>>,
    max_size: usize,
}

impl<T> ConfigHistory<T> {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
        }
    }

    /// Called with the store's write lock held, so entries stay in version order.
    pub(crate) fn record(&self, snapshot: &ConfigSnapshot<T>) {
        if self.max_size == 0 {
            return;
        }

        let mut entries = self.entries.lock();
        entries.push_back(HistoryEntry {
            version: snapshot.version(),
            timestamp: Utc::now(),
            value: Arc::clone(snapshot.value()),
            origin: snapshot.origin().clone(),
        });

        while entries.len() > self.max_size {
            entries.pop_front();
        }
    }

    fn entries(&self) -> Vec<HistoryEntry<T>> {
        self.entries.lock().iter().cloned().collect()
    }

    fn steps_back(&self, steps: usize) -> Result<HistoryEntry<T>> {
        let entries = self.entries.lock();
        if entries.len() <= steps {
            return Err(ConfigError::InsufficientHistory {
                requested: steps,
                available: entries.len().saturating_sub(1),
            });
        }

        let index = entries.len() - steps - 1;
        entries
            .get(index)
            .cloned()
            .ok_or(ConfigError::InsufficientHistory {
                requested: steps,
                available: index,
            })
    }

    fn find(&self, version: u64) -> Result<HistoryEntry<T>> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.version == version)
            .cloned()
            .ok_or(ConfigError::VersionNotFound(version))
    }
}

impl<T: Send + Sync + 'static> ConfigStore<T> {
    /// Recorded snapshots, oldest first. Empty unless history is enabled.
    pub fn history(&self) -> Vec<HistoryEntry<T>> {
        self.inner
            .history
            .as_ref()
            .map(ConfigHistory::entries)
            .unwrap_or_default()
    }

    /// Re-publish the value from `steps` accepted updates ago (1 = previous).
    ///
    /// The value goes through validation again and receives a new version.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InsufficientHistory`] if history does not reach that far,
    /// or [`ConfigError::ValidationRejected`] if the old value is now rejected.
    pub fn revert_steps(&self, steps: usize) -> Result<u64>
    where
        T: Clone,
    {
        let entry = match &self.inner.history {
            Some(history) => history.steps_back(steps)?,
            None => {
                return Err(ConfigError::InsufficientHistory {
                    requested: steps,
                    available: 0,
                });
            }
        };
        self.revert_to(entry)
    }

    /// Re-publish the value recorded under `version`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::VersionNotFound`] if the version is not (or no longer)
    /// recorded, or [`ConfigError::ValidationRejected`] if the old value is
    /// now rejected.
    pub fn revert_to_version(&self, version: u64) -> Result<u64>
    where
        T: Clone,
    {
        let entry = self
            .inner
            .history
            .as_ref()
            .ok_or(ConfigError::VersionNotFound(version))?
            .find(version)?;
        self.revert_to(entry)
    }

    fn revert_to(&self, entry: HistoryEntry<T>) -> Result<u64>
    where
        T: Clone,
    {
        let new_version = self
            .apply((*entry.value).clone(), UpdateOrigin::Revert(entry.version))
            .into_result()?;

        info!(from = entry.version, to = new_version, "reverted configuration");

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_revert();
        }

        Ok(new_version)
    }
}
