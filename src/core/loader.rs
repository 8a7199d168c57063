//! Source orchestration: bootstrap from every registered source, then keep
//! one watch loop per source feeding the store.

use crate::core::options::BootstrapMode;
use crate::core::shutdown::ShutdownSignal;
use crate::core::store::{ConfigStore, UpdateOrigin, UpdateOutcome};
use crate::error::{ConfigError, Result};
use crate::sources::Source;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of [`ConfigStore::bootstrap`].
#[derive(Debug, Default)]
pub struct BootstrapReport {
    /// Sources whose value was accepted, with the version it received.
    pub applied: Vec<(String, u64)>,
    /// Sources that failed, in registration order.
    ///
    /// Errors are [`ConfigError::SourceLoadFailed`] when the value could not be
    /// obtained and [`ConfigError::ValidationRejected`] (or
    /// [`ConfigError::ValidationTimeout`]) when it was obtained but not accepted.
    pub failures: Vec<(String, ConfigError)>,
}

impl BootstrapReport {
    /// Whether every source was applied.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// How a watch loop ended.
#[derive(Debug)]
pub enum WatchExit {
    /// The source's change feed ended.
    Closed,
    /// The shutdown signal fired.
    Cancelled,
    /// The feed could not be opened or yielded an error.
    Failed(ConfigError),
}

impl WatchExit {
    /// Whether the loop ended because of an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Handles to running watch loops, one per source.
#[derive(Debug)]
pub struct WatchGroup {
    tasks: Vec<(String, JoinHandle<WatchExit>)>,
}

impl WatchGroup {
    /// Number of watch loops in the group.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the group has no loops.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids of the watched sources.
    pub fn source_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Whether every loop has finished.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|(_, task)| task.is_finished())
    }

    /// Abort every loop without waiting. Prefer triggering the shutdown.
    pub fn abort(&self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
    }

    /// Wait for every loop to end and collect how each one ended.
    pub async fn join(self) -> Vec<(String, WatchExit)> {
        let mut exits = Vec::with_capacity(self.tasks.len());
        for (id, task) in self.tasks {
            let exit = match task.await {
                Ok(exit) => exit,
                Err(e) if e.is_cancelled() => WatchExit::Cancelled,
                Err(e) => WatchExit::Failed(ConfigError::source_watch(
                    &id,
                    ConfigError::WatchError(format!("watch task panicked: {}", e)),
                )),
            };
            exits.push((id, exit));
        }
        exits
    }
}

impl<T: Send + Sync + 'static> ConfigStore<T> {
    /// Load every registered source once, in registration order, proposing
    /// each value using the configured [`BootstrapMode`].
    ///
    /// Values pass through the same validation as any other proposal; with
    /// several sources the last accepted value wins.
    ///
    /// # Errors
    ///
    /// Only in [`BootstrapMode::FailFast`]: the first failure, after which no
    /// further source is loaded.
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        self.bootstrap_with(self.inner.bootstrap_mode).await
    }

    /// Like [`bootstrap`](Self::bootstrap) with an explicit mode.
    ///
    /// # Errors
    ///
    /// See [`bootstrap`](Self::bootstrap).
    pub async fn bootstrap_with(&self, mode: BootstrapMode) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();

        for source in self.sources_snapshot() {
            let id = source.id();
            let failure = match self.bootstrap_source(source.as_ref(), &id).await {
                Ok(version) => {
                    info!(source = %id, version, "bootstrapped configuration from source");
                    report.applied.push((id, version));
                    continue;
                }
                Err(e) => e,
            };

            warn!(source = %id, error = %failure, "source bootstrap failed");
            match mode {
                BootstrapMode::FailFast => return Err(failure),
                BootstrapMode::ContinueOnError => report.failures.push((id, failure)),
            }
        }

        Ok(report)
    }

    async fn bootstrap_source(&self, source: &dyn Source<T>, id: &str) -> Result<u64> {
        let value = match source.load().await {
            Ok(value) => value,
            Err(e) => {
                #[cfg(feature = "metrics")]
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_load_failure(id);
                }
                return Err(ConfigError::source_load(id, e));
            }
        };

        self.apply_async(value, UpdateOrigin::source(id))
            .await?
            .into_result()
    }

    /// Start one watch loop per registered source.
    ///
    /// Each loop proposes every value its source emits. Rejected values are
    /// logged and counted, and the loop keeps going. A loop ends when its feed
    /// closes, when the feed fails, or when `signal` fires.
    ///
    /// Must be called within a tokio runtime.
    pub fn watch_sources(&self, signal: ShutdownSignal) -> WatchGroup {
        let tasks = self
            .sources_snapshot()
            .into_iter()
            .map(|source| {
                let id = source.id();
                let store = self.clone();
                let signal = signal.clone();
                let task = tokio::spawn(async move { store.run_watch_loop(source, signal).await });
                (id, task)
            })
            .collect();

        WatchGroup { tasks }
    }

    /// Bootstrap, then start watching.
    ///
    /// # Errors
    ///
    /// Returns the bootstrap error in [`BootstrapMode::FailFast`]; no watch
    /// loop is started in that case.
    pub async fn start(&self, signal: ShutdownSignal) -> Result<(BootstrapReport, WatchGroup)> {
        let report = self.bootstrap().await?;
        Ok((report, self.watch_sources(signal)))
    }

    async fn run_watch_loop(&self, source: Arc<dyn Source<T>>, signal: ShutdownSignal) -> WatchExit {
        let id = source.id();
        let origin = UpdateOrigin::source(&id);

        let mut stream = tokio::select! {
            biased;
            _ = signal.cancelled() => {
                info!(source = %id, "watch cancelled before start");
                return WatchExit::Cancelled;
            }
            opened = source.watch() => match opened {
                Ok(stream) => stream,
                Err(e) => return self.watch_failed(&id, e),
            },
        };

        debug!(source = %id, "watching source");

        loop {
            let next = tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    info!(source = %id, "watch cancelled");
                    return WatchExit::Cancelled;
                }
                next = stream.next() => next,
            };

            let value = match next {
                None => {
                    info!(source = %id, "source feed closed");
                    return WatchExit::Closed;
                }
                Some(Err(e)) => return self.watch_failed(&id, e),
                Some(Ok(value)) => value,
            };

            let outcome = tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    info!(source = %id, "watch cancelled during validation");
                    return WatchExit::Cancelled;
                }
                outcome = self.apply_async(value, origin.clone()) => outcome,
            };

            match outcome {
                Ok(UpdateOutcome::Accepted { version }) => {
                    debug!(source = %id, version, "applied update from source");
                }
                Ok(UpdateOutcome::Rejected(reason)) => self.update_not_applied(&id, &reason),
                Err(e) => self.update_not_applied(&id, &e),
            }
        }
    }

    fn watch_failed(&self, id: &str, cause: ConfigError) -> WatchExit {
        error!(source = %id, error = %cause, "watch loop failed");

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_watch_failure(id);
        }

        WatchExit::Failed(ConfigError::source_watch(id, cause))
    }

    fn update_not_applied(&self, id: &str, cause: &dyn std::fmt::Display) {
        warn!(source = %id, error = %cause, "source update not applied");

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_update_error(id);
        }
    }
}
