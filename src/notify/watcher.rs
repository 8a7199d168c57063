//! Debounced file watching for file-backed sources.

use crate::error::{ConfigError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Watches files and emits a debounced change signal.
///
/// The parent directory of each watched file is monitored, so editors that
/// replace a file through a rename are still noticed. Events for other files
/// in the same directory are ignored.
///
/// Dropping the watcher stops the underlying OS watch and closes the signal
/// channel.
///
/// # Examples
///
/// ```rust,no_run
/// use hotstore::notify::FileWatcher;
/// use std::time::Duration;
///
/// # async fn example() -> hotstore::error::Result<()> {
/// let (watcher, mut rx) = FileWatcher::new(Duration::from_millis(250))?;
/// watcher.watch("/etc/app/config.yaml")?;
///
/// while let Some(()) = rx.recv().await {
///     println!("config file changed");
/// }
/// # Ok(())
/// # }
/// ```
pub struct FileWatcher {
    watcher: Mutex<RecommendedWatcher>,
    debounce_duration: Duration,
    watched_files: Arc<Mutex<Vec<PathBuf>>>,
}

impl FileWatcher {
    /// Create a new watcher.
    ///
    /// Returns the watcher and a receiver that yields `()` at most once per
    /// `debounce_duration` while watched files keep changing. The trailing
    /// change of a burst is always signalled.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS watcher cannot be created.
    pub fn new(debounce_duration: Duration) -> Result<(Self, mpsc::Receiver<()>)> {
        let (tx, rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

        let watched_files: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
        let filter = Arc::clone(&watched_files);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if !matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                return;
            }
            let files = filter.lock();
            if event.paths.iter().any(|p| files.iter().any(|f| f == p)) {
                let _ = event_tx.send(event);
            }
        })
        .map_err(|e| ConfigError::WatchError(format!("Failed to create file watcher: {}", e)))?;

        tokio::spawn(async move {
            let mut last_signal: Option<Instant> = None;
            let mut pending = false;

            loop {
                let deadline = match (pending, last_signal) {
                    (true, Some(at)) => Some(at + debounce_duration),
                    _ => None,
                };

                tokio::select! {
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        trace!(paths = ?event.paths, "file event");
                        let now = Instant::now();
                        let ready = last_signal
                            .map(|at| now.duration_since(at) >= debounce_duration)
                            .unwrap_or(true);
                        if ready {
                            if tx.send(()).await.is_err() {
                                break;
                            }
                            last_signal = Some(now);
                            pending = false;
                        } else {
                            pending = true;
                        }
                    }
                    _ = sleep_until_opt(deadline), if deadline.is_some() => {
                        if tx.send(()).await.is_err() {
                            break;
                        }
                        last_signal = Some(Instant::now());
                        pending = false;
                    }
                }
            }
            debug!("file watcher stopped");
        });

        Ok((
            Self {
                watcher: Mutex::new(watcher),
                debounce_duration,
                watched_files,
            },
            rx,
        ))
    }

    /// Start watching a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be resolved or watched.
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<()> {
        let canonical_path = path
            .as_ref()
            .canonicalize()
            .map_err(|e| ConfigError::WatchError(format!("Failed to resolve path: {}", e)))?;
        let parent = canonical_path
            .parent()
            .ok_or_else(|| {
                ConfigError::WatchError(format!(
                    "Path has no parent directory: {}",
                    canonical_path.display()
                ))
            })?
            .to_path_buf();

        self.watcher
            .lock()
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::WatchError(format!("Failed to watch path: {}", e)))?;

        let mut files = self.watched_files.lock();
        if !files.contains(&canonical_path) {
            debug!(path = %canonical_path.display(), "watching file");
            files.push(canonical_path);
        }

        Ok(())
    }

    /// Get the debounce duration for this watcher.
    pub fn debounce_duration(&self) -> Duration {
        self.debounce_duration
    }

    /// Get a list of currently watched files.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        self.watched_files.lock().clone()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
