//! File-based configuration source.

use super::{Source, SourceStream};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use config::File;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "file-watch")]
use crate::notify::FileWatcher;

/// File-based configuration source.
///
/// Loads a complete `T` from a YAML, TOML, or JSON file, detecting the format
/// from the extension. With the `file-watch` feature, [`Source::watch`]
/// re-reads the file whenever it changes.
///
/// # Examples
///
/// ```rust,no_run
/// use hotstore::sources::FileSource;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct AppConfig {
///     port: u16,
/// }
///
/// let source = FileSource::<AppConfig>::new("config/app.yaml");
/// ```
pub struct FileSource<T> {
    path: PathBuf,
    debounce: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileSource<T> {
    /// Create a new file source with automatic format detection.
    ///
    /// The format is detected from the file extension:
    /// - `.yaml`, `.yml` -> YAML
    /// - `.toml` -> TOML
    /// - `.json` -> JSON
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: Duration::from_millis(250),
            _marker: PhantomData,
        }
    }

    /// Set the minimum time between reloads while the file keeps changing.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Path this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate that the file extension is supported.
    fn validate_extension(&self) -> Result<()> {
        let extension = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                ConfigError::LoadError(format!(
                    "Unable to determine file format for: {}",
                    self.path.display()
                ))
            })?;

        match extension {
            "yaml" | "yml" | "toml" | "json" => Ok(()),
            _ => Err(ConfigError::LoadError(format!(
                "Unsupported file extension: {}. Supported: .yaml, .yml, .toml, .json",
                extension
            ))),
        }
    }
}

impl<T: DeserializeOwned> FileSource<T> {
    /// Read and decode the file.
    fn read(&self) -> Result<T> {
        self.validate_extension()?;

        if !self.path.exists() {
            return Err(ConfigError::LoadError(format!(
                "Configuration file not found: {}",
                self.path.display()
            )));
        }

        let config = config::Config::builder()
            .add_source(File::from(self.path.clone()).required(true))
            .build()
            .map_err(|e| ConfigError::LoadError(format!("Failed to load file: {}", e)))?;

        config.try_deserialize::<T>().map_err(|e| {
            ConfigError::DeserializationError(format!("Failed to parse file: {}", e))
        })
    }
}

#[async_trait]
impl<T> Source<T> for FileSource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn id(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn load(&self) -> Result<T> {
        self.read()
    }

    #[cfg(feature = "file-watch")]
    async fn watch(&self) -> Result<SourceStream<T>> {
        let (watcher, rx) = FileWatcher::new(self.debounce)?;
        watcher.watch(&self.path)?;

        let reader = FileSource::<T>::new(self.path.clone());
        let stream = futures::stream::unfold(
            (watcher, rx, reader),
            |(watcher, mut rx, reader)| async move {
                loop {
                    rx.recv().await?;
                    match reader.read() {
                        Ok(value) => return Some((Ok(value), (watcher, rx, reader))),
                        Err(e) => {
                            // Half-written files are common mid-save; wait for the next change.
                            tracing::warn!(
                                path = %reader.path.display(),
                                error = %e,
                                "skipping unreadable configuration file"
                            );
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    #[cfg(not(feature = "file-watch"))]
    async fn watch(&self) -> Result<SourceStream<T>> {
        Err(ConfigError::WatchError(
            "FileSource watching requires the 'file-watch' feature".to_string(),
        ))
    }
}
