//! Environment variable configuration source.

use super::{Source, SourceStream};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use config::Environment;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Environment variable configuration source.
///
/// Decodes a complete `T` from environment variables sharing a prefix, with a
/// separator for nested keys. The environment has no change feed, so the
/// watch stream ends immediately.
///
/// # Examples
///
/// ```rust
/// use hotstore::sources::EnvSource;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct AppConfig {
///     port: u16,
/// }
///
/// // APP_SERVER__PORT=8080 -> server.port = 8080
/// let source = EnvSource::<AppConfig>::new("APP", "__");
/// ```
pub struct EnvSource<T> {
    prefix: String,
    separator: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EnvSource<T> {
    /// Create a new environment variable source.
    ///
    /// # Arguments
    ///
    /// * `prefix` - Prefix for environment variables (e.g., "APP")
    /// * `separator` - Separator for nested keys (e.g., "__" for APP_DB__HOST)
    pub fn new(prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: separator.into(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> Source<T> for EnvSource<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn id(&self) -> String {
        format!("env:{}*", self.prefix)
    }

    async fn load(&self) -> Result<T> {
        let env_source = Environment::with_prefix(&self.prefix)
            .separator(&self.separator)
            .try_parsing(true);

        let config = config::Config::builder()
            .add_source(env_source)
            .build()
            .map_err(|e| {
                ConfigError::LoadError(format!("Failed to load environment variables: {}", e))
            })?;

        config.try_deserialize::<T>().map_err(|e| {
            ConfigError::DeserializationError(format!(
                "Failed to parse environment variables: {}",
                e
            ))
        })
    }

    async fn watch(&self) -> Result<SourceStream<T>> {
        Ok(futures::stream::empty().boxed())
    }
}
