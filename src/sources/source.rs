//! Configuration source trait.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of complete replacement values produced by a [`Source`].
///
/// An `Err` item is terminal: the watch loop reading the stream reports it
/// and stops.
pub type SourceStream<T> = BoxStream<'static, Result<T>>;

/// A feed that produces an initial configuration value and later replacements.
///
/// Every value is a complete `T`, never a delta. Sources do not merge with
/// each other: whichever value reaches the store last wins.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use futures::StreamExt;
/// use hotstore::error::Result;
/// use hotstore::sources::{Source, SourceStream};
///
/// struct Fixed(u16);
///
/// #[async_trait]
/// impl Source<u16> for Fixed {
///     fn id(&self) -> String {
///         "fixed".to_string()
///     }
///
///     async fn load(&self) -> Result<u16> {
///         Ok(self.0)
///     }
///
///     async fn watch(&self) -> Result<SourceStream<u16>> {
///         Ok(futures::stream::empty().boxed())
///     }
/// }
/// ```
#[async_trait]
pub trait Source<T>: Send + Sync {
    /// Human-readable identifier used in errors and logs.
    fn id(&self) -> String;

    /// Fetch the current value once. Called during bootstrap.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be obtained or decoded.
    async fn load(&self) -> Result<T>;

    /// Open the change feed.
    ///
    /// The stream ends when the source closes. Dropping it must release
    /// whatever the source holds for watching.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed cannot be opened.
    async fn watch(&self) -> Result<SourceStream<T>>;
}
