//! In-process channel source.

use super::{Source, SourceStream};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Shared<T> {
    latest: Mutex<Option<T>>,
}

/// A source fed from inside the process.
///
/// Pairs with a [`ChannelFeed`] that publishes replacement values, which makes
/// it a stand-in for pub/sub style sources and a convenient test double.
/// `load` returns the most recently published value. The change feed can be
/// opened once; it ends when every feed handle is dropped or
/// [`ChannelFeed::close`] is called.
///
/// # Examples
///
/// ```rust
/// use hotstore::sources::ChannelSource;
///
/// let (source, feed) = ChannelSource::new("updates", Some(1u32));
/// feed.publish(2);
/// ```
pub struct ChannelSource<T> {
    id: String,
    shared: Arc<Shared<T>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
}

/// Publishing side of a [`ChannelSource`].
pub struct ChannelFeed<T> {
    shared: Arc<Shared<T>>,
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
}

impl<T> ChannelSource<T> {
    /// Create a source named `id`, optionally holding an initial value.
    pub fn new(id: impl Into<String>, initial: Option<T>) -> (Self, ChannelFeed<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            latest: Mutex::new(initial),
        });

        (
            Self {
                id: id.into(),
                shared: Arc::clone(&shared),
                receiver: Mutex::new(Some(rx)),
            },
            ChannelFeed {
                shared,
                sender: Mutex::new(Some(tx)),
            },
        )
    }
}

impl<T: Clone> ChannelFeed<T> {
    /// Publish a replacement value.
    ///
    /// Returns false if the feed was closed or the watch stream dropped.
    pub fn publish(&self, value: T) -> bool {
        *self.shared.latest.lock() = Some(value.clone());
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

impl<T> ChannelFeed<T> {
    /// End the change feed. The last published value stays loadable.
    pub fn close(&self) {
        self.sender.lock().take();
    }
}

#[async_trait]
impl<T> Source<T> for ChannelSource<T>
where
    T: Clone + Send + 'static,
{
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn load(&self) -> Result<T> {
        self.shared.latest.lock().clone().ok_or_else(|| {
            ConfigError::LoadError(format!("Channel source '{}' has no value yet", self.id))
        })
    }

    async fn watch(&self) -> Result<SourceStream<T>> {
        let rx = self.receiver.lock().take().ok_or_else(|| {
            ConfigError::WatchError(format!("Channel source '{}' is already watched", self.id))
        })?;

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (Ok(value), rx))
        });
        Ok(stream.boxed())
    }
}
