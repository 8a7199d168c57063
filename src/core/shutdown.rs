//! Cancellation for long-running watch loops.

use tokio::sync::watch;

/// Owner side of a cancellation pair.
///
/// Triggering it, or dropping it, cancels every [`ShutdownSignal`] handed out.
///
/// # Examples
///
/// ```rust
/// use hotstore::core::Shutdown;
///
/// # async fn example() {
/// let shutdown = Shutdown::new();
/// let signal = shutdown.signal();
///
/// shutdown.trigger();
/// signal.cancelled().await;
/// assert!(signal.is_cancelled());
/// # }
/// ```
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create an untriggered shutdown.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a signal observing this shutdown.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel all signals. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`Shutdown::trigger`] has been called.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether cancellation has been requested or the owner is gone.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once cancellation is requested or the owner is dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // An error means the owner was dropped, which also cancels.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}
