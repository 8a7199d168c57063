//! Single-slot coalescing mailbox.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of offering a value to a [`Mailbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// The slot was empty and now holds the value.
    Delivered,
    /// The slot still holds an unconsumed value; the offer was dropped.
    Occupied,
    /// The mailbox is closed.
    Closed,
}

struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

/// A mailbox holding at most one undelivered value.
///
/// The writer never waits: `offer` either fills an empty slot or reports that
/// the slot is occupied. A single reader drains it with `recv`.
pub(crate) struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Place `value` in the slot if it is empty.
    pub(crate) fn offer(&self, value: T) -> Offer {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Offer::Closed;
        }
        if slot.value.is_some() {
            return Offer::Occupied;
        }
        slot.value = Some(value);
        drop(slot);
        self.notify.notify_one();
        Offer::Delivered
    }

    /// Close the mailbox. Returns false if it was already closed.
    ///
    /// With `discard` set, a pending value is dropped as well; otherwise the
    /// reader may still take it once before observing the close.
    pub(crate) fn close(&self, discard: bool) -> bool {
        let mut slot = self.slot.lock();
        let was_open = !slot.closed;
        slot.closed = true;
        if discard {
            slot.value = None;
        }
        drop(slot);
        self.notify.notify_one();
        was_open
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    pub(crate) fn try_take(&self) -> Option<T> {
        self.slot.lock().value.take()
    }

    /// Wait for the next value. Returns `None` once closed and drained.
    pub(crate) async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut slot = self.slot.lock();
                if let Some(value) = slot.value.take() {
                    return Some(value);
                }
                if slot.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}
