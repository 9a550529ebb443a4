//! # Event Channel
//!
//! Fixed-capacity FIFO queues connecting the interrupt layer, the control
//! engine and the UI collaborator.
//!
//! Each channel has two halves: an [`EventSender`] and an [`EventReceiver`].
//! Capacity is fixed at construction.
//!
//! ## Push variants
//!
//! | Method | Blocks when full | Intended caller |
//! |--------|------------------|-----------------|
//! | [`EventSender::push`] | yes | Control engine, UI context |
//! | [`EventSender::push_from_isr`] | no, returns [`ChannelError::Full`] | Interrupt and alarm handlers |
//!
//! An interrupt producer must never block, so a full queue is reported to it
//! instead. Queue depths are sized so this never happens in practice; see
//! [`DriveConfig`](crate::DriveConfig).

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use thiserror::Error;

/// Errors reported by channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The queue is at capacity.
    #[error("event channel is full")]
    Full,
    /// The other half of the channel has been dropped.
    #[error("event channel is disconnected")]
    Disconnected,
}

/// Create a bounded channel holding at most `capacity` items.
///
/// # Arguments
///
/// * `capacity` - Maximum number of queued items (must be non-zero)
///
/// # Returns
///
/// The sending and receiving halves of the channel.
///
/// # Examples
///
/// ```rust
/// use microdrive::event_channel;
///
/// let (tx, rx) = event_channel::<u8>(4);
/// tx.push(1).unwrap();
/// tx.push_from_isr(2).unwrap();
/// assert_eq!(rx.pop().unwrap(), 1);
/// assert_eq!(rx.try_pop(), Some(2));
/// assert_eq!(rx.try_pop(), None);
/// ```
pub fn event_channel<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    debug_assert!(capacity > 0, "zero-capacity channels are rendezvous channels");
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

/// Sending half of an event channel.
#[derive(Debug)]
pub struct EventSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        EventSender {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSender<T> {
    /// Enqueue `item`, waiting for space if the queue is full.
    ///
    /// Must not be called from interrupt or alarm context.
    pub fn push(&self, item: T) -> Result<(), ChannelError> {
        self.tx.send(item).map_err(|_| ChannelError::Disconnected)
    }

    /// Enqueue `item` without waiting.
    ///
    /// # Returns
    ///
    /// [`ChannelError::Full`] if the queue is at capacity; the item is dropped.
    pub fn push_from_isr(&self, item: T) -> Result<(), ChannelError> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full,
            TrySendError::Disconnected(_) => ChannelError::Disconnected,
        })
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

/// Receiving half of an event channel.
#[derive(Debug)]
pub struct EventReceiver<T> {
    rx: Receiver<T>,
}

impl<T> EventReceiver<T> {
    /// Dequeue the oldest item, waiting until one is available.
    pub fn pop(&self) -> Result<T, ChannelError> {
        self.rx.recv().map_err(|_| ChannelError::Disconnected)
    }

    /// Dequeue the oldest item if one is queued.
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Dequeue the oldest item, waiting at most `timeout`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` on timeout.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, ChannelError> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }

    /// Dequeue up to `max` already-queued items, handing each to `f`.
    ///
    /// Never waits.
    ///
    /// # Arguments
    ///
    /// * `max` - Upper bound on items processed in this call
    /// * `f` - Handler invoked once per item, in FIFO order
    ///
    /// # Returns
    ///
    /// Number of items handled.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use microdrive::event_channel;
    ///
    /// let (tx, rx) = event_channel::<u32>(8);
    /// for i in 0..5 {
    ///     tx.push(i).unwrap();
    /// }
    ///
    /// let mut seen = Vec::new();
    /// assert_eq!(rx.drain(3, |i| seen.push(i)), 3);
    /// assert_eq!(seen, vec![0, 1, 2]);
    /// assert_eq!(rx.len(), 2);
    /// ```
    pub fn drain<F>(&self, max: usize, mut f: F) -> usize
    where
        F: FnMut(T),
    {
        let mut handled = 0;
        while handled < max {
            match self.rx.try_recv() {
                Ok(item) => {
                    f(item);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Borrow the underlying receiver for use in `crossbeam_channel::select!`.
    pub fn as_crossbeam(&self) -> &Receiver<T> {
        &self.rx
    }
}
