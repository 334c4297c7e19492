//! Close-able channel used for both the output stream and the internal
//! jobs stream.
//!
//! Closing the downstream channel is the service's canonical cancellation
//! signal, so the channel must support an explicit `close()` callable from
//! either side:
//! - subsequent `send`s fail with `ChannelClosed`,
//! - a sender already blocked on a full buffer is unblocked within one
//!   poll interval,
//! - receivers drain elements buffered before the close, then observe
//!   `ChannelClosed`,
//! - `wait_closed()` observers wake (used by the sentinel task).

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use crate::error::{BatchError, Result};

/// How often a sender blocked on a full buffer re-checks for closure.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<T> {
    /// Taken on close; a `None` here is what makes later sends fail.
    sender: Mutex<Option<Sender<T>>>,
    receiver: Receiver<T>,
    closed: Mutex<bool>,
    closed_cv: Condvar,
}

/// Multi-producer, multi-consumer FIFO channel with explicit closure.
///
/// Handles are cheap clones sharing one buffer; elements are delivered in
/// send order.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self::from_parts(tx, rx)
    }

    pub fn unbounded() -> Self {
        let (tx, rx) = unbounded();
        Self::from_parts(tx, rx)
    }

    fn from_parts(tx: Sender<T>, rx: Receiver<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                sender: Mutex::new(Some(tx)),
                receiver: rx,
                closed: Mutex::new(false),
                closed_cv: Condvar::new(),
            }),
        }
    }

    /// Blocking send. Fails with `ChannelClosed` once the channel is
    /// closed, including while waiting for buffer space.
    pub fn send(&self, value: T) -> Result<()> {
        let mut value = value;
        loop {
            let tx = match lock(&self.shared.sender).as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(BatchError::ChannelClosed),
            };
            match tx.try_send(value) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(BatchError::ChannelClosed),
                Err(TrySendError::Full(v)) => {
                    value = v;
                    let (closed, _) = self
                        .shared
                        .closed_cv
                        .wait_timeout(lock(&self.shared.closed), SEND_POLL_INTERVAL)
                        .unwrap_or_else(PoisonError::into_inner);
                    if *closed {
                        return Err(BatchError::ChannelClosed);
                    }
                }
            }
        }
    }

    /// Blocking receive. Buffered elements remain receivable after
    /// `close()`; once drained, fails with `ChannelClosed`.
    pub fn recv(&self) -> Result<T> {
        self.shared
            .receiver
            .recv()
            .map_err(|_| BatchError::ChannelClosed)
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        lock(&self.shared.sender).take();
        let mut closed = lock(&self.shared.closed);
        *closed = true;
        self.shared.closed_cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.shared.closed)
    }

    /// Blocks until the channel is closed from any handle.
    pub fn wait_closed(&self) {
        let mut closed = lock(&self.shared.closed);
        while !*closed {
            closed = self
                .shared
                .closed_cv
                .wait(closed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
