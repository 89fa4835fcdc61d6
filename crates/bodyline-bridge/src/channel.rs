//! Bounded chunk channel.
//!
//! [`BoundedChannel`] is a fixed-capacity FIFO shared by one consumer and
//! any number of producers. Producers wait while it is full, the consumer
//! waits while it is empty, and either side can end it:
//!
//! ```text
//!   Open ──close()──► Closing ──drained──► Closed
//!     │                  │
//!     └──abort(reason)───┴──────────────► Aborted(reason)
//! ```
//!
//! Every wait goes through a [`Notify`]; the mutex only guards O(1) state
//! transitions and is never held across an await or a blocking wait.
//! Each operation has an async form for the engine and a `blocking_*` form
//! for caller threads.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::task::Poll;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Error;
use crate::rt;

/// Default number of in-flight chunks a channel holds.
pub const DEFAULT_CAPACITY: usize = 8;

/// Failure of a push or pop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The producer closed the channel or the consumer went away.
    #[error("channel closed")]
    Closed,
    /// The channel was aborted; carries the first abort reason.
    #[error("channel aborted: {0}")]
    Aborted(String),
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    /// The producer closed; buffered chunks are still poppable.
    Closing,
    /// Drained after a close, or the consumer disconnected.
    Closed,
    Aborted(String),
}

impl ChannelState {
    /// Whether no further chunk will ever be delivered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Aborted(_))
    }
}

struct Inner<T> {
    queue: VecDeque<T>,
    state: ChannelState,
    /// `Closed` came from [`BoundedChannel::disconnect`], not a drain.
    disconnected: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    /// Woken when a chunk is enqueued or the state changes.
    readable: Notify,
    /// Woken when a slot frees up or the state changes.
    writable: Notify,
}

/// Which states an abort may replace.
#[derive(Clone, Copy)]
enum AbortScope {
    /// Only `Open`.
    Open,
    /// `Open` or `Closing`.
    Active,
    /// `Open`, `Closing`, or `Closed` after a disconnect.
    Failed,
}

enum TryPush<T> {
    Pushed,
    Full(T),
    Rejected(ChannelError),
}

/// A fixed-capacity multi-producer, single-consumer chunk queue.
///
/// Clones share the same queue; the stream wrappers decide which clone
/// acts as producer and which as consumer.
pub struct BoundedChannel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.shared.capacity)
            .field("len", &inner.queue.len())
            .field("state", &inner.state)
            .finish()
    }
}

impl<T> BoundedChannel<T> {
    /// Create an open channel holding at most `capacity` chunks.
    ///
    /// Returns [`Error::InvalidCapacity`] for a capacity of zero.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }
        Ok(Self::build(capacity))
    }

    pub(crate) fn with_default_capacity() -> Self {
        Self::build(DEFAULT_CAPACITY)
    }

    fn build(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    queue: VecDeque::with_capacity(capacity),
                    state: ChannelState::Open,
                    disconnected: false,
                }),
                capacity,
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of buffered, undelivered chunks.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.inner.lock().queue.is_empty()
    }

    pub fn state(&self) -> ChannelState {
        self.shared.inner.lock().state.clone()
    }

    /// Whether the channel reached `Closed` or `Aborted`.
    pub fn is_terminated(&self) -> bool {
        self.shared.inner.lock().state.is_terminal()
    }

    /// Enqueue `item`, waiting while the channel is full.
    ///
    /// Fails with [`ChannelError::Closed`] once the channel is closed or
    /// its consumer is gone, and with the abort reason once aborted. A
    /// single producer's pushes keep their order.
    pub async fn push(&self, item: T) -> Result<(), ChannelError> {
        let mut item = item;
        loop {
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(item) {
                TryPush::Pushed => return Ok(()),
                TryPush::Rejected(err) => return Err(err),
                TryPush::Full(back) => item = back,
            }

            notified.await;
        }
    }

    /// Dequeue the next chunk, waiting while the channel is empty and open.
    ///
    /// Returns `None` once closed and drained. Once aborted, returns the
    /// abort reason on every call, even if chunks were still buffered.
    pub async fn pop(&self) -> Option<Result<T, ChannelError>> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Poll::Ready(outcome) = self.try_pop() {
                return outcome;
            }

            notified.await;
        }
    }

    /// Blocking form of [`push`](Self::push) for caller threads.
    pub fn blocking_push(&self, item: T) -> Result<(), ChannelError> {
        rt::block_on(self.push(item))
    }

    /// Blocking form of [`pop`](Self::pop) for caller threads.
    pub fn blocking_pop(&self) -> Option<Result<T, ChannelError>> {
        rt::block_on(self.pop())
    }

    /// Wait until the channel reaches `Closed` or `Aborted`.
    ///
    /// Producers use this to notice a departed consumer while they are
    /// busy waiting on something else.
    pub async fn terminated(&self) {
        loop {
            let notified = self.shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_terminated() {
                return;
            }

            notified.await;
        }
    }

    /// Stop accepting chunks. Buffered chunks stay poppable.
    ///
    /// Idempotent; has no effect once the channel left `Open`.
    pub fn close(&self) {
        let buffered = {
            let mut inner = self.shared.inner.lock();
            if inner.state != ChannelState::Open {
                return;
            }
            inner.state = ChannelState::Closing;
            inner.queue.len()
        };
        tracing::debug!(buffered, "channel closed by producer");
        self.wake_all();
    }

    /// Fail the channel with `reason`, discarding buffered chunks.
    ///
    /// The first reason wins; aborting a `Closed` or already aborted
    /// channel does nothing.
    pub fn abort(&self, reason: impl Into<String>) {
        self.abort_with(reason.into(), AbortScope::Active);
    }

    /// Abort on behalf of a consumer that failed.
    ///
    /// Like [`abort`](Self::abort), but also replaces an earlier
    /// [`disconnect`](Self::disconnect), so producers that were told
    /// `Closed` get the failure reason on their next push. A drained
    /// channel stays `Closed`.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.abort_with(reason.into(), AbortScope::Failed)
    }

    /// Abort only if nobody has closed or ended the channel yet.
    ///
    /// Used by drop guards so an abandoned endpoint fails the stream
    /// without overriding a graceful close.
    pub(crate) fn abort_if_open(&self, reason: impl Into<String>) -> bool {
        self.abort_with(reason.into(), AbortScope::Open)
    }

    /// Mark the consumer as gone.
    ///
    /// Buffered chunks are dropped and producers see `Closed`. An aborted
    /// channel keeps its reason.
    pub fn disconnect(&self) {
        let discarded = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = ChannelState::Closed;
            inner.disconnected = true;
            std::mem::take(&mut inner.queue)
        };
        if !discarded.is_empty() {
            tracing::debug!(
                discarded = discarded.len(),
                "consumer disconnected with buffered chunks"
            );
        }
        drop(discarded);
        self.wake_all();
    }

    fn abort_with(&self, reason: String, scope: AbortScope) -> bool {
        let discarded = {
            let mut inner = self.shared.inner.lock();
            let allowed = match (&inner.state, scope) {
                (ChannelState::Open, _) => true,
                (ChannelState::Closing, AbortScope::Open) => false,
                (ChannelState::Closing, _) => true,
                (ChannelState::Closed, AbortScope::Failed) => inner.disconnected,
                (ChannelState::Closed | ChannelState::Aborted(_), _) => false,
            };
            if !allowed {
                return false;
            }
            inner.state = ChannelState::Aborted(reason.clone());
            std::mem::take(&mut inner.queue)
        };
        tracing::debug!(%reason, discarded = discarded.len(), "channel aborted");
        drop(discarded);
        self.wake_all();
        true
    }

    fn try_push(&self, item: T) -> TryPush<T> {
        {
            let mut inner = self.shared.inner.lock();
            match &inner.state {
                ChannelState::Open => {}
                ChannelState::Aborted(reason) => {
                    return TryPush::Rejected(ChannelError::Aborted(reason.clone()));
                }
                ChannelState::Closing | ChannelState::Closed => {
                    return TryPush::Rejected(ChannelError::Closed);
                }
            }
            if inner.queue.len() >= self.shared.capacity {
                return TryPush::Full(item);
            }
            inner.queue.push_back(item);
        }
        self.shared.readable.notify_waiters();
        TryPush::Pushed
    }

    fn try_pop(&self) -> Poll<Option<Result<T, ChannelError>>> {
        let item = {
            let mut inner = self.shared.inner.lock();
            if let ChannelState::Aborted(reason) = &inner.state {
                return Poll::Ready(Some(Err(ChannelError::Aborted(reason.clone()))));
            }
            match inner.queue.pop_front() {
                Some(item) => item,
                None => {
                    if inner.state == ChannelState::Open {
                        return Poll::Pending;
                    }
                    let drained = inner.state == ChannelState::Closing;
                    if drained {
                        inner.state = ChannelState::Closed;
                    }
                    drop(inner);
                    if drained {
                        tracing::debug!("channel drained");
                        self.wake_all();
                    }
                    return Poll::Ready(None);
                }
            }
        };
        self.shared.writable.notify_waiters();
        Poll::Ready(Some(Ok(item)))
    }

    fn wake_all(&self) {
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
    }
}
