//! Interruptible blocking calls.
//!
//! A caller thread that blocks on the transport engine must be wakeable by
//! three things besides the operation finishing: its [`CancellationToken`],
//! a timeout, and an external interrupt aimed at the thread itself (the
//! host's "kill this thread" request). All four are waited on in a single
//! `select!`, so none of them is polled on a delay.
//!
//! # Call lifecycle
//!
//! ```text
//! Idle ──run()──► Running ──┬──► Completed
//!                           ├──► TimedOut     ┐
//!                           ├──► Cancelled    ├─ engine task aborted,
//!                           └──► Interrupted  ┘  release hooks run
//! ```
//!
//! The operation itself runs as a task on the shared runtime. When the
//! caller gives up, the task is aborted and awaited before `run` returns,
//! so the engine has dropped its sockets and channel endpoints by the time
//! control is back with the caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::rt;

struct InterruptState {
    pending: AtomicBool,
    blocked: AtomicUsize,
    notify: Notify,
    thread: String,
}

/// Handle through which another thread interrupts blocking calls.
///
/// Each thread owns one handle, available via [`InterruptHandle::current`].
/// An interrupt raised while the thread is not blocked stays pending and
/// is delivered to the next blocking call, which consumes it.
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

thread_local! {
    static CURRENT: InterruptHandle = InterruptHandle::named(
        std::thread::current().name().unwrap_or("unnamed").to_string(),
    );
}

impl InterruptHandle {
    /// A handle not bound to any thread.
    pub fn new() -> Self {
        Self::named("detached".to_string())
    }

    /// The calling thread's handle.
    pub fn current() -> Self {
        CURRENT.with(InterruptHandle::clone)
    }

    fn named(thread: String) -> Self {
        Self {
            state: Arc::new(InterruptState {
                pending: AtomicBool::new(false),
                blocked: AtomicUsize::new(0),
                notify: Notify::new(),
                thread,
            }),
        }
    }

    /// Interrupt the current or next blocking call made through this handle.
    pub fn interrupt(&self) {
        if !self.state.pending.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                thread = %self.state.thread,
                blocked = self.is_blocked(),
                "interrupt requested"
            );
        }
        self.state.notify.notify_waiters();
    }

    /// Whether an interrupt is waiting to be delivered.
    pub fn is_pending(&self) -> bool {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Withdraw a pending interrupt. Returns whether one was pending.
    pub fn clear(&self) -> bool {
        self.state.pending.swap(false, Ordering::SeqCst)
    }

    /// Whether the owning thread is currently inside a blocking call.
    pub fn is_blocked(&self) -> bool {
        self.state.blocked.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn enter(&self) -> BlockedGuard<'_> {
        self.state.blocked.fetch_add(1, Ordering::SeqCst);
        BlockedGuard { handle: self }
    }

    /// Resolves once an interrupt is delivered, consuming it.
    pub(crate) async fn interrupted(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.pending.swap(false, Ordering::SeqCst) {
                return;
            }

            notified.await;
        }
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("thread", &self.state.thread)
            .field("pending", &self.is_pending())
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

pub(crate) struct BlockedGuard<'a> {
    handle: &'a InterruptHandle,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.handle.state.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Block on `future`, giving up if the calling thread is interrupted.
pub(crate) fn block_interruptibly<F: Future>(future: F) -> Result<F::Output, Error> {
    let handle = InterruptHandle::current();
    let _blocked = handle.enter();
    rt::block_on(async {
        tokio::select! {
            biased;
            _ = handle.interrupted() => Err(Error::Interrupted),
            output = future => Ok(output),
        }
    })
}

/// State of a [`BlockingCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Running,
    Completed,
    TimedOut,
    Cancelled,
    Interrupted,
}

type ReleaseHook = Box<dyn FnOnce(&Error) + Send>;

/// One blocking transport operation with timeout, cancellation and
/// interruption.
///
/// ```no_run
/// use std::time::Duration;
/// use bodyline_bridge::{BlockingCall, CancellationToken};
///
/// let token = CancellationToken::new();
/// let result = BlockingCall::new("connect")
///     .timeout(Duration::from_secs(5))
///     .cancel_token(token.clone())
///     .run(async { 42 });
/// ```
///
/// A call is single-use; running it twice fails with [`Error::Consumed`].
pub struct BlockingCall {
    name: &'static str,
    timeout: Option<Duration>,
    token: Option<CancellationToken>,
    interrupt: InterruptHandle,
    release: Vec<ReleaseHook>,
    state: CallState,
}

impl BlockingCall {
    /// A call interruptible through the calling thread's handle.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            timeout: None,
            token: None,
            interrupt: InterruptHandle::current(),
            release: Vec::new(),
            state: CallState::Idle,
        }
    }

    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn cancel_token(mut self, token: impl Into<Option<CancellationToken>>) -> Self {
        self.token = token.into();
        self
    }

    /// Use `handle` instead of the calling thread's handle.
    pub fn interrupt_handle(mut self, handle: InterruptHandle) -> Self {
        self.interrupt = handle;
        self
    }

    /// Register a hook run when the call ends without completing, e.g. to
    /// abort the upload channel feeding the operation.
    pub fn on_release(mut self, hook: impl FnOnce(&Error) + Send + 'static) -> Self {
        self.release.push(Box::new(hook));
        self
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Run `future` on the shared runtime and block until it completes, the
    /// token is cancelled, the timeout elapses, or the thread is interrupted.
    pub fn run<F>(&mut self, future: F) -> Result<F::Output, Error>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.state != CallState::Idle {
            return Err(Error::Consumed("blocking call"));
        }
        self.state = CallState::Running;
        let started = Instant::now();

        let interrupt = self.interrupt.clone();
        let token = self.token.clone();
        let timeout = self.timeout;
        let _blocked = interrupt.enter();
        let mut task = rt::spawn(future);

        let outcome = rt::block_on(async {
            let cancelled = async {
                match &token {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            };
            let expired = async {
                match timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = interrupt.interrupted() => Err(Error::Interrupted),
                _ = cancelled => Err(Error::Cancelled),
                joined = &mut task => Ok(joined),
                _ = expired => Err(Error::TimedOut),
            }
        });

        let result = match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            // The runtime cancelled the task underneath us.
            Ok(Err(_)) => Err(Error::Interrupted),
            Err(err) => {
                task.abort();
                let _ = rt::block_on(task);
                Err(err)
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.state = CallState::Completed;
                self.release.clear();
                tracing::debug!(call = self.name, elapsed_ms, "blocking call completed");
            }
            Err(err) => {
                self.state = match err {
                    Error::TimedOut => CallState::TimedOut,
                    Error::Cancelled => CallState::Cancelled,
                    _ => CallState::Interrupted,
                };
                tracing::debug!(
                    call = self.name,
                    state = ?self.state,
                    elapsed_ms,
                    "blocking call abandoned"
                );
                for hook in self.release.drain(..) {
                    hook(err);
                }
            }
        }

        result
    }
}

impl fmt::Debug for BlockingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingCall")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("state", &self.state)
            .finish()
    }
}
