//! bodyline-bridge: streaming body bridge between caller threads and an
//! async transport engine.
//!
//! Callers push or pull HTTP body data in bounded chunks without buffering
//! the whole payload. Every blocking call can be cancelled through a
//! [`CancellationToken`] or woken by an external interrupt on the calling
//! thread's [`InterruptHandle`].
//!
//! # Architecture
//!
//! ```text
//! caller thread                       transport engine (tokio)
//!   UploadStream::push ──► BoundedChannel ──► BodySource ──► network
//!   DownloadStream::next ◄── BoundedChannel ◄── BodySink ◄── network
//!
//!   BlockingCall::run(op)
//!     └── select { interrupt, token.cancelled(), op, timeout }
//! ```
//!
//! # Terminal states
//!
//! A channel ends exactly once, either gracefully (`close` → drained →
//! `Closed`) or with an `abort(reason)`. An abort discards chunks that were
//! buffered but not yet delivered, and every later push or pop reports the
//! first abort reason.

pub mod cancel;
pub mod channel;
pub mod download;
mod error;
pub mod interrupt;
pub mod rt;
pub mod upload;

pub use cancel::CancellationToken;
pub use channel::{BoundedChannel, ChannelError, ChannelState, DEFAULT_CAPACITY};
pub use download::{BodySink, DownloadStream};
pub use error::{Error, Result};
pub use interrupt::{BlockingCall, CallState, InterruptHandle};
pub use upload::{BodySource, UploadAbortHandle, UploadStream};
