//! Bridge error types.

use thiserror::Error;

use crate::channel::ChannelError;

/// Errors surfaced by streams and blocking calls.
///
/// `Cancelled`, `TimedOut` and `Interrupted` are stops requested on the
/// caller side; `Aborted` is a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The channel was closed, or its consumer went away.
    #[error("stream closed")]
    Closed,

    #[error("stream aborted: {0}")]
    Aborted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    TimedOut,

    /// An external interrupt reached the thread blocked in the call.
    #[error("operation interrupted")]
    Interrupted,

    #[error("invalid channel capacity: {0}")]
    InvalidCapacity(usize),

    #[error("{0} has already been consumed")]
    Consumed(&'static str),
}

impl Error {
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// The abort reason, if this is an `Aborted` error.
    pub fn abort_reason(&self) -> Option<&str> {
        match self {
            Error::Aborted(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => Error::Closed,
            ChannelError::Aborted(reason) => Error::Aborted(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
