//! Client error types.

use std::error::Error as StdError;
use std::io;

use http::StatusCode;
use serde::Serialize;

/// Errors returned by the client, the transport engine, and response
/// body access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("builder error: {0}")]
    Builder(String),

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("error trying to connect: {0}")]
    Connect(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("operation timed out")]
    Timeout,

    #[error("body error: {0}")]
    Body(String),

    #[error("error decoding response body: {0}")]
    Decode(String),

    #[error("HTTP status {status} for url ({url})")]
    Status { status: StatusCode, url: String },

    #[error("request error: {0}")]
    Request(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request interrupted")]
    Interrupted,

    #[error("{0} has already been consumed")]
    Consumed(&'static str),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse classification of a [`ClientError`], recorded in transfer reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Builder,
    Config,
    Connect,
    ConnectionReset,
    Timeout,
    Body,
    Decode,
    Status,
    Request,
    Cancelled,
    Interrupted,
    Consumed,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Builder(_) => ErrorKind::Builder,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::Connect(_) => ErrorKind::Connect,
            ClientError::ConnectionReset(_) => ErrorKind::ConnectionReset,
            ClientError::Timeout => ErrorKind::Timeout,
            ClientError::Body(_) => ErrorKind::Body,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::Status { .. } => ErrorKind::Status,
            ClientError::Request(_) => ErrorKind::Request,
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::Interrupted => ErrorKind::Interrupted,
            ClientError::Consumed(_) => ErrorKind::Consumed,
        }
    }

    pub fn is_builder(&self) -> bool {
        matches!(self, ClientError::Builder(_) | ClientError::Config(_))
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, ClientError::Connect(_))
    }

    pub fn is_connection_reset(&self) -> bool {
        matches!(self, ClientError::ConnectionReset(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout)
    }

    pub fn is_body(&self) -> bool {
        matches!(self, ClientError::Body(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, ClientError::Decode(_))
    }

    pub fn is_status(&self) -> bool {
        matches!(self, ClientError::Status { .. })
    }

    pub fn is_request(&self) -> bool {
        matches!(self, ClientError::Request(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ClientError::Interrupted)
    }

    /// Status code for [`ClientError::Status`].
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<bodyline_bridge::Error> for ClientError {
    fn from(err: bodyline_bridge::Error) -> Self {
        use bodyline_bridge::Error;
        match err {
            Error::Closed => ClientError::Body("body stream closed".into()),
            Error::Aborted(reason) => ClientError::Body(reason),
            Error::Cancelled => ClientError::Cancelled,
            Error::TimedOut => ClientError::Timeout,
            Error::Interrupted => ClientError::Interrupted,
            Error::InvalidCapacity(capacity) => {
                ClientError::Config(format!("channel capacity must be at least 1, got {capacity}"))
            }
            Error::Consumed(what) => ClientError::Consumed(what),
        }
    }
}

/// Classify an engine error by walking its source chain.
///
/// A bridge error anywhere in the chain (an aborted upload surfacing
/// through hyper) wins, then socket-level io errors, then hyper's own
/// classification.
pub(crate) fn classify(err: &(dyn StdError + 'static)) -> ClientError {
    let message = chain_message(err);
    let mut connect = false;
    let mut current = Some(err);

    while let Some(err) = current {
        if let Some(bridge) = err.downcast_ref::<bodyline_bridge::Error>() {
            return bridge.clone().into();
        }
        if let Some(legacy) = err.downcast_ref::<hyper_util::client::legacy::Error>() {
            connect |= legacy.is_connect();
        }
        if let Some(io) = err.downcast_ref::<io::Error>() {
            match io.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => return ClientError::ConnectionReset(message),
                io::ErrorKind::TimedOut => return ClientError::Timeout,
                _ => {}
            }
        }
        if let Some(hyper) = err.downcast_ref::<hyper::Error>() {
            if hyper.is_timeout() {
                return ClientError::Timeout;
            }
            if hyper.is_incomplete_message() {
                return ClientError::ConnectionReset(message);
            }
        }
        current = err.source();
    }

    if connect {
        ClientError::Connect(message)
    } else {
        ClientError::Request(message)
    }
}

/// `outer: inner: root` rendering of an error chain.
fn chain_message(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(err) = current {
        let part = err.to_string();
        if !message.ends_with(&part) {
            message.push_str(": ");
            message.push_str(&part);
        }
        current = err.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("send failed")]
    struct Wrapper(#[source] Box<dyn StdError + Send + Sync>);

    #[test]
    fn bridge_errors_keep_their_classification() {
        let aborted: ClientError = bodyline_bridge::Error::Aborted("disk read failed".into()).into();
        assert_eq!(aborted, ClientError::Body("disk read failed".into()));
        assert!(aborted.is_body());

        assert!(ClientError::from(bodyline_bridge::Error::TimedOut).is_timeout());
        assert!(ClientError::from(bodyline_bridge::Error::Cancelled).is_cancelled());
        assert!(ClientError::from(bodyline_bridge::Error::Interrupted).is_interrupted());
        assert!(ClientError::from(bodyline_bridge::Error::InvalidCapacity(0)).is_builder());
    }

    #[test]
    fn classify_finds_bridge_error_in_chain() {
        let err = Wrapper(Box::new(bodyline_bridge::Error::Aborted("upload failed".into())));
        assert_eq!(classify(&err), ClientError::Body("upload failed".into()));
    }

    #[test]
    fn classify_maps_socket_errors() {
        let reset = Wrapper(Box::new(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(classify(&reset).is_connection_reset());

        let timed_out = Wrapper(Box::new(io::Error::from(io::ErrorKind::TimedOut)));
        assert!(classify(&timed_out).is_timeout());

        let other = Wrapper(Box::new(io::Error::other("weird")));
        let classified = classify(&other);
        assert!(classified.is_request());
        assert_eq!(classified.to_string(), "request error: send failed: weird");
    }

    #[test]
    fn status_error_exposes_code() {
        let err = ClientError::Status {
            status: StatusCode::NOT_FOUND,
            url: "http://localhost/missing".into(),
        };
        assert!(err.is_status());
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.kind(), ErrorKind::Status);
        assert_eq!(
            err.to_string(),
            "HTTP status 404 Not Found for url (http://localhost/missing)"
        );
    }
}
