use std::time::Duration;

use bodyline_bridge::BodySource;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

/// Request body handed to a [`Transport`](crate::Transport).
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Streamed from an [`UploadStream`](bodyline_bridge::UploadStream).
    Stream(BodySource),
}

impl Body {
    /// Length when known up front.
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(bytes) => Some(bytes.len() as u64),
            Body::Stream(_) => None,
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<BodySource> for Body {
    fn from(source: BodySource) -> Self {
        Body::Stream(source)
    }
}

/// A request ready for the engine.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub body: Body,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            timeout: None,
            body: Body::Empty,
        }
    }
}
