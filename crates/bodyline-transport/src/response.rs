//! HTTP responses with a single-use, streamable body.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bodyline_bridge::{BlockingCall, CancellationToken, DownloadStream};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HeaderMap};
use http::{StatusCode, Uri, Version};
use serde::de::DeserializeOwned;

use crate::engine::{TransferReport, TransferWatch};
use crate::error::{ClientError, ClientResult};

enum BodyState {
    /// Not read yet; can be streamed once.
    Streamable(DownloadStream),
    /// Fully read; can be read again but no longer streamed.
    Buffered(Bytes),
    Consumed,
}

/// A response received from a [`Transport`](crate::Transport).
///
/// The body is read once, either buffered through [`bytes`](Self::bytes),
/// [`text`](Self::text) and [`json`](Self::json), or streamed through
/// [`chunks`](Self::chunks). Buffered reads are cached. Any access after
/// the body was streamed or closed fails with [`ClientError::Consumed`].
pub struct Response {
    status: StatusCode,
    version: Version,
    url: Uri,
    headers: HeaderMap,
    content_length: Option<u64>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    body: BodyState,
    report: TransferWatch,
    read_timeout: Option<Duration>,
    token: Option<CancellationToken>,
}

impl Response {
    pub fn new(
        parts: http::response::Parts,
        url: Uri,
        body: DownloadStream,
        report: TransferWatch,
    ) -> Self {
        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());
        Self {
            status: parts.status,
            version: parts.version,
            url,
            headers: parts.headers,
            content_length,
            local_addr: None,
            remote_addr: None,
            body: BodyState::Streamable(body),
            report,
            read_timeout: None,
            token: None,
        }
    }

    pub fn with_addrs(
        mut self,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        self.local_addr = local_addr;
        self.remote_addr = remote_addr;
        self
    }

    pub(crate) fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    pub(crate) fn set_cancel_token(&mut self, token: Option<CancellationToken>) {
        self.token = token;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Read the whole body, blocking the calling thread.
    ///
    /// The read honours the client's read timeout and the request's
    /// cancellation token, and is interruptible like any blocking call.
    pub fn bytes(&mut self) -> ClientResult<Bytes> {
        match std::mem::replace(&mut self.body, BodyState::Consumed) {
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes.clone());
                Ok(bytes)
            }
            BodyState::Consumed => Err(ClientError::Consumed("response body")),
            BodyState::Streamable(stream) => {
                let bytes = BlockingCall::new("read response body")
                    .timeout(self.read_timeout)
                    .cancel_token(self.token.clone())
                    .run(stream.into_bytes())??;
                self.body = BodyState::Buffered(bytes.clone());
                Ok(bytes)
            }
        }
    }

    /// Read the body as text, replacing invalid UTF-8.
    pub fn text(&mut self) -> ClientResult<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn json<T: DeserializeOwned>(&mut self) -> ClientResult<T> {
        let bytes = self.bytes()?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Stream the body chunk by chunk, cancelled by the request's token.
    pub fn chunks(&mut self) -> ClientResult<DownloadStream> {
        let token = self.token.clone();
        self.take_stream(token)
    }

    /// Stream the body chunk by chunk, cancelled by `token`.
    pub fn chunks_with(&mut self, token: CancellationToken) -> ClientResult<DownloadStream> {
        self.take_stream(Some(token))
    }

    fn take_stream(&mut self, token: Option<CancellationToken>) -> ClientResult<DownloadStream> {
        match std::mem::replace(&mut self.body, BodyState::Consumed) {
            BodyState::Streamable(mut stream) => {
                stream.set_cancellation(token);
                Ok(stream)
            }
            BodyState::Buffered(bytes) => {
                self.body = BodyState::Buffered(bytes);
                Err(ClientError::Consumed("response body"))
            }
            BodyState::Consumed => Err(ClientError::Consumed("response body")),
        }
    }

    /// Drop the body. The engine stops reading from the connection.
    pub fn close(&mut self) {
        self.body = BodyState::Consumed;
    }

    /// Turn a 4xx or 5xx status into [`ClientError::Status`].
    pub fn error_for_status(self) -> ClientResult<Self> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(ClientError::Status {
                status: self.status,
                url: self.url.to_string(),
            });
        }
        Ok(self)
    }

    /// Latest transfer report for this exchange.
    pub fn report(&self) -> TransferReport {
        self.report.current()
    }

    /// Watch that resolves once the transfer reached a terminal outcome.
    pub fn report_watch(&self) -> TransferWatch {
        self.report.clone()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            BodyState::Streamable(_) => "streamable",
            BodyState::Buffered(_) => "buffered",
            BodyState::Consumed => "consumed",
        };
        f.debug_struct("Response")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransferOutcome;

    fn response(status: u16, chunks: &[&'static str]) -> Response {
        let (mut sink, stream) = DownloadStream::channel(8).unwrap();
        let chunks: Vec<Bytes> = chunks.iter().map(|c| Bytes::from_static(c.as_bytes())).collect();
        bodyline_bridge::rt::block_on(async {
            for chunk in chunks {
                sink.send(chunk).await.unwrap();
            }
        });
        sink.finish();

        let (mut parts, ()) = http::Response::builder()
            .status(status)
            .header(CONTENT_LENGTH, "11")
            .body(())
            .unwrap()
            .into_parts();
        parts.version = Version::HTTP_11;
        let report = TransferWatch::finished_with(TransferReport {
            bytes_sent: 0,
            bytes_received: 11,
            outcome: TransferOutcome::Completed,
        });
        Response::new(parts, Uri::from_static("http://localhost/test"), stream, report)
    }

    #[test]
    fn buffered_body_is_cached() {
        let mut resp = response(200, &["hello", " world"]);
        assert_eq!(resp.code(), 200);
        assert_eq!(resp.content_length(), Some(11));
        assert_eq!(resp.text().unwrap(), "hello world");
        assert_eq!(&resp.bytes().unwrap()[..], b"hello world");
    }

    #[test]
    fn streaming_after_buffering_is_rejected() {
        let mut resp = response(200, &["abc"]);
        resp.bytes().unwrap();
        assert_eq!(
            resp.chunks().unwrap_err(),
            ClientError::Consumed("response body")
        );
        assert_eq!(&resp.bytes().unwrap()[..], b"abc");
    }

    #[test]
    fn body_access_after_streaming_fails() {
        let mut resp = response(200, &["a", "b"]);
        let chunks: Vec<_> = resp.chunks().unwrap().map(Result::unwrap).collect();
        assert_eq!(chunks, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(resp.bytes().unwrap_err(), ClientError::Consumed("response body"));
    }

    #[test]
    fn closed_body_is_consumed() {
        let mut resp = response(200, &["a"]);
        resp.close();
        assert!(matches!(resp.text(), Err(ClientError::Consumed(_))));
    }

    #[test]
    fn json_decode_errors_are_classified() {
        let mut resp = response(200, &["{not json"]);
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn error_for_status_flags_client_and_server_errors() {
        assert!(response(204, &[]).error_for_status().is_ok());
        let err = response(503, &[]).error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn cancelled_token_stops_buffered_read() {
        let mut resp = response(200, &["partial"]);
        let token = CancellationToken::new();
        token.cancel();
        resp.set_cancel_token(Some(token));
        assert_eq!(resp.bytes().unwrap_err(), ClientError::Cancelled);
    }

    #[test]
    fn report_is_available_without_body() {
        let resp = response(200, &[]);
        assert_eq!(resp.report().outcome, TransferOutcome::Completed);
    }
}
