//! [`Transport`] implementation on the hyper-util pooled client.
//!
//! Each request runs in two phases:
//!
//! 1. `execute` sends the head and the upload body and resolves with the
//!    response head. A streamed upload is pulled from its [`BodySource`]
//!    frame by frame, so the producer is throttled by the socket.
//! 2. A pump task moves response frames into the [`BodySink`] until the
//!    body ends, fails, or the caller drops its [`DownloadStream`].
//!
//! [`BodySource`]: bodyline_bridge::BodySource

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bodyline_bridge::{BodySink, DownloadStream, UploadAbortHandle, rt};
use bytes::Bytes;
use futures_util::TryStreamExt;
use futures_util::future::BoxFuture;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{HttpConnector, HttpInfo};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::engine::{TransferOutcome, TransferReport, TransferWatch, Transport};
use crate::error::{ClientError, classify};
use crate::request::{Body, Request};
use crate::response::Response;

type UploadBody = UnsyncBoxBody<Bytes, bodyline_bridge::Error>;

/// HTTP/1 and HTTP/2 (prior knowledge) over plain TCP.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, UploadBody>,
}

impl HyperTransport {
    pub fn new(config: &ClientConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(config.connect_timeout);
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .http2_only(config.http2_only);

        Self {
            client: builder.build(connector),
        }
    }
}

impl Transport for HyperTransport {
    fn execute(
        &self,
        request: Request,
        sink_capacity: usize,
    ) -> BoxFuture<'static, Result<Response, ClientError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let (sink, stream) = DownloadStream::channel(sink_capacity)?;
            let (report_tx, report) = TransferWatch::channel();
            let sent = Arc::new(AtomicU64::new(0));

            let Request {
                method,
                uri,
                headers,
                body,
                ..
            } = request;
            debug!(%method, %uri, "sending request");

            let (body, upload) = upload_body(body, Arc::clone(&sent));
            let mut req = http::Request::builder()
                .method(method)
                .uri(uri.clone())
                .body(body)
                .map_err(|e| ClientError::Builder(e.to_string()))?;
            req.headers_mut().extend(headers);

            let res = match client.request(req).await {
                Ok(res) => res,
                Err(err) => {
                    let err = classify(&err);
                    warn!(%uri, error = %err, "request failed");
                    if let Some(upload) = &upload {
                        upload.abort(err.to_string());
                    }
                    let bytes_sent = sent.load(Ordering::Relaxed);
                    report_tx.send_replace(TransferReport::failed(bytes_sent, &err));
                    return Err(err);
                }
            };

            let info = res.extensions().get::<HttpInfo>().cloned();
            let (parts, incoming) = res.into_parts();
            debug!(%uri, status = %parts.status, "response head received");

            rt::spawn(pump(incoming, sink, upload, report_tx, sent));

            Ok(Response::new(parts, uri, stream, report).with_addrs(
                info.as_ref().map(HttpInfo::local_addr),
                info.as_ref().map(HttpInfo::remote_addr),
            ))
        })
    }
}

/// Build the hyper request body. A streamed body also yields a handle for
/// failing the upload once hyper owns (and may have dropped) the source.
fn upload_body(body: Body, sent: Arc<AtomicU64>) -> (UploadBody, Option<UploadAbortHandle>) {
    match body {
        Body::Empty => {
            let body = Empty::<Bytes>::new().map_err(|never| match never {});
            (body.boxed_unsync(), None)
        }
        Body::Bytes(bytes) => {
            sent.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            let body = Full::new(bytes).map_err(|never| match never {});
            (body.boxed_unsync(), None)
        }
        Body::Stream(source) => {
            let handle = source.abort_handle();
            let frames = source.into_stream().map_ok(move |chunk| {
                sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                Frame::data(chunk)
            });
            (StreamBody::new(frames).boxed_unsync(), Some(handle))
        }
    }
}

/// Move response frames into `sink` and record how the transfer ended.
///
/// A failed response body also fails an upload that is still streaming.
async fn pump(
    mut incoming: Incoming,
    mut sink: BodySink,
    upload: Option<UploadAbortHandle>,
    report: watch::Sender<TransferReport>,
    sent: Arc<AtomicU64>,
) {
    let outcome = loop {
        let frame = tokio::select! {
            biased;
            _ = sink.closed() => break TransferOutcome::Abandoned,
            frame = incoming.frame() => frame,
        };
        match frame {
            None => break TransferOutcome::Completed,
            Some(Ok(frame)) => {
                // Trailers carry no body data.
                let Ok(data) = frame.into_data() else {
                    continue;
                };
                let len = data.len() as u64;
                if sink.send(data).await.is_err() {
                    break TransferOutcome::Abandoned;
                }
                report.send_modify(|r| r.bytes_received += len);
            }
            Some(Err(err)) => {
                let err = classify(&err);
                break TransferOutcome::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                };
            }
        }
    };

    report.send_modify(|r| {
        r.bytes_sent = sent.load(Ordering::Relaxed);
        r.outcome = outcome.clone();
    });
    let received = report.borrow().bytes_received;

    match outcome {
        TransferOutcome::Completed => {
            debug!(received, "response body complete");
            sink.finish();
        }
        TransferOutcome::Failed { message, .. } => {
            warn!(received, error = %message, "response body failed");
            if let Some(upload) = &upload {
                upload.abort(message.clone());
            }
            sink.fail(message);
        }
        _ => debug!(received, "response body abandoned by caller"),
    }
}
