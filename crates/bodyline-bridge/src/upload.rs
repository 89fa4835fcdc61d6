//! Caller-fed request bodies.
//!
//! An [`UploadStream`] is the producer end: caller threads push chunks and
//! finally `close` or `abort`. The transport engine takes the consumer end,
//! a [`BodySource`], exactly once and drains it into the request.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use futures_core::Stream;

use crate::channel::{BoundedChannel, ChannelState};
use crate::error::{Error, Result};
use crate::interrupt::block_interruptibly;

struct UploadShared {
    channel: BoundedChannel<Bytes>,
    source_taken: AtomicBool,
    sent: AtomicU64,
}

impl Drop for UploadShared {
    fn drop(&mut self) {
        if self.channel.abort_if_open("upload stream dropped before close") {
            tracing::warn!(
                sent = self.sent.load(Ordering::Relaxed),
                "upload stream dropped without close; request body aborted"
            );
        }
    }
}

/// Producer handle for a streamed request body.
///
/// Clones push into the same body, so several threads can produce at
/// once; each thread's chunks keep their order. When the last handle is
/// dropped without [`close`](Self::close), the body is aborted rather than
/// ending as if complete.
#[derive(Clone)]
pub struct UploadStream {
    shared: Arc<UploadShared>,
}

impl UploadStream {
    /// Create an upload holding at most `capacity` chunks in flight.
    pub fn new(capacity: usize) -> Result<Self> {
        BoundedChannel::new(capacity).map(Self::from_channel)
    }

    /// Create an upload with [`DEFAULT_CAPACITY`](crate::DEFAULT_CAPACITY).
    pub fn with_default_capacity() -> Self {
        Self::from_channel(BoundedChannel::with_default_capacity())
    }

    fn from_channel(channel: BoundedChannel<Bytes>) -> Self {
        Self {
            shared: Arc::new(UploadShared {
                channel,
                source_taken: AtomicBool::new(false),
                sent: AtomicU64::new(0),
            }),
        }
    }

    /// Push one chunk, blocking while the body buffer is full.
    ///
    /// Empty chunks are accepted and ignored. Fails with [`Error::Closed`]
    /// after `close` or once the engine stopped reading, with
    /// [`Error::Aborted`] after an abort, and with [`Error::Interrupted`]
    /// if the calling thread is interrupted while waiting; an interrupted
    /// push aborts the upload so the engine does not wait for more data.
    pub fn push(&self, chunk: impl Into<Bytes>) -> Result<()> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len() as u64;
        match block_interruptibly(self.shared.channel.push(chunk)) {
            Ok(pushed) => pushed?,
            Err(err) => {
                self.shared.channel.abort("upload producer interrupted");
                return Err(err);
            }
        }
        self.shared.sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Async form of [`push`](Self::push) for producers running on a runtime.
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<()> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len() as u64;
        self.shared.channel.push(chunk).await?;
        self.shared.sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Finish the body. Already pushed chunks are still delivered.
    pub fn close(&self) {
        self.shared.channel.close();
    }

    /// Fail the body. The request consuming it fails with `message`.
    pub fn abort(&self, message: impl Into<String>) {
        self.shared.channel.abort(message);
    }

    /// Hand the consumer end to the transport engine.
    ///
    /// Succeeds once per upload; later calls fail with [`Error::Consumed`].
    pub fn take_source(&self) -> Result<BodySource> {
        if self.shared.source_taken.swap(true, Ordering::SeqCst) {
            return Err(Error::Consumed("upload stream"));
        }
        Ok(BodySource {
            channel: self.shared.channel.clone(),
            received: 0,
            done: false,
        })
    }

    /// Total bytes accepted by `push`/`send`.
    pub fn sent_bytes(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.channel.capacity()
    }

    pub fn state(&self) -> ChannelState {
        self.shared.channel.state()
    }
}

impl std::fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("channel", &self.shared.channel)
            .field("sent", &self.sent_bytes())
            .finish()
    }
}

/// Engine-side consumer of an [`UploadStream`].
///
/// Yields chunks until the producer closes (end of body) or aborts
/// ([`Error::Aborted`] carrying the producer's message). Dropping the
/// source tells blocked producers the body is no longer wanted.
#[derive(Debug)]
pub struct BodySource {
    channel: BoundedChannel<Bytes>,
    received: u64,
    done: bool,
}

impl BodySource {
    /// Next chunk of the body; `None` once the body is complete.
    ///
    /// After the first error the source is exhausted.
    pub async fn recv(&mut self) -> Option<Result<Bytes>> {
        if self.done {
            return None;
        }
        match self.channel.pop().await {
            Some(Ok(chunk)) => {
                self.received += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err.into()))
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    /// Fail the upload from the engine side, e.g. after a connection reset,
    /// so producers stop with the same reason the request failed with.
    pub fn abort(&self, reason: impl Into<String>) {
        self.channel.abort(reason);
    }

    /// A handle that can still fail the upload after this source has been
    /// moved into a request body and dropped by the engine.
    pub fn abort_handle(&self) -> UploadAbortHandle {
        UploadAbortHandle {
            channel: self.channel.clone(),
        }
    }

    /// Bytes handed to the engine so far.
    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    /// Adapt the source into a `Stream` for body types built on streams.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>> {
        Box::pin(futures_util::stream::unfold(self, |mut source| async move {
            let item = source.recv().await?;
            Some((item, source))
        }))
    }
}

impl Drop for BodySource {
    fn drop(&mut self) {
        self.channel.disconnect();
    }
}

/// Engine-side abort for an upload whose [`BodySource`] is owned elsewhere.
///
/// A transport that fails a request reports the failure here so producers
/// see the request's error instead of a plain `Closed`.
#[derive(Debug, Clone)]
pub struct UploadAbortHandle {
    channel: BoundedChannel<Bytes>,
}

impl UploadAbortHandle {
    /// Fail the upload with `reason`.
    ///
    /// Overrides the disconnect left by a dropped [`BodySource`]. Returns
    /// `false` when the body was already fully delivered or aborted.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let aborted = self.channel.fail(reason);
        if aborted {
            tracing::debug!("upload failed by transport");
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_invalid() {
        assert_eq!(UploadStream::new(0).unwrap_err(), Error::InvalidCapacity(0));
    }

    #[tokio::test]
    async fn source_drains_pushed_chunks_in_order() {
        let upload = UploadStream::new(4).unwrap();
        let mut source = upload.take_source().unwrap();

        upload.send("chunk-0").await.unwrap();
        upload.send("chunk-1").await.unwrap();
        upload.send(Bytes::new()).await.unwrap();
        upload.close();

        assert_eq!(source.recv().await, Some(Ok(Bytes::from("chunk-0"))));
        assert_eq!(source.recv().await, Some(Ok(Bytes::from("chunk-1"))));
        assert_eq!(source.recv().await, None);
        assert_eq!(source.received_bytes(), 14);
        assert_eq!(upload.sent_bytes(), 14);
    }

    #[tokio::test]
    async fn abort_handle_outlives_dropped_source() {
        let upload = UploadStream::new(2).unwrap();
        let source = upload.take_source().unwrap();
        let handle = source.abort_handle();
        drop(source);
        assert_eq!(upload.send("early").await, Err(Error::Closed));

        assert!(handle.abort("connection refused"));
        assert_eq!(
            upload.send("late").await,
            Err(Error::Aborted("connection refused".into()))
        );
        assert_eq!(upload.state(), ChannelState::Aborted("connection refused".into()));
    }

    #[tokio::test]
    async fn abort_handle_keeps_producer_reason() {
        let upload = UploadStream::new(2).unwrap();
        let source = upload.take_source().unwrap();
        let handle = source.abort_handle();
        upload.abort("disk read failed");
        drop(source);

        assert!(!handle.abort("body error: disk read failed"));
        assert_eq!(upload.state(), ChannelState::Aborted("disk read failed".into()));
    }

    #[test]
    fn source_can_only_be_taken_once() {
        let upload = UploadStream::new(2).unwrap();
        let _source = upload.take_source().unwrap();
        assert_eq!(
            upload.clone().take_source().unwrap_err(),
            Error::Consumed("upload stream")
        );
    }

    #[tokio::test]
    async fn abort_reaches_engine_with_message() {
        let upload = UploadStream::new(2).unwrap();
        let mut source = upload.take_source().unwrap();
        upload.send("partial").await.unwrap();
        upload.abort("disk read failed");

        assert_eq!(
            source.recv().await,
            Some(Err(Error::Aborted("disk read failed".into())))
        );
        assert_eq!(source.recv().await, None);
        assert_eq!(
            upload.send("more").await,
            Err(Error::Aborted("disk read failed".into()))
        );
    }

    #[tokio::test]
    async fn dropping_last_handle_without_close_aborts() {
        let upload = UploadStream::new(2).unwrap();
        let mut source = upload.take_source().unwrap();
        let second = upload.clone();
        drop(upload);
        second.send("still open").await.unwrap();
        drop(second);

        // The abort discards the undelivered chunk.
        assert_eq!(
            source.recv().await,
            Some(Err(Error::Aborted("upload stream dropped before close".into())))
        );
    }

    #[tokio::test]
    async fn dropping_after_close_keeps_body_complete() {
        let upload = UploadStream::new(2).unwrap();
        let mut source = upload.take_source().unwrap();
        upload.send("done").await.unwrap();
        upload.close();
        drop(upload);

        assert_eq!(source.recv().await, Some(Ok(Bytes::from("done"))));
        assert_eq!(source.recv().await, None);
    }

    #[tokio::test]
    async fn dropping_source_rejects_producers() {
        let upload = UploadStream::new(1).unwrap();
        let source = upload.take_source().unwrap();
        drop(source);
        assert_eq!(upload.send("late").await, Err(Error::Closed));
    }

    #[tokio::test]
    async fn into_stream_ends_after_error() {
        let upload = UploadStream::new(2).unwrap();
        let stream = upload.take_source().unwrap().into_stream();
        upload.send("a").await.unwrap();
        upload.abort("boom");

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Err(Error::Aborted("boom".into()))]);
    }

    #[test]
    fn blocking_push_waits_for_engine() {
        let upload = UploadStream::new(1).unwrap();
        let mut source = upload.take_source().unwrap();

        let producer = {
            let upload = upload.clone();
            std::thread::spawn(move || {
                for i in 0..5 {
                    upload.push(format!("chunk-{i}")).unwrap();
                }
                upload.close();
            })
        };

        let received = crate::rt::block_on(async {
            let mut chunks = Vec::new();
            while let Some(chunk) = source.recv().await {
                tokio::time::sleep(Duration::from_millis(2)).await;
                chunks.push(chunk.unwrap());
            }
            chunks
        });
        producer.join().unwrap();

        let expected: Vec<Bytes> = (0..5).map(|i| Bytes::from(format!("chunk-{i}"))).collect();
        assert_eq!(received, expected);
    }
}
