//! Engine-fed response bodies.
//!
//! [`DownloadStream::channel`] creates both ends: the engine keeps the
//! [`BodySink`] and pushes response chunks as they arrive, the caller keeps
//! the [`DownloadStream`] and iterates.
//!
//! ```text
//!   engine task ── BodySink::send ──► [ bounded channel ] ──► DownloadStream::next
//!        ▲                                                        │
//!        └──────────── closed() resolves on disconnect ◄──────────┘
//! ```

use std::iter::FusedIterator;

use bytes::{Bytes, BytesMut};

use crate::cancel::CancellationToken;
use crate::channel::BoundedChannel;
use crate::error::{Error, Result};
use crate::interrupt::block_interruptibly;

/// Caller-side consumer of a response body.
///
/// A lazy, finite sequence of chunks that cannot be restarted. Each step
/// waits until a chunk arrives, the body ends, the engine fails it, or the
/// attached [`CancellationToken`] fires. Cancellation and interruption end
/// the stream with an error instead of a silent truncation.
///
/// As an [`Iterator`] it blocks the calling thread; [`recv`](Self::recv) is
/// the async form.
pub struct DownloadStream {
    channel: BoundedChannel<Bytes>,
    token: Option<CancellationToken>,
    received: u64,
    finished: bool,
}

/// Engine-side producer of a response body.
///
/// Dropping a sink without [`finish`](Self::finish) or [`fail`](Self::fail)
/// aborts the stream so the caller never mistakes a lost connection for a
/// complete body.
pub struct BodySink {
    channel: BoundedChannel<Bytes>,
    sent: u64,
    finished: bool,
}

impl DownloadStream {
    /// Create a connected sink and stream holding at most `capacity` chunks.
    pub fn channel(capacity: usize) -> Result<(BodySink, DownloadStream)> {
        let channel = BoundedChannel::new(capacity)?;
        let sink = BodySink {
            channel: channel.clone(),
            sent: 0,
            finished: false,
        };
        let stream = DownloadStream {
            channel,
            token: None,
            received: 0,
            finished: false,
        };
        Ok((sink, stream))
    }

    /// Stop iteration with [`Error::Cancelled`] once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn set_cancellation(&mut self, token: Option<CancellationToken>) {
        self.token = token;
    }

    /// Next chunk; `None` at the end of the body.
    pub async fn recv(&mut self) -> Option<Result<Bytes>> {
        if self.finished {
            return None;
        }

        let popped = match &self.token {
            Some(token) if token.is_cancelled() => None,
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                popped = self.channel.pop() => Some(popped),
            },
            None => Some(self.channel.pop().await),
        };

        match popped {
            None => Some(self.fail_locally("download cancelled", Error::Cancelled)),
            Some(Some(Ok(chunk))) => {
                self.received += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Some(Some(Err(err))) => {
                self.finished = true;
                Some(Err(err.into()))
            }
            Some(None) => {
                self.finished = true;
                None
            }
        }
    }

    /// Blocking form of [`recv`](Self::recv).
    ///
    /// If the calling thread is interrupted while waiting, the engine is
    /// told to stop and [`Error::Interrupted`] is returned.
    ///
    /// # Panics
    ///
    /// Panics inside a current-thread runtime, see [`crate::rt::block_on`].
    pub fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        match block_interruptibly(self.recv()) {
            Ok(item) => item,
            Err(err) => Some(self.fail_locally("download interrupted", err)),
        }
    }

    /// Drain the rest of the body into one buffer.
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.recv().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Blocking form of [`into_bytes`](Self::into_bytes).
    pub fn collect_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk() {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Bytes delivered to the caller so far.
    pub fn received_bytes(&self) -> u64 {
        self.received
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn fail_locally(&mut self, reason: &str, err: Error) -> Result<Bytes> {
        self.finished = true;
        self.channel.abort(reason);
        tracing::debug!(
            received = self.received_bytes(),
            error = %err,
            "download stopped by caller"
        );
        Err(err)
    }
}

impl Iterator for DownloadStream {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}

impl FusedIterator for DownloadStream {}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        self.channel.disconnect();
    }
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("channel", &self.channel)
            .field("received", &self.received_bytes())
            .field("finished", &self.finished)
            .finish()
    }
}

impl BodySink {
    /// Deliver one chunk, waiting while the caller is behind.
    ///
    /// Fails with [`Error::Closed`] once the caller dropped its stream and
    /// with [`Error::Aborted`] once the caller cancelled or was interrupted.
    pub async fn send(&mut self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len() as u64;
        self.channel.push(chunk).await?;
        self.sent += len;
        Ok(())
    }

    /// End the body successfully.
    pub fn finish(mut self) {
        self.finished = true;
        self.channel.close();
    }

    /// End the body with a transport failure.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.finished = true;
        self.channel.abort(reason);
    }

    /// Resolves once the caller side stopped listening or the body ended.
    pub async fn closed(&self) {
        self.channel.terminated().await
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_terminated()
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent
    }
}

impl Drop for BodySink {
    fn drop(&mut self) {
        if !self.finished
            && self
                .channel
                .abort_if_open("transport dropped response body before completion")
        {
            tracing::warn!(sent = self.sent, "response body abandoned by transport");
        }
    }
}

impl std::fmt::Debug for BodySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodySink")
            .field("channel", &self.channel)
            .field("sent", &self.sent)
            .finish()
    }
}
