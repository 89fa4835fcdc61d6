//! Transport engine seam.
//!
//! The client facade only talks to a [`Transport`]: hand it a request,
//! get back a response whose body streams through a
//! [`DownloadStream`](bodyline_bridge::DownloadStream). How the transfer
//! ended is reported separately through a [`TransferWatch`], so it stays
//! observable after the chunk stream has been dropped.

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{ClientError, ErrorKind};
use crate::request::Request;
use crate::response::Response;

/// An async HTTP engine.
///
/// `execute` resolves once the response head is available. The response
/// body is delivered through a channel holding at most `sink_capacity`
/// chunks. Dropping the returned future abandons the request.
pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        request: Request,
        sink_capacity: usize,
    ) -> BoxFuture<'static, Result<Response, ClientError>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferOutcome {
    #[default]
    InFlight,
    Completed,
    Failed {
        kind: ErrorKind,
        message: String,
    },
    /// The caller stopped reading before the body ended.
    Abandoned,
}

/// Terminal status of one transfer, independent of the chunk stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub outcome: TransferOutcome,
}

impl TransferReport {
    pub fn is_finished(&self) -> bool {
        self.outcome != TransferOutcome::InFlight
    }

    pub(crate) fn failed(bytes_sent: u64, err: &ClientError) -> Self {
        Self {
            bytes_sent,
            bytes_received: 0,
            outcome: TransferOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Read side of a transfer's report.
#[derive(Debug, Clone)]
pub struct TransferWatch {
    rx: watch::Receiver<TransferReport>,
}

impl TransferWatch {
    /// A report channel; the engine keeps the sender.
    pub fn channel() -> (watch::Sender<TransferReport>, TransferWatch) {
        let (tx, rx) = watch::channel(TransferReport::default());
        (tx, TransferWatch { rx })
    }

    /// A watch that is already finished with `report`.
    pub fn finished_with(report: TransferReport) -> Self {
        let (_tx, rx) = watch::channel(report);
        TransferWatch { rx }
    }

    /// Latest report.
    pub fn current(&self) -> TransferReport {
        self.rx.borrow().clone()
    }

    /// Wait until the engine records a terminal outcome.
    ///
    /// If the engine went away without one, the transfer counts as
    /// abandoned.
    pub async fn finished(&self) -> TransferReport {
        let mut rx = self.rx.clone();
        if let Ok(report) = rx.wait_for(TransferReport::is_finished).await {
            return report.clone();
        }
        let mut report = rx.borrow().clone();
        if !report.is_finished() {
            report.outcome = TransferOutcome::Abandoned;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_waits_for_terminal_outcome() {
        let (tx, watch) = TransferWatch::channel();
        assert!(!watch.current().is_finished());

        let waiter = {
            let watch = watch.clone();
            tokio::spawn(async move { watch.finished().await })
        };
        tx.send_modify(|report| report.bytes_received = 10);
        tx.send_modify(|report| report.outcome = TransferOutcome::Completed);

        let report = waiter.await.unwrap();
        assert_eq!(report.bytes_received, 10);
        assert_eq!(report.outcome, TransferOutcome::Completed);
    }

    #[tokio::test]
    async fn dropped_engine_counts_as_abandoned() {
        let (tx, watch) = TransferWatch::channel();
        tx.send_modify(|report| report.bytes_sent = 3);
        drop(tx);
        let report = watch.finished().await;
        assert_eq!(report.bytes_sent, 3);
        assert_eq!(report.outcome, TransferOutcome::Abandoned);
    }

    #[test]
    fn failed_report_serializes_with_kind() {
        let report = TransferReport::failed(5, &ClientError::Timeout);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["state"], "failed");
        assert_eq!(json["outcome"]["kind"], "timeout");
        assert_eq!(json["bytes_sent"], 5);
    }
}
