//! Job progress reporting.
//!
//! Events are written by the orchestrator's collector only, so the sequence
//! seen by a consumer is monotonic. Consumers either receive every event
//! through a bounded channel, or poll the latest one through a `watch`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::core::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub chunks_completed: usize,
    pub chunks_total: usize,
    pub status: JobStatus,
}

impl ProgressEvent {
    pub fn new(job_id: Uuid, chunks_total: usize) -> Self {
        Self {
            job_id,
            chunks_completed: 0,
            chunks_total,
            status: JobStatus::Pending,
        }
    }

    /// Completion in percent, 100 for a job with nothing to do.
    pub fn percentage(&self) -> f64 {
        if self.chunks_total == 0 {
            return 100.0;
        }
        self.chunks_completed as f64 / self.chunks_total as f64 * 100.0
    }

    pub fn is_final(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Producer half, held by the job's collector.
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    snapshot: watch::Sender<ProgressEvent>,
}

impl ProgressSink {
    /// Sink whose events are only observable by polling.
    pub fn snapshot_only(job_id: Uuid) -> Self {
        let (snapshot, _) = watch::channel(ProgressEvent::new(job_id, 0));
        Self { tx: None, snapshot }
    }

    /// Receiver for the latest event.
    pub fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.snapshot.subscribe()
    }

    pub fn latest(&self) -> ProgressEvent {
        *self.snapshot.borrow()
    }

    /// Publish an event. Waits for channel capacity when a push consumer is
    /// attached; a dropped consumer is ignored.
    pub async fn emit(&self, event: ProgressEvent) {
        self.snapshot.send_replace(event);
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Consumer half of a push progress channel.
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressReceiver {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}

impl Stream for ProgressReceiver {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Bounded push channel plus snapshot for one job.
///
/// The stream ends once the sink is dropped, which happens when the job
/// reaches a terminal state.
pub fn progress_channel(job_id: Uuid, capacity: usize) -> (ProgressSink, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (snapshot, _) = watch::channel(ProgressEvent::new(job_id, 0));
    (
        ProgressSink {
            tx: Some(tx),
            snapshot,
        },
        ProgressReceiver { rx },
    )
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn event(job_id: Uuid, done: usize, total: usize, status: JobStatus) -> ProgressEvent {
        ProgressEvent {
            job_id,
            chunks_completed: done,
            chunks_total: total,
            status,
        }
    }

    #[test]
    fn test_percentage() {
        let id = Uuid::new_v4();
        assert_eq!(event(id, 0, 0, JobStatus::Completed).percentage(), 100.0);
        assert_eq!(event(id, 1, 4, JobStatus::Running).percentage(), 25.0);
        assert_eq!(event(id, 4, 4, JobStatus::Completed).percentage(), 100.0);
    }

    #[tokio::test]
    async fn test_events_reach_push_and_poll_consumers() {
        let id = Uuid::new_v4();
        let (sink, receiver) = progress_channel(id, 4);
        let watcher = sink.subscribe();

        sink.emit(event(id, 1, 2, JobStatus::Running)).await;
        sink.emit(event(id, 2, 2, JobStatus::Completed)).await;
        assert_eq!(watcher.borrow().chunks_completed, 2);
        drop(sink);

        let events: Vec<_> = receiver.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_final());
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_block() {
        let id = Uuid::new_v4();
        let (sink, receiver) = progress_channel(id, 1);
        drop(receiver);

        for done in 0..5 {
            sink.emit(event(id, done, 5, JobStatus::Running)).await;
        }
        assert_eq!(sink.latest().chunks_completed, 4);
    }

    #[tokio::test]
    async fn test_snapshot_only_sink() {
        let id = Uuid::new_v4();
        let sink = ProgressSink::snapshot_only(id);
        let watcher = sink.subscribe();
        sink.emit(event(id, 3, 3, JobStatus::Completed)).await;
        assert_eq!(*watcher.borrow(), event(id, 3, 3, JobStatus::Completed));
    }
}
