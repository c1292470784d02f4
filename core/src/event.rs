//! The event bus: a single-consumer channel of [`JobEvent`]s.
//!
//! Producers never hold a reference to the registry or to each other —
//! only to an [`EventBus`] handle, which is `Clone` and cheap to hand to
//! every spawned task. `tokio::sync::mpsc` already preserves per-sender
//! FIFO order, which is all a job's `Started ≺ Output* ≺ Completed`
//! ordering needs.

use tokio::sync::{mpsc, oneshot};

use crate::job::{ConnectionId, JobEvent, JobId, JobRegistry, JobSnapshot, Query};

/// A cloneable handle producers use to post events; the registry holds the
/// matching [`mpsc::Receiver`]s and is the bus's sole consumer.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<JobEvent>,
    cancel_tx: mpsc::Sender<ConnectionId>,
    query_tx: mpsc::Sender<Query>,
}

impl EventBus {
    /// Create a bus and spawn the registry's consumer loop on it. Returns
    /// the bus handle and a join handle yielding the registry once every
    /// event sender has been dropped (used by tests to inspect final
    /// state).
    pub fn spawn(buffer: usize) -> (Self, tokio::task::JoinHandle<JobRegistry>) {
        let (tx, rx) = mpsc::channel(buffer);
        let (cancel_tx, cancel_rx) = mpsc::channel(buffer);
        let (query_tx, query_rx) = mpsc::channel(buffer);
        let registry = JobRegistry::new();
        let handle = tokio::spawn(registry.run(rx, cancel_rx, query_rx));
        (
            EventBus {
                tx,
                cancel_tx,
                query_tx,
            },
            handle,
        )
    }

    /// Post an event, awaiting space in the bus's queue. Blocking here
    /// backpressures the producer, never the consumer.
    pub async fn post(&self, event: JobEvent) {
        // The only way this fails is if the registry's consumer task has
        // already exited (e.g. during shutdown); dropping the event is the
        // right behavior since there is nobody left to observe it.
        let _ = self.tx.send(event).await;
    }

    /// Cancel every non-terminal job bound to `connection_id`. The
    /// registry is the only holder of each job's cancel handle, so
    /// deletion is plumbed through the bus rather than reaching into the
    /// registry directly.
    pub async fn cancel_connection(&self, connection_id: ConnectionId) {
        let _ = self.cancel_tx.send(connection_id).await;
    }

    /// Snapshot every job currently known to the registry, for the
    /// `jobs` shell view.
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.query_tx.send(Query::All(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot one job by id, for the `job <id>` shell view.
    pub async fn get_job(&self, id: JobId) -> Option<JobSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.query_tx.send(Query::One(id, tx)).await.ok()?;
        rx.await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ConnectionId, JobId, Source, Stream};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn fifo_per_producer() {
        let (bus, handle) = EventBus::spawn(16);
        let conn = ConnectionId::new();
        let job_id = JobId::new();

        bus.post(JobEvent::Started {
            job_id,
            connection_id: conn,
            command_label: "echo hi".into(),
            source: Source::Shell,
            cancel: CancellationToken::new(),
        })
        .await;
        bus.post(JobEvent::Output {
            job_id,
            stream: Stream::Stdout,
            bytes: b"a".to_vec(),
        })
        .await;
        bus.post(JobEvent::Output {
            job_id,
            stream: Stream::Stdout,
            bytes: b"b".to_vec(),
        })
        .await;
        bus.post(JobEvent::Completed {
            job_id,
            return_code: 0,
        })
        .await;

        drop(bus);
        let registry = handle.await.unwrap();
        let job = registry.get(job_id).unwrap();
        assert_eq!(job.stdout, b"ab");
        assert_eq!(job.return_code, Some(0));
    }

    #[tokio::test]
    async fn query_reads_live_state_without_stopping_the_consumer() {
        let (bus, handle) = EventBus::spawn(16);
        let conn = ConnectionId::new();
        let job_id = JobId::new();

        bus.post(JobEvent::Started {
            job_id,
            connection_id: conn,
            command_label: "echo hi".into(),
            source: Source::Shell,
            cancel: CancellationToken::new(),
        })
        .await;

        let all = bus.list_jobs().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, job_id);

        let one = bus.get_job(job_id).await.unwrap();
        assert_eq!(one.command_label, "echo hi");
        assert!(bus.get_job(JobId::new()).await.is_none());

        bus.post(JobEvent::Completed {
            job_id,
            return_code: 0,
        })
        .await;
        drop(bus);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_connection_fires_non_terminal_jobs_only() {
        let (bus, handle) = EventBus::spawn(16);
        let conn = ConnectionId::new();
        let running = JobId::new();
        let finished = JobId::new();
        let running_cancel = CancellationToken::new();
        let finished_cancel = CancellationToken::new();

        bus.post(JobEvent::Started {
            job_id: running,
            connection_id: conn,
            command_label: "sleep 30".into(),
            source: Source::Shell,
            cancel: running_cancel.clone(),
        })
        .await;
        bus.post(JobEvent::Started {
            job_id: finished,
            connection_id: conn,
            command_label: "echo hi".into(),
            source: Source::Shell,
            cancel: finished_cancel.clone(),
        })
        .await;
        bus.post(JobEvent::Completed {
            job_id: finished,
            return_code: 0,
        })
        .await;

        bus.cancel_connection(conn).await;

        // Give the registry's consumer task a chance to process the
        // cancel before asserting against the tokens.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(running_cancel.is_cancelled());
        assert!(!finished_cancel.is_cancelled());

        drop(bus);
        handle.await.unwrap();
    }
}
