//! The single-consumer registry that owns every [`Job`] for the lifetime of
//! the process.
//!
//! Indexed two ways — by connection (ordered, for a connection's history
//! view) and by id (direct, for point lookups) — and never destroys a job
//! record, so the registry is the authoritative history for the process.
//! Because exactly one task drains the event channel, no lock is needed
//! around the maps themselves.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{ConnectionId, Job, JobEvent, JobId, JobSnapshot, Stream};

/// A read-only request answered by the registry's consumer task, since the
/// `Job` records themselves never leave it.
pub enum Query {
    All(oneshot::Sender<Vec<JobSnapshot>>),
    One(JobId, oneshot::Sender<Option<JobSnapshot>>),
}

/// Owns every job ever started, indexed two ways. Never destroys a job
/// during the process lifetime — the registry is authoritative history.
pub struct JobRegistry {
    by_connection: HashMap<ConnectionId, Vec<JobId>>,
    by_id: HashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry {
            by_connection: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.by_id.get(&id)
    }

    pub fn for_connection(&self, connection_id: ConnectionId) -> Vec<&Job> {
        self.by_connection
            .get(&connection_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Job> {
        self.by_id.values()
    }

    /// True once every job bound to `connection_id` has a recorded return
    /// code. Used by connection deletion to know when cancellation has
    /// fully taken effect.
    pub fn connection_is_drained(&self, connection_id: ConnectionId) -> bool {
        self.for_connection(connection_id)
            .into_iter()
            .all(|job| job.is_terminal())
    }

    fn apply(&mut self, event: JobEvent) {
        match event {
            JobEvent::Started {
                job_id,
                connection_id,
                command_label,
                source,
                cancel,
            } => {
                if self.by_id.contains_key(&job_id) {
                    warn!(%job_id, "ignoring duplicate Started event");
                    return;
                }
                let job = super::new_job(job_id, connection_id, command_label, source, Some(cancel));
                // A connection that no longer exists cancels immediately;
                // the caller still gets a Job record so job history stays
                // consistent even for races against connection deletion.
                self.by_connection
                    .entry(connection_id)
                    .or_default()
                    .push(job_id);
                self.by_id.insert(job_id, job);
                debug!(%job_id, %connection_id, "job started");
            }
            JobEvent::Output {
                job_id,
                stream,
                bytes,
            } => {
                let Some(job) = self.by_id.get_mut(&job_id) else {
                    debug!(%job_id, "ignoring Output for unknown job");
                    return;
                };
                if job.is_terminal() {
                    warn!(%job_id, "ignoring Output after job completed");
                    return;
                }
                match stream {
                    Stream::Stdout => job.stdout.extend_from_slice(&bytes),
                    Stream::Stderr => job.stderr.extend_from_slice(&bytes),
                }
                job.last_updated_at = std::time::Instant::now();
            }
            JobEvent::Completed {
                job_id,
                return_code,
            } => {
                let Some(job) = self.by_id.get_mut(&job_id) else {
                    debug!(%job_id, "ignoring Completed for unknown job");
                    return;
                };
                if job.is_terminal() {
                    warn!(%job_id, "ignoring duplicate Completed event");
                    return;
                }
                job.return_code = Some(return_code);
                job.completed_at = Some(std::time::Instant::now());
                job.last_updated_at = job.completed_at.unwrap();
                job.cancel = None;
                debug!(%job_id, return_code, "job completed");
            }
        }
    }

    /// Cancel every non-terminal job bound to `connection_id`. Used when a
    /// connection is deleted; the registry is the only holder of each
    /// job's cancel handle, so this has to run on the registry's own
    /// consumer task rather than reaching in from outside.
    fn cancel_connection(&self, connection_id: ConnectionId) {
        for job in self.for_connection(connection_id) {
            if let Some(cancel) = &job.cancel {
                cancel.cancel();
            }
        }
    }

    fn answer(&self, query: Query) {
        match query {
            Query::All(tx) => {
                let _ = tx.send(self.all().map(JobSnapshot::from).collect());
            }
            Query::One(id, tx) => {
                let _ = tx.send(self.get(id).map(JobSnapshot::from));
            }
        }
    }

    /// Drive the registry from a channel of lifecycle events, a sibling
    /// channel of connection-deletion cancellations, and a sibling channel
    /// of read-only queries, until the event sender side is dropped.
    /// Intended to be spawned once as the sole consumer task; the cancel
    /// and query channels may close independently without ending the loop.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<JobEvent>,
        mut cancels: mpsc::Receiver<ConnectionId>,
        mut queries: mpsc::Receiver<Query>,
    ) -> Self {
        let mut cancels_open = true;
        let mut queries_open = true;
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.apply(event),
                        None => break,
                    }
                }
                id = cancels.recv(), if cancels_open => {
                    match id {
                        Some(id) => self.cancel_connection(id),
                        None => cancels_open = false,
                    }
                }
                query = queries.recv(), if queries_open => {
                    match query {
                        Some(query) => self.answer(query),
                        None => queries_open = false,
                    }
                }
            }
        }
        self
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn started(job_id: JobId, connection_id: ConnectionId) -> JobEvent {
        JobEvent::Started {
            job_id,
            connection_id,
            command_label: "echo hi".into(),
            source: super::super::Source::Shell,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn started_then_output_then_completed() {
        let mut reg = JobRegistry::new();
        let conn = ConnectionId::new();
        let job_id = JobId::new();

        reg.apply(started(job_id, conn));
        reg.apply(JobEvent::Output {
            job_id,
            stream: Stream::Stdout,
            bytes: b"hello\n".to_vec(),
        });
        reg.apply(JobEvent::Completed {
            job_id,
            return_code: 0,
        });

        let job = reg.get(job_id).unwrap();
        assert_eq!(job.stdout, b"hello\n");
        assert_eq!(job.return_code, Some(0));
        assert!(job.cancel.is_none());
        assert!(job.is_terminal());
    }

    #[test]
    fn output_after_completed_is_ignored() {
        let mut reg = JobRegistry::new();
        let conn = ConnectionId::new();
        let job_id = JobId::new();

        reg.apply(started(job_id, conn));
        reg.apply(JobEvent::Completed {
            job_id,
            return_code: 7,
        });
        reg.apply(JobEvent::Output {
            job_id,
            stream: Stream::Stdout,
            bytes: b"too late".to_vec(),
        });

        let job = reg.get(job_id).unwrap();
        assert!(job.stdout.is_empty());
        assert_eq!(job.return_code, Some(7));
    }

    #[test]
    fn output_for_unknown_job_is_ignored() {
        let mut reg = JobRegistry::new();
        reg.apply(JobEvent::Output {
            job_id: JobId::new(),
            stream: Stream::Stderr,
            bytes: b"orphan".to_vec(),
        });
        assert_eq!(reg.all().count(), 0);
    }

    #[test]
    fn connection_is_drained_tracks_terminal_jobs() {
        let mut reg = JobRegistry::new();
        let conn = ConnectionId::new();
        let a = JobId::new();
        let b = JobId::new();

        reg.apply(started(a, conn));
        reg.apply(started(b, conn));
        assert!(!reg.connection_is_drained(conn));

        reg.apply(JobEvent::Completed {
            job_id: a,
            return_code: 0,
        });
        assert!(!reg.connection_is_drained(conn));

        reg.apply(JobEvent::Completed {
            job_id: b,
            return_code: -2,
        });
        assert!(reg.connection_is_drained(conn));
    }
}
