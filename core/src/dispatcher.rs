//! Fan-out dispatcher ("run-all"): issues one command line against every
//! live connection concurrently, each in its own task, with no shared
//! waiting. A failure on one connection never affects another, and the
//! caller gets every spawned job id back immediately rather than blocking
//! on completion.

use tokio_util::sync::CancellationToken;

use crate::command;
use crate::connection::ConnectionTable;
use crate::event::EventBus;
use crate::job::{JobEvent, JobId, Source};

/// Spawn one independent execution task per connection in `table`. Does not
/// wait for any of them; a failure on one connection never affects another.
/// Returns the job ids spawned, in connection-iteration order, so a caller
/// that wants to track them (e.g. a CLI printing a summary) doesn't have to
/// re-derive them from the event stream.
pub fn run_all(table: &ConnectionTable, command_line: &str, bus: &EventBus) -> Vec<JobId> {
    let mut job_ids = Vec::new();

    for conn in table.all() {
        let job_id = JobId::new();
        job_ids.push(job_id);

        let connection_id = conn.id;
        let mut client = conn.client.clone();
        let command_line = command_line.to_owned();
        let bus = bus.clone();
        let cancel = CancellationToken::new();
        let cancel_for_job = cancel.clone();

        tokio::spawn(async move {
            bus.post(JobEvent::Started {
                job_id,
                connection_id,
                command_label: command_line.clone(),
                source: Source::RunAll,
                cancel: cancel_for_job,
            })
            .await;

            let code = match command::execute(
                job_id,
                connection_id,
                &command_line,
                &mut client,
                &bus,
                cancel,
            )
            .await
            {
                Ok(code) => code,
                Err(_) => crate::job::return_code::TRANSPORT_FAILURE,
            };

            bus.post(JobEvent::Completed {
                job_id,
                return_code: code,
            })
            .await;
        });
    }

    job_ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_table_dispatches_nothing() {
        let table = ConnectionTable::new();
        let (bus, handle) = EventBus::spawn(8);
        let job_ids = run_all(&table, "exec /bin/true", &bus);
        assert!(job_ids.is_empty());
        drop(bus);
        let registry = handle.await.unwrap();
        assert_eq!(registry.all().count(), 0);
    }
}
