//! The batch sequencer: replays a validated [`super::Batch`] against one
//! connection, enforcing expectation gates between commands.
//!
//! Each synchronous command's return code is handed to its successor over a
//! one-shot channel, write-once by the command that ran and read-once by
//! whichever successor needs to gate on it; an async command's channel is
//! simply never read, since it does not gate anything.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::EventBus;
use crate::job::{return_code, ConnectionId, JobEvent, JobId, Source, Stream};

use super::CommandDef;

/// What actually runs a command against a connection: opens the RPC
/// stream, forwards output as [`JobEvent::Output`], and returns the final
/// return code. Abstracted so the sequencer's ordering and expectation
/// logic is testable without a live RPC client — the controller binary
/// supplies the real implementation via [`crate::command::router`].
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        job_id: JobId,
        connection_id: ConnectionId,
        def: &CommandDef,
        cancel: CancellationToken,
        bus: EventBus,
    ) -> i32;
}

pub struct Sequencer<E> {
    connection_id: ConnectionId,
    executor: Arc<E>,
    bus: EventBus,
    history: mpsc::UnboundedSender<String>,
}

impl<E: Executor + 'static> Sequencer<E> {
    pub fn new(
        connection_id: ConnectionId,
        executor: Arc<E>,
        bus: EventBus,
        history: mpsc::UnboundedSender<String>,
    ) -> Self {
        Sequencer {
            connection_id,
            executor,
            bus,
            history,
        }
    }

    /// Run every command in `commands` in order. Returns once every command
    /// has at least started — an async command may still be running in the
    /// background when this returns.
    pub async fn run(&self, commands: Vec<CommandDef>) {
        let mut prev: Option<(CommandDef, oneshot::Receiver<i32>)> = None;
        let mut iter = commands.into_iter();

        while let Some(def) = iter.next() {
            if let Some((prev_def, prev_rx)) = prev.take() {
                let prev_code = prev_rx.await.unwrap_or(return_code::TRANSPORT_FAILURE);
                if !prev_def.expectation.matches(prev_code) {
                    self.skip(&def).await;
                    for rest in iter {
                        self.skip(&rest).await;
                    }
                    return;
                }
            }

            let job_id = JobId::new();
            let cancel = CancellationToken::new();
            debug!(name = %def.name, %job_id, "running batch command");
            self.bus
                .post(JobEvent::Started {
                    job_id,
                    connection_id: self.connection_id,
                    command_label: def.exec.display_line(),
                    source: Source::Import,
                    cancel: cancel.clone(),
                })
                .await;
            let _ = self
                .history
                .send(crate::fmt::history_header(&def.exec.command, &def.exec.args));

            let run_cancel = match def.timeout {
                Some(timeout) => compose_timeout(cancel, timeout),
                None => cancel,
            };

            if def.is_async {
                let executor = self.executor.clone();
                let bus = self.bus.clone();
                let connection_id = self.connection_id;
                let def_for_task = def.clone();
                debug!(name = %def.name, %job_id, "dispatched async command, not gating successors");
                tokio::spawn(async move {
                    let code = executor
                        .run(job_id, connection_id, &def_for_task, run_cancel, bus.clone())
                        .await;
                    bus.post(JobEvent::Completed {
                        job_id,
                        return_code: code,
                    })
                    .await;
                });
                // Async commands do not gate successors.
                prev = None;
            } else {
                let code = self
                    .executor
                    .run(job_id, self.connection_id, &def, run_cancel, self.bus.clone())
                    .await;
                self.bus
                    .post(JobEvent::Completed {
                        job_id,
                        return_code: code,
                    })
                    .await;
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(code);
                prev = Some((def, rx));
            }
        }
    }

    async fn skip(&self, def: &CommandDef) {
        let job_id = JobId::new();
        warn!(name = %def.name, %job_id, "skipping command, predecessor did not satisfy expectation");
        self.bus
            .post(JobEvent::Started {
                job_id,
                connection_id: self.connection_id,
                command_label: def.exec.display_line(),
                source: Source::Import,
                cancel: CancellationToken::new(),
            })
            .await;
        self.bus
            .post(JobEvent::Output {
                job_id,
                stream: Stream::Stderr,
                bytes: b"command did not satisfy expectation".to_vec(),
            })
            .await;
        self.bus
            .post(JobEvent::Completed {
                job_id,
                return_code: return_code::SKIPPED,
            })
            .await;
    }
}

/// Compose the command's own cancellation handle with a deadline derived
/// from its timeout. `CancellationToken::child_token` already propagates
/// the parent's cancellation down, so the spawned watcher only has to
/// enforce the one direction it doesn't: firing the deadline.
fn compose_timeout(parent: CancellationToken, timeout: Duration) -> CancellationToken {
    let child = parent.child_token();
    let watch = child.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => watch.cancel(),
            _ = watch.cancelled() => {}
        }
    });
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Expectation;
    use crate::job::ExecSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeExecutor {
        codes: Mutex<Vec<i32>>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Executor for FakeExecutor {
        async fn run(
            &self,
            _job_id: JobId,
            _connection_id: ConnectionId,
            _def: &CommandDef,
            _cancel: CancellationToken,
            _bus: EventBus,
        ) -> i32 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.codes.lock().unwrap().remove(0)
        }
    }

    fn def(name: &str, expectation: Expectation, is_async: bool) -> CommandDef {
        CommandDef {
            name: name.into(),
            is_async,
            exec: ExecSpec::new("echo", vec![name.into()]),
            expectation,
            timeout: None,
            stdin: None,
        }
    }

    #[tokio::test]
    async fn expectation_gate_skips_remaining_commands() {
        let executor = Arc::new(FakeExecutor {
            codes: Mutex::new(vec![3]),
            calls: AtomicUsize::new(0),
        });
        let (bus, handle) = EventBus::spawn(64);
        let conn = ConnectionId::new();
        let (history_tx, mut history_rx) = mpsc::unbounded_channel();
        let seq = Sequencer::new(conn, executor.clone(), bus.clone(), history_tx);

        let commands = vec![
            def("a", Expectation::Eq(0), false),
            def("b", Expectation::Any, false),
        ];
        seq.run(commands).await;
        drop(bus);
        let registry = handle.await.unwrap();

        // "a" ran (consuming its fake code), "b" never did.
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let jobs: Vec<_> = registry.all().collect();
        assert_eq!(jobs.len(), 2);
        let completed_a = jobs.iter().find(|j| j.command_label.contains('a')).unwrap();
        assert_eq!(completed_a.return_code, Some(3));
        let skipped_b = jobs.iter().find(|j| j.command_label.contains('b')).unwrap();
        assert_eq!(skipped_b.return_code, Some(return_code::SKIPPED));
        assert!(String::from_utf8_lossy(&skipped_b.stderr).contains("did not satisfy expectation"));

        // Only "a" ran to completion; "b" was skipped before ever posting a
        // history header.
        assert_eq!(history_rx.try_recv().unwrap(), "$ echo a");
        assert!(history_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn async_command_does_not_gate_successor() {
        let executor = Arc::new(FakeExecutor {
            codes: Mutex::new(vec![0, 0]),
            calls: AtomicUsize::new(0),
        });
        let (bus, handle) = EventBus::spawn(64);
        let conn = ConnectionId::new();
        let (history_tx, _history_rx) = mpsc::unbounded_channel();
        let seq = Sequencer::new(conn, executor.clone(), bus.clone(), history_tx);

        let commands = vec![
            def("background", Expectation::Any, true),
            def("foreground", Expectation::Any, false),
        ];
        seq.run(commands).await;
        drop(bus);
        let registry = handle.await.unwrap();

        let jobs: Vec<_> = registry.all().collect();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.return_code == Some(0)));
    }
}
