//! Wires the connection table, event bus, and batch sequencer together
//! behind the small set of operations `main`'s shell drives.
//!
//! Grounded on `core/src/host/mod.rs`'s `Host` facade, which held exactly
//! the handles its callers needed and nothing of the wire protocol itself.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use warp_core::batch::sequencer::Executor;
use warp_core::batch::{Batch, Sequencer};
use warp_core::command;
use warp_core::connection::ConnectionTable;
use warp_core::event::EventBus;
use warp_core::job::{return_code, ConnectionId, JobEvent, JobId, JobRegistry, JobSnapshot, Source};
use warp_core::proto::command_client::CommandClient;
use warp_core::{Error, Result};

/// Runs one [`warp_core::batch::CommandDef`] by delegating straight to
/// [`command::run_spec`] — unlike the shell router, the sequencer already
/// has a fully resolved `ExecSpec` (env, working dir, stdin) and has no
/// typed line to parse.
struct RpcExecutor {
    client: CommandClient<Channel>,
}

#[async_trait::async_trait]
impl Executor for RpcExecutor {
    async fn run(
        &self,
        job_id: JobId,
        _connection_id: ConnectionId,
        def: &warp_core::batch::CommandDef,
        cancel: CancellationToken,
        bus: EventBus,
    ) -> i32 {
        let mut client = self.client.clone();
        command::run_spec(job_id, def.exec.clone(), def.stdin.clone(), &mut client, &bus, cancel).await
    }
}

/// The controller's live state for one process: every open connection plus
/// the single job registry consumer backing the whole session.
pub struct App {
    pub connections: ConnectionTable,
    bus: EventBus,
    registry_handle: JoinHandle<JobRegistry>,
}

impl App {
    pub fn new() -> Self {
        let (bus, registry_handle) = EventBus::spawn(256);
        App {
            connections: ConnectionTable::new(),
            bus,
            registry_handle,
        }
    }

    pub async fn connect(&mut self, addr: &str) -> Result<ConnectionId> {
        self.connections.connect(addr).await
    }

    pub async fn delete(&mut self, id: ConnectionId) {
        self.connections.delete(id, &self.bus).await;
    }

    /// Run one typed command line against a single connection's shell and
    /// wait for it to reach a terminal state. Returns the job id so the
    /// caller can fetch its output via [`App::job`].
    pub async fn exec(&mut self, connection_id: ConnectionId, command_line: &str) -> Result<JobId> {
        let job_id = JobId::new();
        let cancel = CancellationToken::new();
        self.bus
            .post(JobEvent::Started {
                job_id,
                connection_id,
                command_label: command_line.to_owned(),
                source: Source::Shell,
                cancel: cancel.clone(),
            })
            .await;

        let conn = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| Error::Remote("unknown connection".into()))?;
        conn.push_history(command_line);
        let code = command::execute(job_id, connection_id, command_line, &mut conn.client, &self.bus, cancel)
            .await
            .unwrap_or(return_code::TRANSPORT_FAILURE);

        self.bus
            .post(JobEvent::Completed {
                job_id,
                return_code: code,
            })
            .await;
        Ok(job_id)
    }

    /// Fan `command_line` out to every open connection. Returns immediately
    /// with the spawned job ids; callers that want a summary should poll
    /// [`App::job`] until each reaches a terminal return code.
    pub fn run_all(&self, command_line: &str) -> Vec<JobId> {
        warp_core::dispatcher::run_all(&self.connections, command_line, &self.bus)
    }

    pub async fn import(&mut self, connection_id: ConnectionId, path: &Path) -> Result<Vec<String>> {
        let batch = Batch::load(path).await?;
        let names = batch.commands.iter().map(|c| c.name.clone()).collect();
        let client = self
            .connections
            .get(connection_id)
            .ok_or_else(|| Error::Remote("unknown connection".into()))?
            .client
            .clone();
        let executor = Arc::new(RpcExecutor { client });
        let (history_tx, mut history_rx) = mpsc::unbounded_channel();
        let sequencer = Sequencer::new(connection_id, executor, self.bus.clone(), history_tx);
        sequencer.run(batch.commands).await;

        if let Some(conn) = self.connections.get_mut(connection_id) {
            while let Ok(line) = history_rx.try_recv() {
                conn.push_history(line);
            }
        }
        Ok(names)
    }

    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.bus.list_jobs().await
    }

    pub async fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.bus.get_job(id).await
    }

    /// Poll until `job_id` has a recorded return code. Used by `run-all`
    /// and `import`, which both need to print a summary before the
    /// controller moves on.
    pub async fn wait_for(&self, job_id: JobId) -> JobSnapshot {
        loop {
            if let Some(job) = self.bus.get_job(job_id).await {
                if job.return_code.is_some() {
                    return job;
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn shutdown(self) -> JobRegistry {
        drop(self.bus);
        self.registry_handle
            .await
            .expect("registry consumer task panicked")
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
