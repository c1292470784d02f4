//! Job records and the registry that owns them.
//!
//! A `Job` is one logical execution, tied to one command invocation on one
//! connection. The event bus in [`crate::event`] mutates it in place;
//! [`registry::JobRegistry`] is its sole owner and the only thing that ever
//! indexes it.

mod registry;

pub use registry::JobRegistry;
pub(crate) use registry::Query;

use std::collections::HashMap;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque connection identifier. A fresh 128-bit id per `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque job identifier. A fresh 128-bit id per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatcher-synthesized return codes, distinguishable from genuine child
/// exit codes (which are always `>= 0`).
pub mod return_code {
    /// Dispatcher/transport failure.
    pub const TRANSPORT_FAILURE: i32 = -1;
    /// Cancelled by the user or by a deadline.
    pub const CANCELLED: i32 = -2;
    /// Skipped because the predecessor failed its expectation gate.
    pub const SKIPPED: i32 = -3;
}

/// Where a job's command line originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Typed directly into an interactive shell against one connection.
    Shell,
    /// Fanned out across every connection by the "run-all" dispatcher.
    RunAll,
    /// Issued by the batch sequencer while replaying an imported script.
    Import,
}

/// A fully resolved executable spec, ready to hand to the RPC layer or a
/// local supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
}

impl ExecSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        ExecSpec {
            command: command.into(),
            args,
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// `$ command args…` formatted for display/history, quoting any token
    /// that contains whitespace or a double quote with C-style escaping.
    pub fn display_line(&self) -> String {
        let mut parts = vec![self.command.clone()];
        parts.extend(self.args.iter().cloned());
        parts
            .into_iter()
            .map(|tok| crate::fmt::quote_token(&tok))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One logical execution, tied to one command invocation on one connection.
/// The unit of observability and cancellation.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub connection_id: ConnectionId,
    pub command_label: String,
    pub source: Source,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub return_code: Option<i32>,
    pub started_at: Instant,
    pub completed_at: Option<Instant>,
    pub last_updated_at: Instant,
    pub cancel: Option<CancellationToken>,
}

impl Job {
    fn new(
        id: JobId,
        connection_id: ConnectionId,
        command_label: String,
        source: Source,
        cancel: Option<CancellationToken>,
    ) -> Self {
        let now = Instant::now();
        Job {
            id,
            connection_id,
            command_label,
            source,
            stdout: Vec::new(),
            stderr: Vec::new(),
            return_code: None,
            started_at: now,
            completed_at: None,
            last_updated_at: now,
            cancel,
        }
    }

    /// A job is terminal once its return code has been recorded. This
    /// happens at most once and clears the cancel handle.
    pub fn is_terminal(&self) -> bool {
        self.return_code.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// The closed, tagged sum every producer posts to the event bus. Kept
/// closed deliberately: connection-cancellation and read queries travel on
/// their own side channels rather than growing this enum with variants
/// that aren't part of a job's lifecycle.
#[derive(Debug)]
pub enum JobEvent {
    Started {
        job_id: JobId,
        connection_id: ConnectionId,
        command_label: String,
        source: Source,
        cancel: CancellationToken,
    },
    Output {
        job_id: JobId,
        stream: Stream,
        bytes: Vec<u8>,
    },
    Completed {
        job_id: JobId,
        return_code: i32,
    },
}

/// A point-in-time copy of a [`Job`], handed out by the registry in answer
/// to a query — unlike `Job` itself, which never leaves the registry's
/// consumer task.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub id: JobId,
    pub connection_id: ConnectionId,
    pub command_label: String,
    pub source: Source,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub return_code: Option<i32>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        JobSnapshot {
            id: job.id,
            connection_id: job.connection_id,
            command_label: job.command_label.clone(),
            source: job.source,
            stdout: job.stdout.clone(),
            stderr: job.stderr.clone(),
            return_code: job.return_code,
        }
    }
}

pub(crate) fn new_job(
    id: JobId,
    connection_id: ConnectionId,
    command_label: String,
    source: Source,
    cancel: Option<CancellationToken>,
) -> Job {
    Job::new(id, connection_id, command_label, source, cancel)
}
