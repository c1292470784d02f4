//! Command router: the single entry point that turns a user-typed command
//! line into a `RunExecutable` invocation and relays its output onto the
//! event bus.
//!
//! Recognizes exactly one keyword, `exec <path> [args…]`; a blank line is a
//! no-op success, anything else unrecognized is reported to stderr and
//! still treated as a no-op success. [`parse`] is kept pure and separate
//! from invocation so the grammar is unit-testable without a live client;
//! output goes straight to `bus.post` rather than through caller-supplied
//! callbacks, since the event bus already is that surface.

pub mod client;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::error::{Error, Result};
use crate::event::EventBus;
use crate::job::{ConnectionId, ExecSpec, JobEvent, JobId, Stream};
use crate::proto::command_client::CommandClient;

use client::DataChannels;

/// What one command line resolves to, independent of any client or event
/// bus — split out so the `exec <path> [args…]` grammar is testable on its
/// own.
#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    Noop,
    Unrecognized(String),
    Exec(ExecSpec),
}

fn parse(command_line: &str) -> Result<Parsed> {
    let trimmed = command_line.trim();
    if trimmed.is_empty() {
        return Ok(Parsed::Noop);
    }

    let mut tokens = trimmed.split_whitespace();
    let keyword = tokens.next().expect("non-empty after trim has a first token");
    if keyword != "exec" {
        return Ok(Parsed::Unrecognized(trimmed.to_owned()));
    }

    let command = tokens.next().ok_or(Error::EmptyCommand)?;
    let args: Vec<String> = tokens.map(str::to_owned).collect();
    Ok(Parsed::Exec(ExecSpec::new(command, args)))
}

/// Execute one command line against `client`, relaying output as
/// [`JobEvent::Output`] events tagged with `job_id`. Returns the final
/// return code. Recognizes exactly one keyword, `exec <path> [args…]`; an
/// empty line is a no-op success; anything else is reported to stderr and
/// also treated as a no-op success, matching the source router's fallback.
pub async fn execute(
    job_id: JobId,
    connection_id: ConnectionId,
    command_line: &str,
    client: &mut CommandClient<Channel>,
    bus: &EventBus,
    cancel: CancellationToken,
) -> Result<i32> {
    let _ = connection_id;
    match parse(command_line)? {
        Parsed::Noop => Ok(0),
        Parsed::Unrecognized(line) => {
            bus.post(JobEvent::Output {
                job_id,
                stream: Stream::Stderr,
                bytes: format!("unrecognized command: {line}\n").into_bytes(),
            })
            .await;
            Ok(0)
        }
        Parsed::Exec(spec) => Ok(run_spec(job_id, spec, None, client, bus, cancel).await),
    }
}

/// Run an already-resolved [`ExecSpec`] against `client`, relaying output
/// as [`JobEvent::Output`] events tagged with `job_id` and, if `stdin` is
/// given, writing it as the command's sole input before closing the pipe.
/// Shared by the shell router above and the batch sequencer's executor,
/// which builds its `ExecSpec`s directly from a command definition rather
/// than parsing a typed line.
pub async fn run_spec(
    job_id: JobId,
    spec: ExecSpec,
    stdin: Option<Vec<u8>>,
    client: &mut CommandClient<Channel>,
    bus: &EventBus,
    cancel: CancellationToken,
) -> i32 {
    let (stdin_tx, stdin_rx) = mpsc::channel(1);
    if let Some(bytes) = stdin {
        let _ = stdin_tx.send(bytes).await;
    }
    drop(stdin_tx);
    let (stdout_tx, mut stdout_rx) = mpsc::channel(1);
    let (stderr_tx, mut stderr_rx) = mpsc::channel(1);
    let data = DataChannels {
        stdout: stdout_tx,
        stderr: stderr_tx,
    };

    let forward_bus = bus.clone();
    let forward = tokio::spawn(async move {
        let mut stdout_closed = false;
        let mut stderr_closed = false;
        loop {
            tokio::select! {
                chunk = stdout_rx.recv(), if !stdout_closed => {
                    match chunk {
                        Some(bytes) => {
                            forward_bus.post(JobEvent::Output { job_id, stream: Stream::Stdout, bytes }).await;
                        }
                        None => stdout_closed = true,
                    }
                }
                chunk = stderr_rx.recv(), if !stderr_closed => {
                    match chunk {
                        Some(bytes) => {
                            forward_bus.post(JobEvent::Output { job_id, stream: Stream::Stderr, bytes }).await;
                        }
                        None => stderr_closed = true,
                    }
                }
            }
            if stdout_closed && stderr_closed {
                break;
            }
        }
    });

    let code = client::run_executable(client, spec, stdin_rx, data, cancel).await;
    let _ = forward.await;
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_a_no_op() {
        assert_eq!(parse("   ").unwrap(), Parsed::Noop);
        assert_eq!(parse("").unwrap(), Parsed::Noop);
    }

    #[test]
    fn unrecognized_keyword_is_reported_not_rejected() {
        assert_eq!(
            parse("frobnicate things").unwrap(),
            Parsed::Unrecognized("frobnicate things".into())
        );
    }

    #[test]
    fn exec_splits_path_and_args_on_whitespace() {
        let Parsed::Exec(spec) = parse("exec /bin/echo hello world").unwrap() else {
            panic!("expected Exec");
        };
        assert_eq!(spec.command, "/bin/echo");
        assert_eq!(spec.args, vec!["hello", "world"]);
    }

    #[test]
    fn bare_exec_with_no_path_is_an_error() {
        assert!(matches!(parse("exec"), Err(Error::EmptyCommand)));
    }
}
