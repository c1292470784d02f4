//! The server-side process supervisor: bridges a local child process to a
//! bidirectional stream of frames.
//!
//! Deliberately decoupled from `tonic`/`prost` — it operates over the small
//! [`Frame`]/[`Emit`] vocabulary so the state machine can be driven by a
//! real subprocess in tests without a live gRPC stream. `crate::rpc` adapts
//! it to the generated `RunExecutableInput`/`RunExecutableResult` types and
//! supplies `outbound` as the half of a `tonic` response channel, so a
//! dropped client connection closes it exactly as a local caller dropping
//! the receiver would.

use futures::{Stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::{return_code, ExecSpec};

/// Inbound frame, decoded from whatever transport carries it.
#[derive(Debug)]
pub enum Frame {
    Options(ExecSpec),
    Stdin(Vec<u8>),
}

/// Outbound frame, encoded by whatever transport carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emit {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// The terminal frame. Sent exactly once, always last.
    Terminal(i32),
}

const PIPE_READ_CHUNK: usize = 1024;

/// Drive one execution to completion, emitting frames onto `outbound` as
/// they become available. `cancel` is the job's cancellation handle; when
/// it fires while the child is alive, the supervisor kills it and reports
/// [`return_code::CANCELLED`].
///
/// `AwaitingOptions -> Running -> Draining -> Terminated`: the first await
/// on `inbound` is the `AwaitingOptions` state; spawning the child enters
/// `Running`; the select loop below is `Draining`; sending the terminal
/// frame is `Terminated`.
pub async fn supervise<S>(mut inbound: S, outbound: mpsc::Sender<Emit>, cancel: CancellationToken)
where
    S: Stream<Item = Result<Frame, String>> + Unpin,
{
    let spec = match inbound.next().await {
        Some(Ok(Frame::Options(spec))) => spec,
        Some(Ok(Frame::Stdin(_))) => {
            reject(&outbound, "first frame must carry Options, got Stdin").await;
            return;
        }
        Some(Err(e)) => {
            reject(&outbound, &format!("failed to receive options: {e}")).await;
            return;
        }
        None => {
            reject(&outbound, "stream closed before Options was sent").await;
            return;
        }
    };

    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if let Some(dir) = spec.working_dir.as_deref().filter(|d| !d.is_empty()) {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(command = %spec.command, error = %e, "failed to start command");
            reject(&outbound, &format!("failed to start command: {e}")).await;
            return;
        }
    };
    debug!(command = %spec.command, pid = ?child.id(), "command started");

    let mut stdin = child.stdin.take();
    let stdout = child.stdout.take().expect("configured with a piped stdout");
    let stderr = child.stderr.take().expect("configured with a piped stderr");

    let (stdout_tx, mut stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, mut stderr_rx) = mpsc::unbounded_channel();
    tokio::spawn(read_pipe(stdout, stdout_tx));
    tokio::spawn(read_pipe(stderr, stderr_tx));

    let mut stdout_closed = false;
    let mut stderr_closed = false;
    let mut cancelled = false;

    // Drain both pipes to EOF before deriving the exit code, unless
    // cancelled — in which case residual pipe data is acceptable loss.
    loop {
        tokio::select! {
            biased;

            frame = inbound.next(), if stdin.is_some() => {
                match frame {
                    Some(Ok(Frame::Stdin(bytes))) => {
                        if let Some(s) = stdin.as_mut() {
                            if s.write_all(&bytes).await.is_err() {
                                stdin = None;
                            }
                        }
                    }
                    Some(Ok(Frame::Options(_))) => {}
                    Some(Err(_)) | None => stdin = None,
                }
            }
            chunk = stdout_rx.recv() => {
                match chunk {
                    Some(bytes) => { let _ = outbound.send(Emit::Stdout(bytes)).await; }
                    None => stdout_closed = true,
                }
            }
            chunk = stderr_rx.recv() => {
                match chunk {
                    Some(bytes) => { let _ = outbound.send(Emit::Stderr(bytes)).await; }
                    None => stderr_closed = true,
                }
            }
            _ = cancel.cancelled(), if !cancelled => {
                info!(command = %spec.command, "cancelled, killing child");
                cancelled = true;
                let _ = child.start_kill();
            }
            _ = outbound.closed(), if !cancelled => {
                info!(command = %spec.command, "peer disconnected, killing child");
                cancelled = true;
                let _ = child.start_kill();
            }
        }

        if cancelled || (stdout_closed && stderr_closed) {
            break;
        }
    }

    let code = if cancelled {
        let _ = child.wait().await;
        return_code::CANCELLED
    } else {
        match child.wait().await {
            Ok(status) if status.success() => 0,
            Ok(status) => match status.code() {
                Some(code) => code,
                None => {
                    reject_no_terminal(&outbound, "process terminated by signal, no exit code").await;
                    return_code::TRANSPORT_FAILURE
                }
            },
            Err(e) => {
                reject_no_terminal(&outbound, &format!("failed to wait on child: {e}")).await;
                return_code::TRANSPORT_FAILURE
            }
        }
    };

    debug!(command = %spec.command, return_code = code, "command finished");
    // If `outbound` is already closed this send is a no-op; the caller has
    // nobody left to observe the terminal frame.
    let _ = outbound.send(Emit::Terminal(code)).await;
}

async fn reject(outbound: &mpsc::Sender<Emit>, message: &str) {
    let _ = outbound.send(Emit::Stderr(message.as_bytes().to_vec())).await;
    let _ = outbound
        .send(Emit::Terminal(return_code::TRANSPORT_FAILURE))
        .await;
}

async fn reject_no_terminal(outbound: &mpsc::Sender<Emit>, message: &str) {
    let _ = outbound.send(Emit::Stderr(message.as_bytes().to_vec())).await;
}

async fn read_pipe<R>(mut pipe: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PIPE_READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::wrappers::ReceiverStream;

    fn options_only(spec: ExecSpec) -> ReceiverStream<Result<Frame, String>> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(Ok(Frame::Options(spec))).await;
            // keep tx alive long enough for the supervisor to finish, then
            // let it drop to signal no more stdin.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });
        ReceiverStream::new(rx)
    }

    async fn collect(mut rx: mpsc::Receiver<Emit>) -> Vec<Emit> {
        let mut out = Vec::new();
        while let Some(e) = rx.recv().await {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn echo_exits_zero_with_stdout() {
        let spec = ExecSpec::new("/bin/echo", vec!["hello".into()]);
        let inbound = options_only(spec);
        let (tx, rx) = mpsc::channel(16);
        supervise(inbound, tx, CancellationToken::new()).await;
        let events = collect(rx).await;

        let stdout: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                Emit::Stdout(b) => Some(b.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(stdout, b"hello\n");
        assert_eq!(events.last(), Some(&Emit::Terminal(0)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_verbatim() {
        let spec = ExecSpec::new("/bin/sh", vec!["-c".into(), "exit 7".into()]);
        let inbound = options_only(spec);
        let (tx, rx) = mpsc::channel(16);
        supervise(inbound, tx, CancellationToken::new()).await;
        let events = collect(rx).await;
        assert_eq!(events, vec![Emit::Terminal(7)]);
    }

    #[tokio::test]
    async fn missing_options_frame_reports_transport_failure() {
        let (tx_in, rx_in) = mpsc::channel::<Result<Frame, String>>(1);
        drop(tx_in);
        let inbound = ReceiverStream::new(rx_in);
        let (tx, rx) = mpsc::channel(16);
        supervise(inbound, tx, CancellationToken::new()).await;
        let events = collect(rx).await;
        assert!(matches!(events.last(), Some(Emit::Terminal(-1))));
    }

    #[tokio::test]
    async fn cancellation_reports_cancelled() {
        let spec = ExecSpec::new("/bin/sleep", vec!["30".into()]);
        let inbound = options_only(spec);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });
        supervise(inbound, tx, cancel).await;
        let events = collect(rx).await;
        assert_eq!(events, vec![Emit::Terminal(-2)]);
    }
}
