//! Client-side execution wrapper: opens one `RunExecutable` bidi stream and
//! multiplexes it down to a single return code plus a pair of output sinks.
//!
//! Sending and receiving run concurrently: one task drains the response
//! stream into the output sinks while the calling task forwards stdin and
//! watches for cancellation. Cancelling aborts the response-reading task
//! directly, which drops the underlying stream and propagates the
//! cancellation to the agent side of the call.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use crate::job::{return_code, ExecSpec};
use crate::proto::command_client::CommandClient;
use crate::proto::run_executable_input::Payload;
use crate::proto::{RunExecutableInput, RunExecutableResult};

/// The stdout/stderr sinks a caller supplies to receive a running command's
/// output. Capacity 1 approximates an unbuffered channel — idiomatic Rust
/// has no zero-capacity `mpsc`, so capacity 1 is the closest analogue: a
/// send blocks until the previous value has been taken.
pub struct DataChannels {
    pub stdout: mpsc::Sender<Vec<u8>>,
    pub stderr: mpsc::Sender<Vec<u8>>,
}

/// Run one command to completion over `client`, forwarding stdin bytes
/// received on `stdin_rx` and output bytes into `data`. Returns the job's
/// final return code — a genuine exit code, or one of
/// [`crate::job::return_code`]'s sentinels if the stream never reaches a
/// terminal frame cleanly.
pub async fn run_executable(
    client: &mut CommandClient<Channel>,
    spec: ExecSpec,
    mut stdin_rx: mpsc::Receiver<Vec<u8>>,
    data: DataChannels,
    cancel: CancellationToken,
) -> i32 {
    let (to_agent_tx, to_agent_rx) = mpsc::channel(1);
    if to_agent_tx
        .send(RunExecutableInput {
            payload: Some(Payload::Options((&spec).into())),
        })
        .await
        .is_err()
    {
        return return_code::TRANSPORT_FAILURE;
    }

    let response = match client.run_executable(ReceiverStream::new(to_agent_rx)).await {
        Ok(response) => response,
        Err(status) => {
            let _ = data.stderr.send(status.message().as_bytes().to_vec()).await;
            return classify_status(&status);
        }
    };
    let mut inbound = response.into_inner();

    let (done_tx, mut done_rx) = mpsc::channel::<i32>(1);
    let reader = tokio::spawn(async move {
        loop {
            match inbound.message().await {
                Ok(Some(result)) => {
                    if let Some(code) = forward_result(result, &data).await {
                        let _ = done_tx.send(code).await;
                        return;
                    }
                }
                Ok(None) => {
                    let _ = done_tx.send(return_code::TRANSPORT_FAILURE).await;
                    return;
                }
                Err(status) => {
                    let _ = done_tx.send(classify_status(&status)).await;
                    return;
                }
            }
        }
    });

    let mut stdin_open = true;
    loop {
        tokio::select! {
            biased;

            bytes = stdin_rx.recv(), if stdin_open => {
                match bytes {
                    Some(bytes) => {
                        let frame = RunExecutableInput { payload: Some(Payload::Stdin(bytes)) };
                        if to_agent_tx.send(frame).await.is_err() {
                            stdin_open = false;
                        }
                    }
                    None => stdin_open = false,
                }
            }
            _ = cancel.cancelled() => {
                // Abort the reader task rather than letting it linger: it
                // owns the response stream, and dropping that is what
                // actually tells the agent the call was cancelled.
                reader.abort();
                return return_code::CANCELLED;
            }
            code = done_rx.recv() => {
                return code.unwrap_or(return_code::TRANSPORT_FAILURE);
            }
        }
    }
}

/// Push a `Result` frame's payload to the right sink. Returns `Some(code)`
/// once the terminal frame has been observed.
async fn forward_result(result: RunExecutableResult, data: &DataChannels) -> Option<i32> {
    if !result.stdout.is_empty() {
        let _ = data.stdout.send(result.stdout).await;
    }
    if !result.stderr.is_empty() {
        let _ = data.stderr.send(result.stderr).await;
    }
    result.has_return_code.then_some(result.return_code)
}

fn classify_status(status: &tonic::Status) -> i32 {
    match status.code() {
        tonic::Code::Cancelled | tonic::Code::DeadlineExceeded => return_code::CANCELLED,
        _ => return_code::TRANSPORT_FAILURE,
    }
}
