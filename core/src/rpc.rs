//! Wire adapter: implements the generated `Command` service trait over the
//! transport-agnostic [`crate::supervisor`]/[`crate::transfer`] primitives.
//!
//! This is the agent's half of the protocol; [`crate::command::client`] is
//! the controller's half. Keeping both off to the side of `core::proto` is
//! what lets `supervisor::supervise` be unit-tested against a real
//! subprocess without ever constructing a `tonic::Streaming`.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

use crate::error::Error;
use crate::job::ExecSpec;
use crate::proto::command_server::Command;
use crate::proto::run_executable_input::Payload;
use crate::proto::{FileChunk, FileDownloadRequest, RunExecutableInput, RunExecutableResult};
use crate::supervisor::{self, Emit, Frame};
use crate::transfer;

type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// One agent process's RPC surface. Stateless — every call spawns its own
/// supervisor or file-transfer task, each owning its own child process or
/// file handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct Agent;

#[tonic::async_trait]
impl Command for Agent {
    type RunExecutableStream = BoxStream<RunExecutableResult>;
    type FileDownloadStream = BoxStream<FileChunk>;

    async fn run_executable(
        &self,
        request: Request<Streaming<RunExecutableInput>>,
    ) -> Result<Response<Self::RunExecutableStream>, Status> {
        let inbound = request.into_inner().map(decode_input);

        let (tx, rx) = mpsc::channel::<Emit>(16);
        // `tonic` drops the response channel's `Receiver` if the client
        // cancels or disconnects mid-call; `supervise` treats that as its
        // cancellation signal via `outbound.closed()`, so no separate
        // cancel token needs to be threaded in from here.
        tokio::spawn(supervisor::supervise(inbound, tx, CancellationToken::new()));

        let outbound = ReceiverStream::new(rx).map(|emit| Ok(encode_result(emit)));
        Ok(Response::new(Box::pin(outbound)))
    }

    async fn file_upload(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<prost_types::Empty>, Status> {
        let frames = request.into_inner().map(|chunk| {
            chunk
                .map(|c| transfer::Chunk {
                    path: c.path,
                    bytes: c.chunk,
                })
                .map_err(|status| Error::Remote(status.to_string()))
        });
        transfer::write_chunks(frames)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(prost_types::Empty {}))
    }

    async fn file_download(
        &self,
        request: Request<FileDownloadRequest>,
    ) -> Result<Response<Self::FileDownloadStream>, Status> {
        let path = request.into_inner().path;
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            transfer::read_chunks(&path.clone(), &path, tx).await;
        });

        let outbound = ReceiverStream::new(rx).map(|result| {
            result
                .map(|chunk| FileChunk {
                    path: chunk.path,
                    chunk: chunk.bytes,
                })
                .map_err(|e| Status::internal(e.to_string()))
        });
        Ok(Response::new(Box::pin(outbound)))
    }
}

fn decode_input(frame: Result<RunExecutableInput, Status>) -> Result<Frame, String> {
    let input = frame.map_err(|status| status.to_string())?;
    match input.payload {
        Some(Payload::Options(opts)) => Ok(Frame::Options(ExecSpec {
            command: opts.command,
            args: opts.args,
            env: opts.env,
            working_dir: (!opts.working_dir.is_empty()).then_some(opts.working_dir),
        })),
        Some(Payload::Stdin(bytes)) => Ok(Frame::Stdin(bytes)),
        None => Err("empty RunExecutableInput frame".to_owned()),
    }
}

fn encode_result(emit: Emit) -> RunExecutableResult {
    match emit {
        Emit::Stdout(bytes) => RunExecutableResult::stdout(bytes),
        Emit::Stderr(bytes) => RunExecutableResult::stderr(bytes),
        Emit::Terminal(code) => RunExecutableResult::terminal(code),
    }
}
