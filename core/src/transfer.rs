//! Chunked file transfer, shared between upload and download since both
//! sides of the wire trade the same `{path, chunk}` frame.
//!
//! Split by role rather than by RPC direction: whichever side **reads** a
//! local file to produce chunks ([`read_chunks`]) expands `${VAR}`/`$VAR`
//! references in the path against its own environment, since that path is
//! locally meaningful; whichever side **writes** incoming chunks to a local
//! file ([`write_chunks`]) uses the destination path verbatim, since a
//! caller-supplied destination must not be reinterpreted.

use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Chunk size cap per frame.
pub const CHUNK_CAP: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Read `path` (expanded against the local environment) and push its
/// contents onto `tx` in chunks of up to [`CHUNK_CAP`] bytes. Every chunk
/// carries `label` as its path field — the resolved source path for a
/// download, or the as-given destination path for an upload's first frame
/// convention mirrored on the reading side. Aborts on the first read
/// failure; the receiver sees the channel close early.
pub async fn read_chunks(path: &str, label: &str, tx: mpsc::Sender<Result<Chunk>>) {
    let expanded = shellexpand::env(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_owned());

    let meta = match tokio::fs::metadata(&expanded).await {
        Ok(m) => m,
        Err(e) => {
            let _ = tx.send(Err(e.into())).await;
            return;
        }
    };
    if meta.is_dir() {
        let _ = tx.send(Err(Error::PathIsDirectory(expanded))).await;
        return;
    }

    let mut file = match File::open(&expanded).await {
        Ok(f) => f,
        Err(e) => {
            let _ = tx.send(Err(e.into())).await;
            return;
        }
    };

    let mut buf = vec![0u8; CHUNK_CAP];
    loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        let chunk = Chunk {
            path: label.to_owned(),
            bytes: buf[..n].to_vec(),
        };
        if tx.send(Ok(chunk)).await.is_err() {
            return;
        }
    }
}

/// Consume a stream of chunk frames and write them to the destination named
/// by the first frame's path, appending on every subsequent frame. Clean
/// end-of-stream after at least one frame is success, not an error — that
/// is simply how an upload finishes, with no distinct "upload complete"
/// frame.
pub async fn write_chunks<S>(mut frames: S) -> Result<()>
where
    S: Stream<Item = Result<Chunk>> + Unpin,
{
    let mut writer: Option<BufWriter<File>> = None;

    while let Some(frame) = frames.next().await {
        let chunk = frame?;
        if writer.is_none() {
            if chunk.path.is_empty() {
                return Err(Error::MalformedBatch(
                    "first frame of an upload must carry a destination path".into(),
                ));
            }
            let file = File::create(&chunk.path).await?;
            writer = Some(BufWriter::new(file));
        }
        if let Some(w) = writer.as_mut() {
            w.write_all(&chunk.bytes).await?;
        }
    }

    match writer {
        Some(mut w) => {
            w.flush().await?;
            Ok(())
        }
        None => Err(Error::MalformedBatch("upload stream carried no frames".into())),
    }
}
