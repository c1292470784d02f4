//! Integration tests for the process supervisor against real child
//! processes, exercised the way a caller outside the crate would: through
//! `warp_core::supervisor::supervise` and nothing internal.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use warp_core::job::ExecSpec;
use warp_core::supervisor::{supervise, Emit, Frame};

fn options_only(spec: ExecSpec) -> ReceiverStream<Result<Frame, String>> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let _ = tx.send(Ok(Frame::Options(spec))).await;
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
async fn stdin_is_forwarded_to_the_child() {
    let spec = ExecSpec::new("/bin/cat", vec![]);
    let (in_tx, in_rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let _ = in_tx.send(Ok(Frame::Options(spec))).await;
        let _ = in_tx.send(Ok(Frame::Stdin(b"hello\n".to_vec()))).await;
    });
    let inbound = ReceiverStream::new(in_rx);

    let (out_tx, out_rx) = mpsc::channel(16);
    supervise(inbound, out_tx, CancellationToken::new()).await;
    let events = collect(out_rx).await;

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
async fn nonexistent_binary_reports_transport_failure() {
    let spec = ExecSpec::new("/no/such/binary-warp-test", vec![]);
    let inbound = options_only(spec);
    let (tx, rx) = mpsc::channel(16);
    supervise(inbound, tx, CancellationToken::new()).await;
    let events = collect(rx).await;
    assert!(matches!(events.last(), Some(Emit::Terminal(-1))));
}

#[tokio::test]
async fn working_dir_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = ExecSpec::new("/bin/pwd", vec![]);
    spec.working_dir = Some(dir.path().to_str().unwrap().to_owned());
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
    let printed = String::from_utf8(stdout).unwrap();
    assert_eq!(printed.trim_end(), dir.path().to_str().unwrap());
}

#[tokio::test]
async fn dropping_the_outbound_receiver_kills_a_long_running_child() {
    let spec = ExecSpec::new("/bin/sleep", vec!["30".into()]);
    let inbound = options_only(spec);
    let (tx, rx) = mpsc::channel(16);

    // Simulate a disconnected peer: drop the receiver immediately instead of
    // collecting from it. `supervise` should observe `tx.closed()` and tear
    // the child down rather than running it to completion.
    drop(rx);

    let start = std::time::Instant::now();
    supervise(inbound, tx, CancellationToken::new()).await;
    assert!(start.elapsed() < std::time::Duration::from_secs(25));
}
