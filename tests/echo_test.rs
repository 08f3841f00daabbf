//! Tests for the channel transport and echo verifier, over real unix
//! sockets.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use fleetcheck::blob;
use fleetcheck::echo::{self, EchoError};
use fleetcheck::transport::{
    spawn_echo_dialer, ChannelError, Direction, EchoServer, Endpoint,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn endpoint(dir: &Path) -> Endpoint {
    Endpoint::new(dir.join("v.sock"), 5252)
}

#[tokio::test]
async fn host_initiated_echo_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());
    let cancel = CancellationToken::new();
    let server =
        EchoServer::spawn(ep.uds_path().to_path_buf(), true, cancel.clone()).unwrap();

    let blob = blob::generate(dir.path(), 256 * 1024).unwrap();
    echo::verify(&ep, Direction::HostInitiated, &blob, CONNECT_TIMEOUT, IO_TIMEOUT)
        .await
        .unwrap();

    server.stop().await;
}

#[tokio::test]
async fn guest_initiated_echo_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());
    let cancel = CancellationToken::new();
    let dialer = spawn_echo_dialer(ep.host_port_path(), cancel.clone());

    let blob = blob::generate(dir.path(), 256 * 1024).unwrap();
    echo::verify(&ep, Direction::GuestInitiated, &blob, CONNECT_TIMEOUT, IO_TIMEOUT)
        .await
        .unwrap();

    cancel.cancel();
    let _ = dialer.await;
}

#[tokio::test]
async fn responder_serves_repeated_connections() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());
    let cancel = CancellationToken::new();
    let server =
        EchoServer::spawn(ep.uds_path().to_path_buf(), true, cancel.clone()).unwrap();

    let blob = blob::generate(dir.path(), 64 * 1024).unwrap();
    for _ in 0..3 {
        echo::verify(&ep, Direction::HostInitiated, &blob, CONNECT_TIMEOUT, IO_TIMEOUT)
            .await
            .unwrap();
    }

    server.stop().await;
}

/// Responder that speaks the port preamble, then mirrors bytes with the
/// first byte flipped.
async fn serve_corrupting(listener: UnixListener) {
    let (mut stream, _) = listener.accept().await.unwrap();
    read_preamble(&mut stream).await;

    let mut first = true;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        if first {
            buf[0] ^= 0xFF;
            first = false;
        }
        stream.write_all(&buf[..n]).await.unwrap();
    }
}

async fn read_preamble(stream: &mut UnixStream) {
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.unwrap();
        if byte[0] == b'\n' {
            break;
        }
    }
    stream.write_all(b"OK 5252\n").await.unwrap();
}

#[tokio::test]
async fn single_corrupted_byte_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());
    let listener = UnixListener::bind(ep.uds_path()).unwrap();
    let responder = tokio::spawn(serve_corrupting(listener));

    let blob = blob::generate(dir.path(), 64 * 1024).unwrap();
    let err = echo::verify(&ep, Direction::HostInitiated, &blob, CONNECT_TIMEOUT, IO_TIMEOUT)
        .await
        .unwrap_err();

    assert!(
        matches!(err, EchoError::Integrity { .. }),
        "corruption must surface as an integrity error, got: {err}"
    );
    let _ = responder.await;
}

#[tokio::test]
async fn disconnect_mid_transfer_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());
    let listener = UnixListener::bind(ep.uds_path()).unwrap();

    // Echo half the payload, then drop the connection.
    let responder = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_preamble(&mut stream).await;
        let mut echoed = 0usize;
        let mut buf = vec![0u8; 8 * 1024];
        while echoed < 32 * 1024 {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
            echoed += n;
        }
        // Drop: the peer still expects half the payload.
    });

    let blob = blob::generate(dir.path(), 64 * 1024).unwrap();
    let err = echo::verify(&ep, Direction::HostInitiated, &blob, CONNECT_TIMEOUT, IO_TIMEOUT)
        .await
        .unwrap_err();

    assert!(
        matches!(err, EchoError::Channel(ChannelError::Connection(_))),
        "mid-transfer disconnect must not pass as success, got: {err}"
    );
    let _ = responder.await;
}

#[tokio::test]
async fn nothing_listening_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());

    let blob = blob::generate(dir.path(), 4096).unwrap();
    let err = echo::verify(&ep, Direction::HostInitiated, &blob, CONNECT_TIMEOUT, IO_TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, EchoError::Channel(ChannelError::Connection(_))));
}

#[tokio::test]
async fn silent_peer_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());
    let listener = UnixListener::bind(ep.uds_path()).unwrap();

    // Accept and ack the preamble, then go quiet without echoing.
    let responder = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_preamble(&mut stream).await;
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let blob = blob::generate(dir.path(), 4096).unwrap();
    let err = echo::verify(
        &ep,
        Direction::HostInitiated,
        &blob,
        CONNECT_TIMEOUT,
        Duration::from_millis(300),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, EchoError::Channel(ChannelError::Timeout(_))),
        "silent peer must hit the read timeout, got: {err}"
    );
    responder.abort();
}

#[tokio::test]
async fn guest_initiated_wait_times_out_when_no_peer_dials() {
    let dir = tempfile::tempdir().unwrap();
    let ep = endpoint(dir.path());

    let blob = blob::generate(dir.path(), 4096).unwrap();
    let err = echo::verify(
        &ep,
        Direction::GuestInitiated,
        &blob,
        Duration::from_millis(300),
        IO_TIMEOUT,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EchoError::Channel(ChannelError::Timeout(_))));
}
