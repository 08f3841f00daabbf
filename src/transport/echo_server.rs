//! Long-lived echo workers.
//!
//! An echo responder accepts repeated connections on a fixed rendezvous
//! point and mirrors bytes back unmodified until stopped. The dialer is
//! its peer-initiated counterpart: it keeps dialing the per-port socket
//! and mirrors whatever the accepting side sends.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channel::{bind_fresh, ChannelError};

const MIRROR_BUF_SIZE: usize = 64 * 1024;
const REDIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Echo responder bound to a socket path.
pub struct EchoServer {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl EchoServer {
    /// Bind `path` and serve echo connections until cancelled.
    ///
    /// With `with_handshake`, each connection must open with a
    /// `CONNECT <port>` line, acknowledged with `OK <port>`, before
    /// mirroring starts. That is the host-initiated dial preamble.
    pub fn spawn(
        path: PathBuf,
        with_handshake: bool,
        cancel: CancellationToken,
    ) -> Result<Self, ChannelError> {
        let listener = bind_fresh(&path)?;
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = loop_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, _) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "echo accept failed");
                                continue;
                            }
                        };
                        let conn_cancel = loop_cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, with_handshake, conn_cancel).await {
                                tracing::debug!(error = %e, "echo connection ended");
                            }
                        });
                    }
                }
            }
        });

        Ok(Self { handle, cancel })
    }

    /// Cancel the accept loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    with_handshake: bool,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if with_handshake {
        let port = read_connect_line(&mut stream).await?;
        stream.write_all(format!("OK {port}\n").as_bytes()).await?;
    }
    mirror(&mut stream, cancel).await
}

async fn read_connect_line(stream: &mut UnixStream) -> std::io::Result<u32> {
    let mut line = Vec::with_capacity(32);
    loop {
        let mut byte = [0u8; 1];
        if stream.read(&mut byte).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "closed before CONNECT line",
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 64 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "oversized CONNECT line",
            ));
        }
    }
    let text = String::from_utf8_lossy(&line);
    text.strip_prefix("CONNECT ")
        .and_then(|p| p.trim().parse::<u32>().ok())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed CONNECT line")
        })
}

/// Mirror bytes back to the peer until EOF or cancellation.
async fn mirror(stream: &mut UnixStream, cancel: CancellationToken) -> std::io::Result<()> {
    let mut buf = vec![0u8; MIRROR_BUF_SIZE];
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                stream.write_all(&buf[..n]).await?;
            }
        }
    }
}

/// Peer-side worker for guest-initiated rounds: keeps dialing `path` and
/// mirrors each established connection until EOF, then redials.
pub fn spawn_echo_dialer(path: PathBuf, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match UnixStream::connect(&path).await {
                Ok(mut stream) => {
                    let _ = mirror(&mut stream, cancel.clone()).await;
                }
                Err(_) => {
                    // Nothing listening yet; back off before redialing.
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(REDIAL_BACKOFF) => {}
                    }
                }
            }
        }
    })
}
