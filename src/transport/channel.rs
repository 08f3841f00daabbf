//! Byte-stream channel over a rendezvous endpoint.
//!
//! Every await is bounded by a timeout. A timed-out or broken channel
//! surfaces as an error; a short read is never returned as success.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

use super::endpoint::{Direction, Endpoint};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("channel timed out after {0:?}")]
    Timeout(Duration),
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Connection(e.to_string())
    }
}

/// One end-to-end session across the transport.
pub struct Channel {
    stream: UnixStream,
    io_timeout: Duration,
}

impl Channel {
    /// Establish a connection in the given direction.
    ///
    /// Host-initiated: dial the base socket, send `CONNECT <port>` and wait
    /// for the `OK <assigned>` acknowledgement. Guest-initiated: listen on
    /// the per-port socket and wait for the peer to dial in. Both paths are
    /// bounded by `connect_timeout`.
    pub async fn connect(
        direction: Direction,
        endpoint: &Endpoint,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let stream = match direction {
            Direction::HostInitiated => {
                let mut stream = bounded(
                    connect_timeout,
                    UnixStream::connect(endpoint.uds_path()),
                )
                .await??;
                handshake(&mut stream, endpoint.port(), io_timeout).await?;
                stream
            }
            Direction::GuestInitiated => {
                let listener = bind_fresh(&endpoint.host_port_path())?;
                let (stream, _addr) =
                    bounded(connect_timeout, listener.accept()).await??;
                stream
            }
        };
        Ok(Self { stream, io_timeout })
    }

    /// Send the whole buffer, or fail.
    pub async fn send_all(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        bounded(self.io_timeout, self.stream.write_all(buf)).await??;
        Ok(())
    }

    /// Fill the whole buffer, or fail. EOF mid-read is a connection error.
    pub async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        bounded(self.io_timeout, self.stream.read_exact(buf))
            .await?
            .map_err(|e| {
                ChannelError::Connection(format!("channel closed mid-read: {e}"))
            })?;
        Ok(())
    }

    /// Close the write side, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), ChannelError> {
        bounded(self.io_timeout, self.stream.shutdown()).await??;
        Ok(())
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

/// Wrap a future in the channel timeout.
pub(crate) async fn bounded<F, T>(limit: Duration, fut: F) -> Result<T, ChannelError>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ChannelError::Timeout(limit))
}

/// Bind a listener, clearing any stale socket file left behind.
pub(crate) fn bind_fresh(path: &Path) -> Result<UnixListener, ChannelError> {
    let _ = std::fs::remove_file(path);
    UnixListener::bind(path)
        .map_err(|e| ChannelError::Connection(format!("bind {}: {e}", path.display())))
}

/// Host-side port negotiation: `CONNECT <port>\n` then `OK <assigned>\n`.
async fn handshake(
    stream: &mut UnixStream,
    port: u32,
    io_timeout: Duration,
) -> Result<(), ChannelError> {
    let request = format!("CONNECT {port}\n");
    bounded(io_timeout, stream.write_all(request.as_bytes())).await??;

    let mut line = Vec::with_capacity(32);
    loop {
        let mut byte = [0u8; 1];
        let n = bounded(io_timeout, stream.read(&mut byte)).await??;
        if n == 0 {
            return Err(ChannelError::Connection(
                "peer closed during port negotiation".into(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 64 {
            return Err(ChannelError::Connection(
                "oversized port negotiation reply".into(),
            ));
        }
    }

    let reply = String::from_utf8_lossy(&line);
    if reply.starts_with("OK ") {
        Ok(())
    } else {
        Err(ChannelError::Connection(format!(
            "port negotiation rejected: {reply:?}"
        )))
    }
}
