//! Echo verification: push a blob through the channel and confirm the
//! mirrored bytes hash-match the committed digest.
//!
//! The verifier never retries. A silent retry would mask exactly the
//! data corruption this check exists to detect.

use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::blob::{Blob, CHUNK_SIZE};
use crate::transport::{Channel, ChannelError, Direction, Endpoint};

#[derive(Error, Debug)]
pub enum EchoError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("echoed data corrupt: expected digest {expected}, got {actual}")]
    Integrity { expected: String, actual: String },
}

/// Open one connection in `direction`, stream the blob through it, and
/// verify the echoed bytes against the blob's committed digest.
///
/// Writing and reading run concurrently on split halves so payloads larger
/// than the socket buffers cannot deadlock the exchange. The connection is
/// closed before this returns.
pub async fn verify(
    endpoint: &Endpoint,
    direction: Direction,
    blob: &Blob,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<(), EchoError> {
    let channel = Channel::connect(direction, endpoint, connect_timeout, io_timeout).await?;
    let (read_half, write_half) = channel.into_split();

    let (sent, digest) = tokio::join!(
        send_blob(write_half, blob, io_timeout),
        receive_digest(read_half, blob.len(), io_timeout),
    );
    sent?;
    let actual: [u8; 32] = digest?;

    if &actual != blob.hash() {
        return Err(EchoError::Integrity {
            expected: blob.hex_hash(),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}

async fn send_blob(
    mut write_half: OwnedWriteHalf,
    blob: &Blob,
    io_timeout: Duration,
) -> Result<(), EchoError> {
    let mut file = tokio::fs::File::open(blob.path())
        .await
        .map_err(|e| ChannelError::Connection(format!("open blob: {e}")))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = bounded(io_timeout, file.read(&mut buf)).await?;
        if n == 0 {
            break;
        }
        bounded(io_timeout, write_half.write_all(&buf[..n])).await?;
    }
    // Half-close so the responder sees EOF once it has mirrored everything.
    bounded(io_timeout, write_half.shutdown()).await?;
    Ok(())
}

async fn receive_digest(
    mut read_half: OwnedReadHalf,
    expected_len: usize,
    io_timeout: Duration,
) -> Result<[u8; 32], EchoError> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = expected_len;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE);
        let n = bounded(io_timeout, read_half.read(&mut buf[..want])).await?;
        if n == 0 {
            return Err(ChannelError::Connection(format!(
                "channel closed with {remaining} bytes outstanding"
            ))
            .into());
        }
        hasher.update(&buf[..n]);
        remaining -= n;
    }
    Ok(hasher.finalize().into())
}

async fn bounded<F, T>(limit: Duration, fut: F) -> Result<T, ChannelError>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(ChannelError::from),
        Err(_) => Err(ChannelError::Timeout(limit)),
    }
}
