//! Bidirectional session forwarding.
//!
//! The handshake was consumed from the client by the dispatcher, so it is
//! written to the backend first. After that both streams are opaque.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const COPY_BUF_LEN: usize = 8192;

/// Bytes moved in each direction by `forward`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub bytes_to_backend: u64,
    pub bytes_from_backend: u64,
}

/// Replay `handshake` to the backend, then relay bytes both ways.
///
/// Completes when either direction reaches end-of-stream or fails; both
/// streams are shut down at that point so the peer on the other side
/// observes the close. Only a failed handshake replay is an error: once
/// the session is up, a reset ends it like a close and the byte counts
/// are still returned.
pub async fn forward<C, B>(
    client: &mut C,
    backend: &mut B,
    handshake: &[u8],
) -> io::Result<ForwardStats>
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    backend.write_all(handshake).await?;

    let mut stats = ForwardStats::default();
    let outcome = {
        let (mut client_read, mut client_write) = tokio::io::split(&mut *client);
        let (mut backend_read, mut backend_write) = tokio::io::split(&mut *backend);

        let to_backend = copy_counted(
            &mut client_read,
            &mut backend_write,
            &mut stats.bytes_to_backend,
        );
        let from_backend = copy_counted(
            &mut backend_read,
            &mut client_write,
            &mut stats.bytes_from_backend,
        );

        tokio::select! {
            result = to_backend => ("client", result),
            result = from_backend => ("backend", result),
        }
    };

    let (closed_by, result) = outcome;
    match result {
        Ok(()) => debug!(closed_by = closed_by, "Session reached end of stream"),
        Err(e) => debug!(closed_by = closed_by, error = %e, "Session ended with error"),
    }

    // Best effort: the peer may already be gone.
    let _ = client.shutdown().await;
    let _ = backend.shutdown().await;

    Ok(stats)
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_LEN];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *total += n as u64;
    }
}
