//! Status and login sub-protocols.
//!
//! Server role (the handshake has already been consumed by the caller):
//! - status: read request, write response, echo the ping, close
//! - login: write a disconnect with a reason, close
//!
//! Client role: a full status query used to probe a backend.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::chat::Chat;
use crate::error::PacketError;
use crate::protocol::{Disconnect, Handshake, NextState, PingPong, StatusRequest};
use crate::status::StatusResponse;

/// Answer a status query with `response` and close the stream.
///
/// Any read failure or unexpected packet id aborts the exchange without
/// writing anything further.
pub async fn serve_status<S>(
    stream: &mut S,
    handshake: &Handshake,
    response: &StatusResponse,
) -> Result<(), PacketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if handshake.next_state != NextState::Status {
        return Err(PacketError::WrongPhase {
            expected: NextState::Status,
            actual: handshake.next_state,
        });
    }

    let frame = response.encode()?;

    StatusRequest::read_from(stream).await?;
    stream.write_all(&frame).await?;

    let ping = PingPong::read_from(stream).await?;
    stream.write_all(&ping.encode()).await?;
    stream.shutdown().await?;

    debug!(payload = ping.payload, "Status exchange completed");
    Ok(())
}

/// Reject a login attempt with `reason` and close the stream.
///
/// The caller must only invoke this for login handshakes.
pub async fn serve_disconnect<S>(
    stream: &mut S,
    handshake: &Handshake,
    reason: &Chat,
) -> Result<(), PacketError>
where
    S: AsyncWrite + Unpin,
{
    if handshake.next_state != NextState::Login {
        return Err(PacketError::WrongPhase {
            expected: NextState::Login,
            actual: handshake.next_state,
        });
    }

    let frame = Disconnect::new(reason.clone()).encode()?;
    stream.write_all(&frame).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Query a server's status over an already connected stream.
///
/// `host` and `port` go into the handshake; the pong must echo the ping
/// payload exactly, otherwise the query fails with `PingPongMismatch`.
pub async fn query_status<S>(
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<StatusResponse, PacketError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = Handshake {
        protocol_version: -1,
        server_address: host.to_string(),
        server_port: port,
        next_state: NextState::Status,
    };

    stream.write_all(&handshake.encode()).await?;
    stream.write_all(&StatusRequest.encode()).await?;
    stream.flush().await?;

    let response = StatusResponse::read_from(stream).await?;

    let ping = PingPong {
        payload: unix_millis(),
    };
    stream.write_all(&ping.encode()).await?;
    stream.flush().await?;

    let pong = PingPong::read_from(stream).await?;
    if pong.payload != ping.payload {
        return Err(PacketError::PingPongMismatch {
            sent: ping.payload,
            received: pong.payload,
        });
    }

    Ok(response)
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
