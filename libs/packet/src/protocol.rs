//! Handshake, status and login packets.
//!
//! Packet ids are scoped to the connection phase, which is why several
//! packets share id 0.

use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::chat::Chat;
use crate::codec::{read_packet, PacketReader, PacketWriter};
use crate::error::PacketError;

pub const HANDSHAKE_ID: i32 = 0x00;
pub const STATUS_REQUEST_ID: i32 = 0x00;
pub const STATUS_RESPONSE_ID: i32 = 0x00;
pub const PING_PONG_ID: i32 = 0x01;
pub const LOGIN_DISCONNECT_ID: i32 = 0x00;

/// Phase the client enters after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextState {
    Status = 1,
    Login = 2,
}

impl TryFrom<i32> for NextState {
    type Error = PacketError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Status),
            2 => Ok(Self::Login),
            other => Err(PacketError::InvalidNextState(other)),
        }
    }
}

impl fmt::Display for NextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => f.write_str("status"),
            Self::Login => f.write_str("login"),
        }
    }
}

/// First packet of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    /// Hostname as typed by the player, including any suffix a mod loader appended.
    pub server_address: String,
    pub server_port: u16,
    pub next_state: NextState,
}

impl Handshake {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, PacketError> {
        let packet = read_packet(reader, HANDSHAKE_ID).await?;
        Self::decode(packet)
    }

    fn decode(mut packet: PacketReader) -> Result<Self, PacketError> {
        let protocol_version = packet.next_var_int()?;
        let server_address = packet.next_string()?;
        let server_port = packet.next_u16()?;
        let next_state = NextState::try_from(packet.next_var_int()?)?;

        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    pub fn encode(&self) -> Bytes {
        PacketWriter::new(HANDSHAKE_ID)
            .put_var_int(self.protocol_version)
            .put_string(&self.server_address)
            .put_u16(self.server_port)
            .put_var_int(self.next_state as i32)
            .finish()
    }

    /// Address normalized for routing.
    ///
    /// Drops everything from the first NUL (Forge appends `\0FML\0`),
    /// lowercases, and trims a trailing dot.
    pub fn hostname(&self) -> String {
        normalize_hostname(&self.server_address)
    }
}

/// Normalize a hostname the same way handshake addresses are normalized.
pub fn normalize_hostname(hostname: &str) -> String {
    let host = hostname.split('\0').next().unwrap_or_default();
    host.to_lowercase().trim_end_matches('.').to_string()
}

/// Empty request opening the status exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRequest;

impl StatusRequest {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, PacketError> {
        read_packet(reader, STATUS_REQUEST_ID).await?;
        Ok(Self)
    }

    pub fn encode(&self) -> Bytes {
        PacketWriter::new(STATUS_REQUEST_ID).finish()
    }
}

/// Ping or pong: same shape in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    pub payload: i64,
}

impl PingPong {
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, PacketError> {
        let mut packet = read_packet(reader, PING_PONG_ID).await?;
        Ok(Self {
            payload: packet.next_i64()?,
        })
    }

    pub fn encode(&self) -> Bytes {
        PacketWriter::new(PING_PONG_ID).put_i64(self.payload).finish()
    }
}

/// Login-phase disconnect with a reason shown to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: Chat,
}

impl Disconnect {
    pub fn new(reason: Chat) -> Self {
        Self { reason }
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, PacketError> {
        let mut packet = read_packet(reader, LOGIN_DISCONNECT_ID).await?;
        let json = packet.next_string()?;
        Ok(Self {
            reason: serde_json::from_str(&json)?,
        })
    }

    pub fn encode(&self) -> Result<Bytes, PacketError> {
        let json = self.reason.to_json()?;
        Ok(PacketWriter::new(LOGIN_DISCONNECT_ID)
            .put_string(&json)
            .finish())
    }
}
