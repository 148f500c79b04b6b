//! Error types for the packet codec and protocol layer.

use thiserror::Error;

use crate::protocol::NextState;

/// Errors raised while reading or writing protocol packets.
///
/// Every variant is local to the connection it occurred on.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Underlying stream failed or closed early.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// VarInt/VarLong without a terminator inside the maximum byte count.
    #[error("varint exceeds {max_len} bytes")]
    VarIntTooLong { max_len: usize },

    /// A field extends past the end of the packet body.
    #[error("packet truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// Negative length prefix.
    #[error("invalid length prefix: {0}")]
    InvalidLength(i32),

    /// Length prefix above the accepted maximum.
    #[error("packet too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    /// Packet id differs from the one the current phase expects.
    #[error("wrong packet id: expected {expected:#04x}, got {actual:#04x}")]
    WrongPacketId { expected: i32, actual: i32 },

    /// String field is not valid UTF-8.
    #[error("invalid utf-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// JSON payload could not be encoded or decoded.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake declared a next state other than status or login.
    #[error("invalid next state: {0}")]
    InvalidNextState(i32),

    /// A sub-protocol was invoked for a handshake of the other phase.
    #[error("handshake requested {actual}, expected {expected}")]
    WrongPhase {
        expected: NextState,
        actual: NextState,
    },

    /// Pong payload did not echo the ping.
    #[error("ping/pong payload mismatch: sent {sent}, received {received}")]
    PingPongMismatch { sent: i64, received: i64 },
}

impl PacketError {
    /// Returns true if the peer closed the stream before a full packet arrived.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
