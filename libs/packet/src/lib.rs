//! Wire codec and protocol layer for the game server protocol.
//!
//! This library provides:
//! - VarInt/VarLong encoding and length-prefixed packet framing
//! - Handshake, status request/response, ping/pong and login disconnect packets
//! - The chat text structure used for human-readable messages
//! - Server and client roles of the status sub-protocol
//!
//! ## Wire format
//!
//! ```text
//! VarInt(len) | VarInt(packet id) | payload
//!             |<-------------- len -------------->|
//! ```
//!
//! Only the packets needed before a session is handed to a backend are
//! modeled. Once a connection is forwarded it is an opaque byte stream.

mod chat;
mod codec;
mod error;
mod protocol;
mod session;
mod status;
mod varint;

pub use chat::Chat;
pub use codec::{read_frame, read_packet, PacketReader, PacketWriter, MAX_PACKET_LEN};
pub use error::PacketError;
pub use protocol::{
    normalize_hostname, Disconnect, Handshake, NextState, PingPong, StatusRequest, HANDSHAKE_ID,
    LOGIN_DISCONNECT_ID, PING_PONG_ID, STATUS_REQUEST_ID, STATUS_RESPONSE_ID,
};
pub use session::{query_status, serve_disconnect, serve_status};
pub use status::{PlayerSample, Players, StatusResponse, Version};
pub use varint::{
    encode_var_int, encode_var_long, get_var_int, get_var_long, put_var_int, put_var_long,
    read_var_int, var_int_len, MAX_VAR_INT_LEN, MAX_VAR_LONG_LEN,
};

/// Result alias for packet operations.
pub type Result<T> = std::result::Result<T, PacketError>;
