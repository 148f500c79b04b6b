//! Packet framing.
//!
//! A packet on the wire is `VarInt(len) ++ VarInt(id) ++ payload`, where
//! `len` covers the id and the payload. Reading buffers exactly `len` bytes
//! before any field is parsed, so a malformed body never desynchronizes
//! the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::PacketError;
use crate::varint::{get_var_int, get_var_long, put_var_int, put_var_long, var_int_len};

/// Largest accepted packet body (the largest 3-byte VarInt).
pub const MAX_PACKET_LEN: usize = 2_097_151;

/// Builder for an outgoing packet.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    id: i32,
    payload: BytesMut,
}

impl PacketWriter {
    /// Start a packet with the given id and an empty payload.
    pub fn new(id: i32) -> Self {
        Self {
            id,
            payload: BytesMut::new(),
        }
    }

    pub fn put_var_int(&mut self, value: i32) -> &mut Self {
        put_var_int(&mut self.payload, value);
        self
    }

    pub fn put_var_long(&mut self, value: i64) -> &mut Self {
        put_var_long(&mut self.payload, value);
        self
    }

    /// Big-endian unsigned 16-bit field.
    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.payload.put_u16(value);
        self
    }

    /// Big-endian signed 32-bit field.
    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.payload.put_i32(value);
        self
    }

    /// Big-endian signed 64-bit field.
    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.payload.put_i64(value);
        self
    }

    /// Length-prefixed UTF-8 string, no terminator.
    pub fn put_string(&mut self, value: &str) -> &mut Self {
        put_var_int(&mut self.payload, value.len() as i32);
        self.payload.put_slice(value.as_bytes());
        self
    }

    /// Produce the framed packet bytes.
    pub fn finish(&self) -> Bytes {
        let body_len = var_int_len(self.id) + self.payload.len();
        let mut frame = BytesMut::with_capacity(var_int_len(body_len as i32) + body_len);
        put_var_int(&mut frame, body_len as i32);
        put_var_int(&mut frame, self.id);
        frame.put_slice(&self.payload);
        frame.freeze()
    }
}

/// Cursor over the body of a received packet whose id was already checked.
#[derive(Debug, Clone)]
pub struct PacketReader {
    id: i32,
    body: Bytes,
}

impl PacketReader {
    /// Parse the packet id from a frame body and require it to be `expected_id`.
    pub fn from_body(expected_id: i32, mut body: Bytes) -> Result<Self, PacketError> {
        let id = get_var_int(&mut body)?;
        if id != expected_id {
            return Err(PacketError::WrongPacketId {
                expected: expected_id,
                actual: id,
            });
        }
        Ok(Self { id, body })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Bytes left unread in the payload.
    pub fn remaining(&self) -> usize {
        self.body.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), PacketError> {
        if self.body.remaining() < needed {
            return Err(PacketError::Truncated {
                needed,
                remaining: self.body.remaining(),
            });
        }
        Ok(())
    }

    pub fn next_var_int(&mut self) -> Result<i32, PacketError> {
        get_var_int(&mut self.body)
    }

    pub fn next_var_long(&mut self) -> Result<i64, PacketError> {
        get_var_long(&mut self.body)
    }

    pub fn next_u16(&mut self) -> Result<u16, PacketError> {
        self.ensure(2)?;
        Ok(self.body.get_u16())
    }

    pub fn next_i32(&mut self) -> Result<i32, PacketError> {
        self.ensure(4)?;
        Ok(self.body.get_i32())
    }

    pub fn next_i64(&mut self) -> Result<i64, PacketError> {
        self.ensure(8)?;
        Ok(self.body.get_i64())
    }

    pub fn next_string(&mut self) -> Result<String, PacketError> {
        let len = self.next_var_int()?;
        if len < 0 {
            return Err(PacketError::InvalidLength(len));
        }
        let len = len as usize;
        self.ensure(len)?;
        let raw = self.body.split_to(len);
        Ok(String::from_utf8(raw.to_vec())?)
    }
}

/// Read one length-prefixed frame and return its body (id and payload).
///
/// A stream that ends before the full body arrives fails with an
/// `UnexpectedEof` I/O error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, PacketError> {
    let len = crate::varint::read_var_int(reader).await?;
    if len < 0 {
        return Err(PacketError::InvalidLength(len));
    }
    let len = len as usize;
    if len > MAX_PACKET_LEN {
        return Err(PacketError::TooLarge {
            len,
            max: MAX_PACKET_LEN,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

/// Read one packet and require it to carry `expected_id`.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected_id: i32,
) -> Result<PacketReader, PacketError> {
    let body = read_frame(reader).await?;
    PacketReader::from_body(expected_id, body)
}
