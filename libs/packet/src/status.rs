//! Status response payload.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::chat::Chat;
use crate::codec::{read_packet, PacketWriter};
use crate::error::PacketError;
use crate::protocol::STATUS_RESPONSE_ID;

/// Server information shown in the client's server list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub players: Players,
    #[serde(default)]
    pub description: Chat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Players {
    #[serde(default)]
    pub max: i32,
    #[serde(default)]
    pub online: i32,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sample: Vec<PlayerSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<PlayerSample>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<PlayerSample>>::deserialize(deserializer)?.unwrap_or_default())
}

impl StatusResponse {
    /// Placeholder response for a backend that is not serving: an
    /// unknown (negative) protocol version, no players and `description`.
    pub fn placeholder(description: Chat) -> Self {
        Self {
            version: Version {
                name: String::new(),
                protocol: -1,
            },
            players: Players::default(),
            description,
        }
    }

    /// Encode as a status response packet (JSON inside a string field).
    pub fn encode(&self) -> Result<Bytes, PacketError> {
        let json = serde_json::to_string(self)?;
        Ok(PacketWriter::new(STATUS_RESPONSE_ID).put_string(&json).finish())
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, PacketError> {
        let mut packet = read_packet(reader, STATUS_RESPONSE_ID).await?;
        let json = packet.next_string()?;
        Ok(serde_json::from_str(&json)?)
    }
}
