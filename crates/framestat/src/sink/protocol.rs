//! Records shared by every sink and the remote listener wire protocol.

use framestat_core::{GroupId, StatId, StatKind, ThreadIndex};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest message accepted from the wire.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// A group announced in a description block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub id: GroupId,
    pub name: String,
}

/// A stat announced in a description block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatDescription {
    pub id: StatId,
    pub name: String,
    pub kind: StatKind,
    pub group: GroupId,
}

/// Group descriptions followed by stat descriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionBlock {
    pub groups: Vec<GroupDescription>,
    pub stats: Vec<StatDescription>,
}

/// One cycle node's totals for a frame.
///
/// Instance ids let a consumer rebuild each thread's call tree even though
/// the same stat id appears on several threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSample {
    pub stat: StatId,
    pub group: GroupId,
    /// Parent's stat, or [`StatId::ERROR`] at a root or canonical stat.
    pub parent_stat: StatId,
    pub instance_id: u32,
    pub parent_instance: u32,
    pub thread: ThreadIndex,
    pub inclusive_cycles: u32,
    pub calls: u32,
}

/// Any value written for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StatSample {
    Cycle(CycleSample),
    Float { stat: StatId, group: GroupId, value: f32 },
    Dword { stat: StatId, group: GroupId, value: u32 },
}

impl StatSample {
    /// Stat the sample belongs to.
    #[must_use]
    pub const fn stat(&self) -> StatId {
        match self {
            Self::Cycle(sample) => sample.stat,
            Self::Float { stat, .. } | Self::Dword { stat, .. } => *stat,
        }
    }
}

/// Every sample written for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame: u32,
    pub samples: Vec<StatSample>,
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Protocol version handshake.
    Hello { version: u8 },
    /// Current description block; replaces any earlier one.
    Descriptions(DescriptionBlock),
    /// Values of one frame.
    Frame(FrameRecord),
    /// Server is shutting down.
    Goodbye,
}

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Request protocol version.
    Hello,
    /// Client disconnecting.
    Goodbye,
}

/// Encode a message to bytes with length prefix.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, bincode::Error> {
    let data = bincode::serialize(msg)?;
    let len = u32::try_from(data.len())
        .map_err(|_| Box::new(bincode::ErrorKind::SizeLimit))?;
    let mut result = Vec::with_capacity(4 + data.len());
    result.extend_from_slice(&len.to_le_bytes());
    result.extend(data);
    Ok(result)
}

/// Decode a message from bytes (without length prefix).
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_message_keeps_samples() {
        let record = FrameRecord {
            frame: 12,
            samples: vec![
                StatSample::Cycle(CycleSample {
                    stat: StatId(300),
                    group: GroupId::GAME,
                    parent_stat: StatId::ROOT,
                    instance_id: 4,
                    parent_instance: 1,
                    thread: ThreadIndex(2),
                    inclusive_cycles: 1000,
                    calls: 1,
                }),
                StatSample::Dword {
                    stat: StatId(301),
                    group: GroupId::GAME,
                    value: 7,
                },
            ],
        };
        let encoded = encode(&ServerMessage::Frame(record.clone())).unwrap();
        let len = u32::from_le_bytes(encoded[..4].try_into().unwrap()) as usize;
        assert_eq!(len, encoded.len() - 4);

        match decode::<ServerMessage>(&encoded[4..]).unwrap() {
            ServerMessage::Frame(decoded) => assert_eq!(decoded, record),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn client_goodbye() {
        let encoded = encode(&ClientMessage::Goodbye).unwrap();
        let decoded: ClientMessage = decode(&encoded[4..]).unwrap();
        assert!(matches!(decoded, ClientMessage::Goodbye));
    }
}
