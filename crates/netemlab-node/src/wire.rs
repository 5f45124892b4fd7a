//! UDP wire format shared by both roles.
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! device_id:u16 | seq:u16 | timestamp_ms:u32 | msg_type:u8 | checksum:u16 | payload
//! ```
//!
//! The checksum is a 16-bit additive sum over header and payload bytes; the
//! checksum field itself is excluded. `timestamp_ms` is the sender's unix
//! time in milliseconds truncated to 32 bits, and the receiver undoes that
//! truncation when computing latency.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const HEADER_LEN: usize = 9;
pub const CHECKSUM_LEN: usize = 2;

/// Sequence numbers live in u16 space and wrap at this modulus.
pub const SEQ_MODULUS: u32 = 65_536;
/// A backwards seq jump larger than this is a wrap, not reordering.
pub const WRAP_THRESHOLD: u16 = 30_000;

const MSG_TYPE_DATA: u8 = 0x01;
const MSG_TYPE_HEARTBEAT: u8 = 0x02;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame truncated: {len} bytes")]
    Truncated { len: usize },
    #[error("checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    Checksum { expected: u16, computed: u16 },
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Data,
    Heartbeat,
}

impl MsgType {
    pub fn code(self) -> u8 {
        match self {
            MsgType::Data => MSG_TYPE_DATA,
            MsgType::Heartbeat => MSG_TYPE_HEARTBEAT,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            MSG_TYPE_DATA => Some(MsgType::Data),
            MSG_TYPE_HEARTBEAT => Some(MsgType::Heartbeat),
            _ => None,
        }
    }

    /// CSV label.
    pub fn label(self) -> &'static str {
        match self {
            MsgType::Data => "DATA",
            MsgType::Heartbeat => "HEARTBEAT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub device_id: u16,
    pub seq: u16,
    pub timestamp_ms: u32,
    pub msg_type: MsgType,
    pub payload: Bytes,
}

impl Packet {
    /// A sensor reading stamped with the current time.
    pub fn data(device_id: u16, seq: u16, payload: Bytes) -> Self {
        Self {
            device_id,
            seq,
            timestamp_ms: unix_millis_truncated(),
            msg_type: MsgType::Data,
            payload,
        }
    }

    /// An empty keep-alive, sharing the data sequence space.
    pub fn heartbeat(device_id: u16, seq: u16) -> Self {
        Self {
            device_id,
            seq,
            timestamp_ms: unix_millis_truncated(),
            msg_type: MsgType::Heartbeat,
            payload: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(HEADER_LEN + CHECKSUM_LEN + self.payload.len());
        frame.put_u16(self.device_id);
        frame.put_u16(self.seq);
        frame.put_u32(self.timestamp_ms);
        frame.put_u8(self.msg_type.code());
        let sum = checksum(&frame, &self.payload);
        frame.put_u16(sum);
        frame.extend_from_slice(&self.payload);
        frame.freeze()
    }

    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(WireError::Truncated { len: frame.len() });
        }
        let (header, rest) = frame.split_at(HEADER_LEN);
        let (sum_bytes, payload) = rest.split_at(CHECKSUM_LEN);

        let expected = u16::from_be_bytes([sum_bytes[0], sum_bytes[1]]);
        let computed = checksum(header, payload);
        if expected != computed {
            return Err(WireError::Checksum { expected, computed });
        }

        let mut header = header;
        let device_id = header.get_u16();
        let seq = header.get_u16();
        let timestamp_ms = header.get_u32();
        let code = header.get_u8();
        let msg_type = MsgType::from_code(code).ok_or(WireError::UnknownType(code))?;

        Ok(Self {
            device_id,
            seq,
            timestamp_ms,
            msg_type,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

fn checksum(header: &[u8], payload: &[u8]) -> u16 {
    let sum: u32 = header.iter().chain(payload).map(|&b| b as u32).sum();
    (sum & 0xFFFF) as u16
}

/// Sender-side timestamp: unix milliseconds truncated to 32 bits.
pub fn unix_millis_truncated() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_round_trip() {
        let packet = Packet {
            device_id: 1001,
            seq: 42,
            timestamp_ms: 0xDEAD_BEEF,
            msg_type: MsgType::Data,
            payload: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
        };
        let frame = packet.encode();
        assert_eq!(frame.len(), HEADER_LEN + CHECKSUM_LEN + 12);
        assert_eq!(Packet::decode(&frame).unwrap(), packet);
    }

    #[test]
    fn heartbeat_has_no_payload() {
        let frame = Packet::heartbeat(7, 0).encode();
        assert_eq!(frame.len(), HEADER_LEN + CHECKSUM_LEN);
        let decoded = Packet::decode(&frame).unwrap();
        assert_eq!(decoded.msg_type, MsgType::Heartbeat);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let frame = Packet::heartbeat(7, 0).encode();
        let err = Packet::decode(&frame[..HEADER_LEN]).unwrap_err();
        assert_eq!(err, WireError::Truncated { len: HEADER_LEN });
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut frame = Packet::data(1001, 3, Bytes::from_static(b"abcdef"))
            .encode()
            .to_vec();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            Packet::decode(&frame),
            Err(WireError::Checksum { .. })
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let original = Packet::heartbeat(7, 0).encode();
        let mut frame = original.to_vec();
        frame[8] = 0x7F;
        // Refresh the checksum so only the type is wrong.
        let sum = checksum(&frame[..HEADER_LEN], &[]);
        frame[9..11].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(Packet::decode(&frame).unwrap_err(), WireError::UnknownType(0x7F));
    }

    #[test]
    fn checksum_wraps_into_16_bits() {
        let header = [0xFFu8; HEADER_LEN];
        let payload = [0xFFu8; 300];
        let sum = checksum(&header, &payload);
        assert_eq!(sum as u32, (309 * 0xFF) & 0xFFFF);
    }
}
