//! HDHomeRun discover packets.
//!
//! Frame format:
//! ```text
//! +--------+--------+------------------+----------+
//! | Type   | Length |   TLV payload    |  CRC-32  |
//! | u16 BE | u16 BE |    (variable)    |  u32 LE  |
//! +--------+--------+------------------+----------+
//! ```
//! The CRC covers type, length and payload. TLV lengths take one byte below
//! 128 and two bytes otherwise (low seven bits first, high bit set).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const DISCOVER_PORT: u16 = 65001;

pub const TYPE_DISCOVER_REQUEST: u16 = 0x0002;
pub const TYPE_DISCOVER_REPLY: u16 = 0x0003;

pub const TAG_DEVICE_TYPE: u8 = 0x01;
pub const TAG_DEVICE_ID: u8 = 0x02;
pub const TAG_TUNER_COUNT: u8 = 0x10;
pub const TAG_BASE_URL: u8 = 0x2A;
pub const TAG_STORAGE_ID: u8 = 0x2C;

pub const DEVICE_TYPE_TUNER: u32 = 0x0000_0001;
pub const DEVICE_TYPE_STORAGE: u32 = 0x0000_0005;
pub const DEVICE_TYPE_WILDCARD: u32 = 0xFFFF_FFFF;
pub const DEVICE_ID_WILDCARD: u32 = 0xFFFF_FFFF;

const HEADER_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    #[error("payload length {declared} does not match frame ({actual} bytes)")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("crc mismatch")]
    BadCrc,
    #[error("unexpected packet type 0x{0:04X}")]
    UnexpectedType(u16),
    #[error("truncated tag 0x{0:02X}")]
    TruncatedTag(u8),
}

/// Fields of a discover reply this crate cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverReply {
    pub device_type: Option<u32>,
    pub device_id: Option<u32>,
    pub tuner_count: Option<u8>,
    pub base_url: Option<String>,
    pub storage_id: Option<String>,
}

/// Request asking every device type and id to answer.
pub fn encode_discover_request() -> Bytes {
    let mut payload = BytesMut::new();
    put_tag(&mut payload, TAG_DEVICE_TYPE, &DEVICE_TYPE_WILDCARD.to_be_bytes());
    put_tag(&mut payload, TAG_DEVICE_ID, &DEVICE_ID_WILDCARD.to_be_bytes());
    encode_frame(TYPE_DISCOVER_REQUEST, &payload)
}

pub fn encode_frame(packet_type: u16, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.put_u16(packet_type);
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    let crc = crc32fast::hash(&frame);
    frame.put_u32_le(crc);
    frame.freeze()
}

pub fn put_tag(buf: &mut BytesMut, tag: u8, value: &[u8]) {
    buf.put_u8(tag);
    let len = value.len();
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u8(0x80 | (len & 0x7F) as u8);
        buf.put_u8((len >> 7) as u8);
    }
    buf.put_slice(value);
}

/// Verifies framing and CRC, returning the packet type and payload.
pub fn decode_frame(frame: &[u8]) -> Result<(u16, Bytes), PacketError> {
    if frame.len() < HEADER_SIZE + CRC_SIZE {
        return Err(PacketError::TooShort(frame.len()));
    }

    let (body, trailer) = frame.split_at(frame.len() - CRC_SIZE);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(body) != expected {
        return Err(PacketError::BadCrc);
    }

    let mut header = &body[..HEADER_SIZE];
    let packet_type = header.get_u16();
    let declared = usize::from(header.get_u16());
    let payload = &body[HEADER_SIZE..];
    if declared != payload.len() {
        return Err(PacketError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    Ok((packet_type, Bytes::copy_from_slice(payload)))
}

pub fn decode_discover_reply(frame: &[u8]) -> Result<DiscoverReply, PacketError> {
    let (packet_type, mut payload) = decode_frame(frame)?;
    if packet_type != TYPE_DISCOVER_REPLY {
        return Err(PacketError::UnexpectedType(packet_type));
    }

    let mut reply = DiscoverReply::default();
    while payload.has_remaining() {
        let tag = payload.get_u8();
        let value = take_value(&mut payload, tag)?;

        match tag {
            TAG_DEVICE_TYPE => reply.device_type = be_u32(&value),
            TAG_DEVICE_ID => reply.device_id = be_u32(&value),
            TAG_TUNER_COUNT => reply.tuner_count = value.first().copied(),
            TAG_BASE_URL => reply.base_url = text(&value),
            TAG_STORAGE_ID => reply.storage_id = text(&value),
            _ => {}
        }
    }

    Ok(reply)
}

fn take_value(payload: &mut Bytes, tag: u8) -> Result<Bytes, PacketError> {
    if !payload.has_remaining() {
        return Err(PacketError::TruncatedTag(tag));
    }
    let mut len = usize::from(payload.get_u8());
    if len & 0x80 != 0 {
        if !payload.has_remaining() {
            return Err(PacketError::TruncatedTag(tag));
        }
        len = (len & 0x7F) | (usize::from(payload.get_u8()) << 7);
    }
    if payload.remaining() < len {
        return Err(PacketError::TruncatedTag(tag));
    }
    Ok(payload.split_to(len))
}

fn be_u32(value: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = value.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn text(value: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(value);
    let text = text.trim_end_matches('\0').trim();
    (!text.is_empty()).then(|| text.to_string())
}
