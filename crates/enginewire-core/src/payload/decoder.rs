use bytes::Bytes;

use super::{BINARY_PACKET_SEPARATOR_V3, PACKET_SEPARATOR_V4, STRING_PACKET_SEPARATOR_V3};
use crate::{Packet, PacketParseError, ProtocolVersion, Str};

/// Max number of digits of a v3 binary length prefix
const MAX_V3_LEN_DIGITS: usize = 310;

/// Decode a full polling request body into packets.
///
/// `is_binary` is set when the body was sent as `application/octet-stream`,
/// which only happens with protocol v3 binary payloads.
///
/// The whole payload is rejected at the first malformed packet.
pub fn decode(
    data: Bytes,
    protocol: ProtocolVersion,
    is_binary: bool,
) -> Result<Vec<Packet>, PacketParseError> {
    match protocol {
        ProtocolVersion::V4 => decode_v4(data),
        ProtocolVersion::V3 if is_binary => decode_v3_binary(data),
        ProtocolVersion::V3 => decode_v3_string(Str::from_utf8(data)?),
    }
}

fn decode_v4(data: Bytes) -> Result<Vec<Packet>, PacketParseError> {
    let data = Str::from_utf8(data)?;
    let mut packets = Vec::new();
    let mut start = 0;
    let bytes = data.as_bytes();
    loop {
        let end = bytes[start..]
            .iter()
            .position(|b| *b == PACKET_SEPARATOR_V4)
            .map(|i| start + i);
        let chunk = data.slice(start..end.unwrap_or(bytes.len()));
        packets.push(Packet::try_from(chunk)?);
        match end {
            Some(end) => start = end + 1,
            None => break,
        }
    }
    Ok(packets)
}

/// Lengths are counted in utf-16 code units.
fn decode_v3_string(data: Str) -> Result<Vec<Packet>, PacketParseError> {
    let mut packets = Vec::new();
    let mut rest = data.as_str();
    let mut offset = 0;
    while !rest.is_empty() {
        let sep = rest
            .bytes()
            .position(|b| b == STRING_PACKET_SEPARATOR_V3)
            .ok_or(PacketParseError::InvalidPacketLen)?;
        let prefix = &rest[..sep];
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PacketParseError::InvalidPacketLen);
        }
        let len: usize = prefix
            .parse()
            .map_err(|_| PacketParseError::InvalidPacketLen)?;
        let body = &rest[sep + 1..];

        let mut units = 0;
        let mut byte_len = 0;
        for c in body.chars() {
            if units >= len {
                break;
            }
            units += c.len_utf16();
            byte_len += c.len_utf8();
        }
        if units != len {
            return Err(PacketParseError::InvalidPacketLen);
        }

        let start = offset + sep + 1;
        if len > 0 {
            packets.push(Packet::try_from(data.slice(start..start + byte_len))?);
        }
        offset = start + byte_len;
        rest = &body[byte_len..];
    }
    Ok(packets)
}

fn decode_v3_binary(data: Bytes) -> Result<Vec<Packet>, PacketParseError> {
    let mut packets = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let is_string = match data[i] {
            0x00 => true,
            0x01 => false,
            _ => return Err(PacketParseError::InvalidPacketLen),
        };
        i += 1;

        let mut len: usize = 0;
        let mut digits = 0;
        loop {
            let byte = *data.get(i).ok_or(PacketParseError::InvalidPacketLen)?;
            i += 1;
            if byte == BINARY_PACKET_SEPARATOR_V3 {
                break;
            }
            digits += 1;
            if byte > 9 || digits > MAX_V3_LEN_DIGITS {
                return Err(PacketParseError::InvalidPacketLen);
            }
            len = len
                .checked_mul(10)
                .and_then(|l| l.checked_add(byte as usize))
                .ok_or(PacketParseError::InvalidPacketLen)?;
        }
        if digits == 0 || i + len > data.len() {
            return Err(PacketParseError::InvalidPacketLen);
        }

        let chunk = data.slice(i..i + len);
        i += len;
        let packet = if is_string {
            Packet::try_from(Str::from_utf8(chunk)?)?
        } else {
            Packet::decode_binary(chunk, true)?
        };
        packets.push(packet);
    }
    Ok(packets)
}
