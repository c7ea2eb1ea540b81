//! Http long-polling payloads.
//!
//! A payload is the batch of packets carried by one polling request or response.
//! * Protocol v4 joins text packets with the `0x1e` record separator and sends
//!   binary packets as base64.
//! * Protocol v3 prefixes each packet with its length: `<len>:<packet>` for
//!   string payloads, or `<0|1><len digits>0xff<data>` for binary payloads.

use bytes::Bytes;

pub use decoder::decode;
pub use encoder::PayloadEncoder;

mod decoder;
mod encoder;

/// Separator between packets in a v4 payload
pub const PACKET_SEPARATOR_V4: u8 = 0x1e;
/// Separator between the length and the packet in a v3 string payload
pub const STRING_PACKET_SEPARATOR_V3: u8 = b':';
/// Separator between the length and the packet in a v3 binary payload
pub const BINARY_PACKET_SEPARATOR_V3: u8 = 0xff;

/// An encoded payload, ready to be sent as an http body.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// The encoded data
    pub data: Bytes,
    /// Whether the data is a v3 binary payload (`application/octet-stream`)
    pub has_binary: bool,
}

impl Payload {
    /// The content type of the http response carrying this payload
    pub fn content_type(&self) -> &'static str {
        if self.has_binary {
            "application/octet-stream"
        } else {
            "text/plain; charset=UTF-8"
        }
    }
}
