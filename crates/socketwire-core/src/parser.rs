//! The contract of socket.io parsers.
//!
//! A parser turns a [`Packet`] into an [`EncodedPacket`] and back. Binary packets of the
//! text protocol span several engine messages, so decoding goes through a per connection
//! [`ParserState`] that buffers the attachments until the packet is complete.
use std::sync::Mutex;

use bytes::Bytes;

use crate::{Str, packet::Packet};

/// An encoded packet ready to be written to an engine socket.
///
/// `data` is sent as a text message, followed by each attachment as a binary message.
/// Cloning is cheap, so a broadcast encodes once and clones for every recipient.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodedPacket {
    /// The text message
    pub data: Str,
    /// The binary attachments
    pub attachments: Vec<Bytes>,
}

/// All socket.io parsers implement this trait.
pub trait Parse: Default + Copy + Send + Sync + 'static {
    /// Encode a packet into a text message and its binary attachments.
    fn encode(self, packet: Packet) -> EncodedPacket;

    /// Decode a text message.
    ///
    /// If the packet announces binary attachments it is stored in the `state`
    /// and [`ParseError::NeedsMoreBinaryData`] is returned.
    fn decode_str(self, state: &ParserState, data: Str) -> Result<Packet, ParseError>;

    /// Decode a binary message. It should be an attachment of the pending binary packet.
    fn decode_bin(self, state: &ParserState, bin: Bytes) -> Result<Packet, ParseError>;
}

/// A binary packet waiting for its attachments.
#[derive(Debug)]
pub struct PartialPacket {
    /// The decoded header and payload, still holding placeholders
    pub packet: Packet,
    /// The announced number of attachments
    pub expected: usize,
    /// The attachments received so far
    pub attachments: Vec<Bytes>,
}

/// The decoding state of a connection.
#[derive(Debug, Default)]
pub struct ParserState {
    partial: Mutex<Option<PartialPacket>>,
}

impl ParserState {
    /// Start waiting for the attachments of a binary packet.
    pub fn start_partial(&self, packet: Packet, expected: usize) {
        *self.partial.lock().unwrap() = Some(PartialPacket {
            packet,
            expected,
            attachments: Vec::with_capacity(expected),
        });
    }

    /// Add an attachment to the pending packet.
    ///
    /// Returns the complete packet once the last attachment is received.
    /// Returns [`ParseError::UnexpectedBinaryPacket`] if no packet is pending.
    pub fn push_attachment(&self, bin: Bytes) -> Result<Option<PartialPacket>, ParseError> {
        let mut partial = self.partial.lock().unwrap();
        let pending = partial.as_mut().ok_or(ParseError::UnexpectedBinaryPacket)?;
        pending.attachments.push(bin);
        if pending.attachments.len() < pending.expected {
            Ok(None)
        } else {
            Ok(partial.take())
        }
    }

    /// Returns true if a binary packet waits for attachments.
    pub fn is_pending(&self) -> bool {
        self.partial.lock().unwrap().is_some()
    }

    /// Drop the pending packet, if any. Called when the connection closes
    /// or when a decoding error occurs.
    pub fn reset(&self) {
        self.partial.lock().unwrap().take();
    }
}

/// Errors when decoding socket.io packets
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// Unknown packet type
    #[error("invalid packet type")]
    InvalidPacketType,

    /// The attachment count is missing, invalid or inconsistent with the payload
    #[error("invalid attachments")]
    InvalidAttachments,

    /// The ack id is not a valid number
    #[error("invalid ack id")]
    InvalidAckId,

    /// The payload is not valid json, or does not match the packet type
    #[error("invalid data")]
    InvalidData,

    /// The event name is missing or is not a string
    #[error("invalid event name")]
    InvalidEventName,

    /// A binary message was received while no binary packet was pending
    #[error("received unexpected binary data")]
    UnexpectedBinaryPacket,

    /// A text message was received while a binary packet waits for its attachments
    #[error("received unexpected string data")]
    UnexpectedStringPacket,

    /// Not an error: the packet is stored until its attachments arrive.
    /// The parser should be called again with the next binary messages.
    #[error("needs more binary data before deserialization")]
    NeedsMoreBinaryData,
}
