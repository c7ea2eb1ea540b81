//! The framing of published messages.
//!
//! A frame starts with a tag byte:
//! * `0`: the msgpack encoded [`ClusterMessage`] follows,
//! * `1`: the message was stored as an attachment, the msgpack encoded
//!   [`AttachmentRef`] follows. The stored payload is itself an inline frame.
use serde::{Deserialize, Serialize};
use socketwire_core::{Uid, adapter::remote_packet::ClusterMessage};

const INLINE: u8 = 0;
const ATTACHMENT: u8 = 1;

/// A pointer to a stored message. The sender id is kept out of the attachment
/// so that a server can skip its own messages without fetching them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub uid: Uid,
    pub id: u64,
}

#[derive(Debug, PartialEq)]
pub enum Frame {
    Inline(ClusterMessage),
    Attachment(AttachmentRef),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),
    #[error("packet decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub fn encode_message(msg: &ClusterMessage) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut buf = vec![INLINE];
    rmp_serde::encode::write_named(&mut buf, msg)?;
    Ok(buf)
}

pub fn encode_ref(attachment: AttachmentRef) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut buf = vec![ATTACHMENT];
    rmp_serde::encode::write_named(&mut buf, &attachment)?;
    Ok(buf)
}

pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    let (tag, payload) = data.split_first().ok_or(FrameError::Empty)?;
    match *tag {
        INLINE => Ok(Frame::Inline(rmp_serde::from_slice(payload)?)),
        ATTACHMENT => Ok(Frame::Attachment(rmp_serde::from_slice(payload)?)),
        tag => Err(FrameError::UnknownTag(tag)),
    }
}
