//! Length-prefixed framing for transports that run over a raw byte stream.
//!
//! Each packet is preceded by a header:
//! * `0..=125`: the length fits in the header byte,
//! * `126`: the length follows as a big-endian `u16`,
//! * `127`: the length follows as a big-endian `u64`.
//!
//! The high bit of the header byte is set for binary packets.
//! Text packets carry their usual text form (`4hello`), binary packets carry raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Packet, Str};

const BINARY_FLAG: u8 = 0x80;
/// Lengths must fit in 53 bits
const MAX_HIGH_BITS: u32 = (1 << 21) - 1;

/// A decoded frame. Turning text frames into packets is left to the caller,
/// because handshake frames are not regular packets.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A text frame
    Text(Str),
    /// A binary frame
    Binary(Bytes),
}

/// Errors raised by [`FrameCodec`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame declared an empty payload
    #[error("empty frame")]
    Empty,
    /// A frame is bigger than the configured maximum
    #[error("frame too large: {len} > {max}")]
    TooLarge {
        /// The declared length
        len: u64,
        /// The configured maximum
        max: u64,
    },
    /// A text frame is not valid utf-8
    #[error("invalid utf8 frame: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// The underlying stream failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
enum State {
    Header,
    ExtendedLen16 { binary: bool },
    ExtendedLen64 { binary: bool },
    Payload { len: usize, binary: bool },
}

/// A [`Decoder`] and [`Encoder`] for length-prefixed frames.
///
/// The decoder keeps its state between calls, so frames split over any
/// number of reads are reassembled.
#[derive(Debug)]
pub struct FrameCodec {
    max_payload: u64,
    state: State,
}

impl FrameCodec {
    /// Create a codec rejecting frames larger than `max_payload`
    pub fn new(max_payload: u64) -> Self {
        Self {
            max_payload,
            state: State::Header,
        }
    }

    fn check_len(&self, len: u64) -> Result<usize, FrameError> {
        if len == 0 {
            Err(FrameError::Empty)
        } else if len > self.max_payload {
            Err(FrameError::TooLarge {
                len,
                max: self.max_payload,
            })
        } else {
            usize::try_from(len).map_err(|_| FrameError::TooLarge {
                len,
                max: self.max_payload,
            })
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.state {
                State::Header => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let header = src.get_u8();
                    let binary = header & BINARY_FLAG != 0;
                    self.state = match header & !BINARY_FLAG {
                        126 => State::ExtendedLen16 { binary },
                        127 => State::ExtendedLen64 { binary },
                        len => State::Payload {
                            len: self.check_len(len as u64)?,
                            binary,
                        },
                    };
                }
                State::ExtendedLen16 { binary } => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    let len = src.get_u16() as u64;
                    self.state = State::Payload {
                        len: self.check_len(len)?,
                        binary,
                    };
                }
                State::ExtendedLen64 { binary } => {
                    if src.len() < 8 {
                        return Ok(None);
                    }
                    let high = src.get_u32();
                    let low = src.get_u32();
                    if high > MAX_HIGH_BITS {
                        return Err(FrameError::TooLarge {
                            len: u64::MAX,
                            max: self.max_payload,
                        });
                    }
                    let len = ((high as u64) << 32) | low as u64;
                    self.state = State::Payload {
                        len: self.check_len(len)?,
                        binary,
                    };
                }
                State::Payload { len, binary } => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let data = src.split_to(len).freeze();
                    self.state = State::Header;
                    let frame = if binary {
                        Frame::Binary(data)
                    } else {
                        Frame::Text(Str::from_utf8(data)?)
                    };
                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), FrameError> {
        let (binary, data): (bool, Bytes) = match packet {
            Packet::Binary(data) | Packet::BinaryV3(data) => (true, data),
            packet => (false, String::from(packet).into()),
        };
        let flag = if binary { BINARY_FLAG } else { 0 };
        let len = data.len();
        dst.reserve(len + 9);
        if len < 126 {
            dst.put_u8(flag | len as u8);
        } else if len < 1 << 16 {
            dst.put_u8(flag | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(flag | 127);
            dst.put_u64(len as u64);
        }
        dst.put_slice(&data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(packets: Vec<Packet>) -> BytesMut {
        let mut codec = FrameCodec::new(u64::MAX);
        let mut buf = BytesMut::new();
        for packet in packets {
            codec.encode(packet, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn header_sizes() {
        let buf = encode(vec![Packet::Message("hello".into())]);
        assert_eq!(&buf[..], b"\x064hello");

        let buf = encode(vec![Packet::Binary(vec![1, 2, 3].into())]);
        assert_eq!(&buf[..], &[0x83, 1, 2, 3]);

        let buf = encode(vec![Packet::Binary(vec![0; 200].into())]);
        assert_eq!(&buf[..3], &[0x80 | 126, 0, 200]);

        let buf = encode(vec![Packet::Binary(vec![0; 70000].into())]);
        assert_eq!(&buf[..9], &[0x80 | 127, 0, 0, 0, 0, 0, 1, 0x11, 0x70]);
    }

    #[test]
    fn decode_one_byte_at_a_time() {
        let data = encode(vec![
            Packet::Message("hello".into()),
            Packet::Binary(vec![7; 300].into()),
            Packet::Ping,
        ]);
        let mut codec = FrameCodec::new(1000);
        let mut src = BytesMut::new();
        let mut frames = Vec::new();
        for byte in data {
            src.put_u8(byte);
            while let Some(frame) = codec.decode(&mut src).unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(
            frames,
            vec![
                Frame::Text("4hello".into()),
                Frame::Binary(vec![7; 300].into()),
                Frame::Text("2".into()),
            ]
        );
    }

    #[test]
    fn rejects_bad_lengths() {
        let mut codec = FrameCodec::new(10);
        let mut src = BytesMut::from(&[0x00][..]);
        assert!(matches!(codec.decode(&mut src), Err(FrameError::Empty)));

        let mut codec = FrameCodec::new(10);
        let mut src = BytesMut::from(&[0x0b][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(FrameError::TooLarge { len: 11, max: 10 })
        ));

        let mut codec = FrameCodec::new(u64::MAX);
        let mut src = BytesMut::from(&[127, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 1][..]);
        assert!(matches!(codec.decode(&mut src), Err(FrameError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn framed_over_a_duplex_stream() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (a, b) = tokio::io::duplex(64);
        let mut a = Framed::new(a, FrameCodec::new(1000));
        let mut b = Framed::new(b, FrameCodec::new(1000));
        a.send(Packet::Message("hello".into())).await.unwrap();
        a.send(Packet::Binary(vec![1; 100].into())).await.unwrap();
        assert_eq!(b.next().await.unwrap().unwrap(), Frame::Text("4hello".into()));
        assert_eq!(
            b.next().await.unwrap().unwrap(),
            Frame::Binary(vec![1; 100].into())
        );
    }
}
