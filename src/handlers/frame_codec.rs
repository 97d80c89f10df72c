use std::fmt;

use tracing::instrument;

use crate::utils::decode_text_lossy;

/// First byte of every encoded frame (`'c'`).
pub const FRAME_START: u8 = b'c';

/// Last byte of every encoded frame (`'v'`).
pub const FRAME_END: u8 = b'v';

/// Maximum number of payload bytes carried by one frame.
pub const MAX_FRAME_PAYLOAD_LEN: usize = 128;

const FRAME_MIN_LEN: usize = 4;
const FRAME_HEADER_LEN: usize = 3;

/// One decoded device frame.
///
/// Frames are immutable once built; decoding always yields a fresh value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    command: u8,
    subtype: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame carrying UTF-8 text, truncated to 128 bytes.
    ///
    /// Truncation works on bytes, so a multi-byte character straddling the
    /// limit is cut.
    ///
    /// ```
    /// use mqrelay::Frame;
    ///
    /// let frame = Frame::new(0x02, 0x05, "hello");
    /// assert_eq!(b"hello", frame.payload());
    /// ```
    #[must_use]
    pub fn new(command: u8, subtype: u8, text: &str) -> Self {
        let bytes = text.as_bytes();
        let end = bytes.len().min(MAX_FRAME_PAYLOAD_LEN);
        Self {
            command,
            subtype,
            payload: bytes[..end].to_vec(),
        }
    }

    /// Creates a frame from wider integers, keeping only their low 8 bits.
    #[must_use]
    pub fn masked(command: i64, subtype: i64, text: &str) -> Self {
        Self::new(low_byte(command), low_byte(subtype), text)
    }

    /// Returns the command byte.
    #[must_use]
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Returns the subtype byte.
    #[must_use]
    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    /// Returns the raw payload bytes between the header and the end marker.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the payload decoded as UTF-8, dropping undecodable sequences.
    ///
    /// ```
    /// use mqrelay::FrameCodec;
    ///
    /// let frame = FrameCodec::decode(&[b'c', 1, 2, b'o', 0xFF, b'k', b'v']).expect("frame");
    /// assert_eq!("ok", frame.text());
    /// ```
    #[must_use]
    pub fn text(&self) -> String {
        decode_text_lossy(&self.payload)
    }

    /// Returns the wire representation of this frame.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(self.payload.len() + FRAME_MIN_LEN);
        encoded.push(FRAME_START);
        encoded.push(self.command);
        encoded.push(self.subtype);
        encoded.extend_from_slice(&self.payload);
        encoded.push(FRAME_END);
        encoded
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cmd=0x{:02X} subtype=0x{:02X} data={:?}",
            self.command,
            self.subtype,
            self.text()
        )
    }
}

/// Encoder/decoder for the `c | cmd | subtype | payload | v` device frame.
///
/// The format carries no length or checksum: any payload that happens to
/// start with `'c'`, end with `'v'` and be at least four bytes long decodes as
/// a frame, even when the peer meant it as plain text.
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes a frame, masking `command` and `subtype` to their low 8 bits.
    ///
    /// ```
    /// use mqrelay::FrameCodec;
    ///
    /// let bytes = FrameCodec::encode(2, 5, "hello");
    /// assert_eq!(b"c\x02\x05hellov".to_vec(), bytes);
    ///
    /// let masked = FrameCodec::encode(0x1_02, -1, "");
    /// assert_eq!(vec![b'c', 0x02, 0xFF, b'v'], masked);
    /// ```
    #[must_use]
    pub fn encode(command: i64, subtype: i64, text: &str) -> Vec<u8> {
        Frame::masked(command, subtype, text).to_bytes()
    }

    /// Decodes a payload, returning `None` when it is not a frame.
    ///
    /// ```
    /// use mqrelay::FrameCodec;
    ///
    /// assert!(FrameCodec::decode(b"hello").is_none());
    /// let frame = FrameCodec::decode(&[b'c', 0x02, 0x05, b'v']).expect("empty frame");
    /// assert_eq!("", frame.text());
    /// ```
    #[must_use]
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode(payload: &[u8]) -> Option<Frame> {
        if payload.len() < FRAME_MIN_LEN {
            return None;
        }
        let (&first, rest) = payload.split_first()?;
        let (&last, _) = rest.split_last()?;
        if first != FRAME_START || last != FRAME_END {
            return None;
        }

        Some(Frame {
            command: payload[1],
            subtype: payload[2],
            payload: payload[FRAME_HEADER_LEN..payload.len() - 1].to_vec(),
        })
    }
}

fn low_byte(value: i64) -> u8 {
    (value & 0xFF) as u8
}
