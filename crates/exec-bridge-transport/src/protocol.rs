//! Wire framing for the duplex channel.
//!
//! Every frame is one tag byte followed by the standard base64 encoding
//! of the raw payload, which keeps the channel text-safe.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

/// Frame kind tag, always the first byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    /// Client input destined for the process stdin.
    Stdin = b'0',
    /// Process output. Every server frame carries this tag.
    Data = b'1',
}

impl FrameTag {
    /// Parse an inbound tag byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::Stdin),
            b'1' => Some(Self::Data),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_char(self) -> char {
        self as u8 as char
    }
}

/// Malformed inbound frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),
    #[error("illegal base64 data: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encode raw output bytes as a data frame.
#[must_use]
pub fn encode_data(payload: &[u8]) -> String {
    let mut frame = String::with_capacity(1 + payload.len().div_ceil(3) * 4);
    frame.push(FrameTag::Data.as_char());
    BASE64.encode_string(payload, &mut frame);
    frame
}

/// Validate the tag and decode the payload of an inbound frame.
///
/// # Errors
/// Returns error if the frame is empty, the tag is unknown or the
/// payload is not valid base64.
pub fn decode_frame(frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let (&tag, payload) = frame.split_first().ok_or(DecodeError::Empty)?;
    FrameTag::from_byte(tag).ok_or(DecodeError::UnknownTag(tag))?;
    Ok(BASE64.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_bytes() {
        let frames: Vec<String> = b"hello".iter().map(|b| encode_data(&[*b])).collect();
        assert_eq!(frames, ["1aA==", "1ZQ==", "1bA==", "1bA==", "1bw=="]);
    }

    #[test]
    fn test_decode_stdin_frame() {
        assert_eq!(decode_frame(b"0bHMK").unwrap(), b"ls\n");
        assert_eq!(decode_frame(b"1bHMK").unwrap(), b"ls\n");
    }

    #[test]
    fn test_decode_tag_only() {
        assert!(decode_frame(b"0").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(decode_frame(b""), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_frame(b"9bHMK"),
            Err(DecodeError::UnknownTag(b'9'))
        ));
        assert!(matches!(decode_frame(b"0not*base64"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn test_binary_payload() {
        let payload: Vec<u8> = (0..=255).collect();
        let frame = encode_data(&payload);
        assert!(frame.is_ascii());
        assert_eq!(decode_frame(frame.as_bytes()).unwrap(), payload);
    }
}
