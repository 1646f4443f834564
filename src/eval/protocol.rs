//! Wire format of result frames.
//!
//! A frame is [`FRAME_LEN`] bytes in native byte order: a 32-bit tag followed
//! by a 32-bit payload. Tag [`TAG_VALUE`] carries a computed result, tag
//! [`TAG_FAILURE`] carries the [`Stage`] code of a failure somewhere in the
//! sender's subtree.

use crate::error::{ChannelError, Stage};

/// Size of one frame on the wire.
pub const FRAME_LEN: usize = 8;

pub const TAG_VALUE: i32 = 0;
pub const TAG_FAILURE: i32 = 1;

/// The single message a worker sends to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Result of the sender's subtree.
    Value(i32),
    /// The sender's subtree failed.
    Failure(Stage),
}

impl Frame {
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let (tag, payload) = match *self {
            Frame::Value(value) => (TAG_VALUE, value),
            Frame::Failure(stage) => (TAG_FAILURE, stage.wire_code()),
        };
        let mut buf = [0u8; FRAME_LEN];
        buf[..4].copy_from_slice(&tag.to_ne_bytes());
        buf[4..].copy_from_slice(&payload.to_ne_bytes());
        buf
    }

    pub fn decode(buf: &[u8; FRAME_LEN]) -> Result<Self, ChannelError> {
        let tag = i32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let payload = i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
        match tag {
            TAG_VALUE => Ok(Frame::Value(payload)),
            TAG_FAILURE => Stage::from_code(payload)
                .map(Frame::Failure)
                .ok_or(ChannelError::UnknownStage(payload)),
            other => Err(ChannelError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_frame_layout() {
        let buf = Frame::Value(21).encode();
        assert_eq!(&buf[..4], &TAG_VALUE.to_ne_bytes());
        assert_eq!(&buf[4..], &21i32.to_ne_bytes());
        assert_eq!(Frame::decode(&buf).unwrap(), Frame::Value(21));
    }

    #[test]
    fn test_extreme_values() {
        for value in [i32::MIN, -1, 0, i32::MAX] {
            let buf = Frame::Value(value).encode();
            assert_eq!(Frame::decode(&buf).unwrap(), Frame::Value(value));
        }
    }

    #[test]
    fn test_failure_frame_carries_stage() {
        let buf = Frame::Failure(Stage::Spawn).encode();
        assert_eq!(&buf[..4], &TAG_FAILURE.to_ne_bytes());
        assert_eq!(Frame::decode(&buf).unwrap(), Frame::Failure(Stage::Spawn));
    }

    #[test]
    fn test_failure_without_wire_code() {
        let buf = Frame::Failure(Stage::Diagnostic).encode();
        assert_eq!(Frame::decode(&buf).unwrap(), Frame::Failure(Stage::Signal));
    }

    #[test]
    fn test_unknown_stage_code() {
        let mut buf = [0u8; FRAME_LEN];
        buf[..4].copy_from_slice(&TAG_FAILURE.to_ne_bytes());
        buf[4..].copy_from_slice(&42i32.to_ne_bytes());
        assert!(matches!(
            Frame::decode(&buf),
            Err(ChannelError::UnknownStage(42))
        ));
    }
}
