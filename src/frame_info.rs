//! Per-frame metadata collected from packet scans.

use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::{capture::CaptureTimestamp, error::FrameStepError};

/// Coded picture type of a frame's primary slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Intra-coded frame.
    I,
    /// Instantaneous decoder refresh frame (closed-GOP keyframe).
    Idr,
    /// Predicted frame.
    P,
    /// Bidirectionally predicted frame.
    B,
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameType::I => "I",
            FrameType::Idr => "IDR",
            FrameType::P => "P",
            FrameType::B => "B",
        };
        f.write_str(s)
    }
}

impl FromStr for FrameType {
    type Err = FrameStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" => Ok(FrameType::I),
            "IDR" => Ok(FrameType::Idr),
            "P" => Ok(FrameType::P),
            "B" => Ok(FrameType::B),
            other => Err(FrameStepError::MetadataParse {
                key: "frameType".to_string(),
                reason: format!("unknown frame type {other:?}"),
            }),
        }
    }
}

/// Metadata for one frame, gathered without decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Presentation timestamp, in stream ticks.
    pub pts: i64,
    /// Decode timestamp, in stream ticks.
    pub dts: Option<i64>,
    /// Picture type of the primary coded slice, when the bitstream scan
    /// could classify it.
    pub frame_type: Option<FrameType>,
    /// Embedded wall-clock capture timestamp, when the frame carries one.
    pub timestamp: Option<CaptureTimestamp>,
    /// Byte offset of the frame's packet in the file, when the demuxer
    /// reports one.
    pub start_byte: Option<i64>,
}

/// Frame metadata keyed by frame number.
pub type FrameInfoMap = BTreeMap<u64, FrameInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_display_round_trip() {
        for ft in [FrameType::I, FrameType::Idr, FrameType::P, FrameType::B] {
            assert_eq!(ft.to_string().parse::<FrameType>().unwrap(), ft);
        }
    }

    #[test]
    fn frame_type_rejects_unknown() {
        assert!("X".parse::<FrameType>().is_err());
        assert!("idr".parse::<FrameType>().is_err());
    }
}
