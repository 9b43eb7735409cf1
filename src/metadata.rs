//! Persisted video metadata.
//!
//! Archiving a recording embeds everything the session learned about it as
//! container tags: the compact timestamp table, the keyframe layout, the
//! frame count, and a content hash. Re-opening the archived file reads the
//! tags back, so the expensive packet scan runs once per recording.
//!
//! Each field becomes one tag. Keys are prefixed `FRAMESTEP:` and values are
//! JSON-encoded, so they survive any container's tag escaping rules.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::{capture::CaptureTimestamp, error::FrameStepError, reconcile::CompactTimestampTable};

/// Prefix on every tag key this crate writes.
pub const TAG_PREFIX: &str = "FRAMESTEP:";

/// Everything worth persisting about one recording.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoMetadata {
    /// Content hash of the source recording, when one was computed.
    pub hash: Option<String>,
    /// Whole-number record rate in frames per second.
    pub record_fps: u32,
    /// Capture-timestamp anchors (see [`CompactTimestampTable`]).
    pub start_timestamps: BTreeMap<i64, CaptureTimestamp>,
    /// Dominant I-frame spacing.
    pub i_frame_interval: Option<u64>,
    /// I-frame progression starts.
    pub i_frame_starts: Vec<u64>,
    /// Dominant IDR spacing.
    pub idr_frame_interval: Option<u64>,
    /// IDR progression starts.
    pub idr_frame_starts: Vec<u64>,
    /// Total number of frames in the stream.
    pub number_of_frames: u64,
    /// Playback rate in frames per second.
    pub playback_fps: f64,
    /// Presentation timestamp of the first frame, in stream ticks.
    pub start_tick: i64,
}

impl VideoMetadata {
    /// Combine a reconciled timestamp table with stream-level facts.
    pub fn from_table(
        table: CompactTimestampTable,
        hash: Option<String>,
        number_of_frames: u64,
        playback_fps: f64,
        start_tick: i64,
    ) -> Self {
        Self {
            hash,
            record_fps: table.record_fps,
            start_timestamps: table.start_timestamps,
            i_frame_interval: table.i_frame_interval,
            i_frame_starts: table.i_frame_starts,
            idr_frame_interval: table.idr_frame_interval,
            idr_frame_starts: table.idr_frame_starts,
            number_of_frames,
            playback_fps,
            start_tick,
        }
    }

    /// The timestamp table portion, for capture-time expansion.
    pub fn table(&self) -> CompactTimestampTable {
        CompactTimestampTable {
            record_fps: self.record_fps,
            start_timestamps: self.start_timestamps.clone(),
            i_frame_interval: self.i_frame_interval,
            i_frame_starts: self.i_frame_starts.clone(),
            idr_frame_interval: self.idr_frame_interval,
            idr_frame_starts: self.idr_frame_starts.clone(),
        }
    }

    /// Serialize to container tags: `(key, value)` pairs with
    /// [`TAG_PREFIX`]ed keys and JSON-encoded values.
    pub fn to_tags(&self) -> Vec<(String, String)> {
        let timestamps: BTreeMap<String, String> = self
            .start_timestamps
            .iter()
            .map(|(frame, ts)| (frame.to_string(), ts.to_string()))
            .collect();

        let fields: Vec<(&str, Value)> = vec![
            ("hash", json!(self.hash)),
            ("recordFps", json!(self.record_fps)),
            ("startTimestamps", json!(timestamps)),
            ("iFrameInterval", json!(self.i_frame_interval)),
            ("iFrameStarts", json!(self.i_frame_starts)),
            ("idrFrameInterval", json!(self.idr_frame_interval)),
            ("idrFrameStarts", json!(self.idr_frame_starts)),
            ("numberOfFrames", json!(self.number_of_frames)),
            ("playbackFps", json!(self.playback_fps)),
            ("startTick", json!(self.start_tick)),
        ];

        fields
            .into_iter()
            .map(|(key, value)| (format!("{TAG_PREFIX}{key}"), value.to_string()))
            .collect()
    }

    /// Read metadata back from container tags.
    ///
    /// Returns `Ok(None)` when no [`TAG_PREFIX`]ed tag is present at all
    /// (an unarchived file). A partial or malformed tag set is an error.
    pub fn from_tags<'a, I>(tags: I) -> Result<Option<Self>, FrameStepError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut values: BTreeMap<&str, Value> = BTreeMap::new();
        for (key, raw) in tags {
            let Some(field) = key.strip_prefix(TAG_PREFIX) else {
                continue;
            };
            let value =
                serde_json::from_str(raw).map_err(|e| FrameStepError::MetadataParse {
                    key: field.to_string(),
                    reason: e.to_string(),
                })?;
            values.insert(field, value);
        }
        if values.is_empty() {
            return Ok(None);
        }

        let start_timestamps = parse_timestamps(take(&mut values, "startTimestamps")?)?;

        Ok(Some(Self {
            hash: field_opt(take(&mut values, "hash")?, "hash")?,
            record_fps: field(take(&mut values, "recordFps")?, "recordFps")?,
            start_timestamps,
            i_frame_interval: field_opt(take(&mut values, "iFrameInterval")?, "iFrameInterval")?,
            i_frame_starts: field(take(&mut values, "iFrameStarts")?, "iFrameStarts")?,
            idr_frame_interval: field_opt(
                take(&mut values, "idrFrameInterval")?,
                "idrFrameInterval",
            )?,
            idr_frame_starts: field(take(&mut values, "idrFrameStarts")?, "idrFrameStarts")?,
            number_of_frames: field(take(&mut values, "numberOfFrames")?, "numberOfFrames")?,
            playback_fps: field(take(&mut values, "playbackFps")?, "playbackFps")?,
            start_tick: field(take(&mut values, "startTick")?, "startTick")?,
        }))
    }
}

fn take(values: &mut BTreeMap<&str, Value>, key: &str) -> Result<Value, FrameStepError> {
    values
        .remove(key)
        .ok_or_else(|| FrameStepError::MissingMetadata {
            key: key.to_string(),
        })
}

fn field<T: serde::de::DeserializeOwned>(value: Value, key: &str) -> Result<T, FrameStepError> {
    serde_json::from_value(value).map_err(|e| FrameStepError::MetadataParse {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn field_opt<T: serde::de::DeserializeOwned>(
    value: Value,
    key: &str,
) -> Result<Option<T>, FrameStepError> {
    if value.is_null() {
        return Ok(None);
    }
    field(value, key).map(Some)
}

fn parse_timestamps(value: Value) -> Result<BTreeMap<i64, CaptureTimestamp>, FrameStepError> {
    let raw: BTreeMap<String, String> = field(value, "startTimestamps")?;
    raw.into_iter()
        .map(|(frame, ts)| {
            let frame = frame.parse().map_err(|_| FrameStepError::MetadataParse {
                key: "startTimestamps".to_string(),
                reason: format!("non-integer frame number key {frame:?}"),
            })?;
            Ok((frame, ts.parse()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VideoMetadata {
        let mut start_timestamps = BTreeMap::new();
        start_timestamps.insert(
            -13,
            "2021-05-01T10:00:00Z".parse::<CaptureTimestamp>().unwrap(),
        );
        start_timestamps.insert(
            4487,
            "2021-05-01T10:03:00Z".parse::<CaptureTimestamp>().unwrap(),
        );
        VideoMetadata {
            hash: Some("d41d8cd98f00b204".to_string()),
            record_fps: 25,
            start_timestamps,
            i_frame_interval: Some(12),
            i_frame_starts: vec![0],
            idr_frame_interval: Some(24),
            idr_frame_starts: vec![0, 61],
            number_of_frames: 45_000,
            playback_fps: 25.0,
            start_tick: 3600,
        }
    }

    #[test]
    fn tag_round_trip() {
        let metadata = sample();
        let tags = metadata.to_tags();
        assert!(tags.iter().all(|(k, _)| k.starts_with(TAG_PREFIX)));

        let borrowed: Vec<(&str, &str)> =
            tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let read_back = VideoMetadata::from_tags(borrowed).unwrap().unwrap();
        assert_eq!(read_back, metadata);
    }

    #[test]
    fn unrelated_tags_yield_none() {
        let tags = vec![("encoder", "Lavf61.1.100"), ("title", "holiday")];
        assert_eq!(VideoMetadata::from_tags(tags).unwrap(), None);
    }

    #[test]
    fn partial_tags_are_an_error() {
        let tags = vec![("FRAMESTEP:recordFps", "25")];
        assert!(matches!(
            VideoMetadata::from_tags(tags),
            Err(FrameStepError::MissingMetadata { .. })
        ));
    }
}
