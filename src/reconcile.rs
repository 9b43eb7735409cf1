//! Capture-timestamp reconciliation and keyframe-position compression.
//!
//! Embedded capture timestamps have whole-second resolution: at a record
//! rate of 25 fps, up to 25 consecutive frames share one timestamp, and the
//! first frame of a recording rarely falls exactly on a second boundary.
//! [`reconcile_timestamps`] walks the sparse per-frame samples and reduces
//! them to a handful of anchors from which every frame's capture time can be
//! recomputed, shifting anchors retroactively when a later sample reveals
//! the true second boundary.
//!
//! The same pass compresses the I-frame and IDR-frame position lists into an
//! interval plus exception starts, so that a seek can find the keyframe
//! at-or-before any frame number without storing every position.

use std::collections::BTreeMap;

use crate::{
    capture::CaptureTimestamp,
    error::FrameStepError,
    frame_info::{FrameInfoMap, FrameType},
};

/// The compact form of a full per-frame metadata map.
///
/// Small enough to embed in container tags, sufficient to reconstruct the
/// capture time of any frame and the keyframe layout of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactTimestampTable {
    /// Whole-number record rate in frames per second.
    ///
    /// May differ from the playback rate; time-lapse material records far
    /// below its playback rate.
    pub record_fps: u32,
    /// Anchor frames: each maps a frame number to the capture second that
    /// begins there. Anchor numbers can be negative after a retroactive
    /// shift moved the first anchor before the start of the stream.
    pub start_timestamps: BTreeMap<i64, CaptureTimestamp>,
    /// Dominant I-frame spacing, `None` when fewer than two I-frames exist.
    pub i_frame_interval: Option<u64>,
    /// I-frame progression starts (first frame plus every I-frame not on an
    /// earlier start's grid).
    pub i_frame_starts: Vec<u64>,
    /// Dominant IDR spacing, `None` when fewer than two IDR frames exist.
    pub idr_frame_interval: Option<u64>,
    /// IDR progression starts.
    pub idr_frame_starts: Vec<u64>,
}

impl CompactTimestampTable {
    /// Capture time of an arbitrary frame.
    ///
    /// Uses the nearest anchor at or before `frame_number`; returns `None`
    /// when the frame precedes every anchor.
    pub fn timestamp_for_frame(&self, frame_number: u64) -> Option<CaptureTimestamp> {
        let n = frame_number as i64;
        let (&anchor_frame, anchor_ts) = self.start_timestamps.range(..=n).next_back()?;
        let seconds = (n - anchor_frame) / self.record_fps as i64;
        Some(anchor_ts.plus_seconds(seconds))
    }
}

/// Reduce a scanned frame-metadata map to a [`CompactTimestampTable`].
///
/// # Errors
///
/// Fails when fewer than two frames carry capture timestamps, when the
/// timezone changes mid-recording, or when the implied record rate is not
/// within 0.05 of a positive whole number.
pub fn reconcile_timestamps(
    frame_info: &FrameInfoMap,
) -> Result<CompactTimestampTable, FrameStepError> {
    let samples: Vec<(u64, CaptureTimestamp)> = frame_info
        .iter()
        .filter_map(|(&n, info)| info.timestamp.map(|ts| (n, ts)))
        .collect();

    if samples.len() < 2 {
        return Err(FrameStepError::TooFewTimestamps {
            found: samples.len(),
        });
    }

    let offset = samples[0].1.offset_seconds();
    if samples.iter().any(|(_, ts)| ts.offset_seconds() != offset) {
        return Err(FrameStepError::TimezoneChange);
    }

    let record_fps = derive_record_fps(&samples)?;
    let start_timestamps = walk_anchors(&samples, record_fps);

    let i_frames: Vec<u64> = frame_info
        .iter()
        .filter(|(_, info)| {
            matches!(info.frame_type, Some(FrameType::I) | Some(FrameType::Idr))
        })
        .map(|(&n, _)| n)
        .collect();
    let idr_frames: Vec<u64> = frame_info
        .iter()
        .filter(|(_, info)| info.frame_type == Some(FrameType::Idr))
        .map(|(&n, _)| n)
        .collect();

    let (i_frame_interval, i_frame_starts) = interval_and_starts(&i_frames);
    let (idr_frame_interval, idr_frame_starts) = interval_and_starts(&idr_frames);

    Ok(CompactTimestampTable {
        record_fps,
        start_timestamps,
        i_frame_interval,
        i_frame_starts,
        idr_frame_interval,
        idr_frame_starts,
    })
}

/// Record rate from the first and last timestamped frames.
fn derive_record_fps(samples: &[(u64, CaptureTimestamp)]) -> Result<u32, FrameStepError> {
    let (first_frame, first_ts) = samples[0];
    let (last_frame, last_ts) = *samples.last().expect("checked len >= 2");

    let elapsed = last_ts.seconds_since(&first_ts);
    let computed = (last_frame - first_frame) as f64 / elapsed as f64;
    log::debug!("record rate over {elapsed}s: {computed} fps");

    let rounded = computed.round();
    if !computed.is_finite() || (computed - rounded).abs() > 0.05 || rounded <= 0.0 {
        return Err(FrameStepError::NonIntegerRecordFps { computed });
    }
    Ok(rounded as u32)
}

/// Reduce timestamp samples to anchors.
///
/// Within one capture second up to `record_fps` frames share a timestamp.
/// Each sample is checked against the running anchor with frame offsets
/// `0..record_fps`; matching at a nonzero offset proves the anchor started
/// that many frames earlier, so it is shifted back retroactively. Earlier
/// anchors swallowed by the shift are merged when they agree on the
/// timestamp; on disagreement the earlier anchor wins and the shift is
/// abandoned with a warning. A sample no offset can explain starts a new
/// anchor.
fn walk_anchors(
    samples: &[(u64, CaptureTimestamp)],
    record_fps: u32,
) -> BTreeMap<i64, CaptureTimestamp> {
    let fps = record_fps as i64;
    let (first_frame, first_ts) = samples[0];
    let mut anchors: Vec<(i64, CaptureTimestamp)> = vec![(first_frame as i64, first_ts)];
    let mut possible_offset = fps - 1;

    for &(frame, ts) in samples {
        let frame = frame as i64;
        let (anchor_frame, anchor_ts) = *anchors.last().expect("anchors never empty");

        for offset in 0..=possible_offset {
            let expected =
                anchor_ts.plus_seconds((frame - anchor_frame + offset).div_euclid(fps));
            if expected == ts {
                if offset != 0 {
                    apply_shift(&mut anchors, offset, &mut possible_offset);
                }
                break;
            }
            if offset == possible_offset {
                log::debug!("frame {frame}: new timestamp anchor {ts}");
                anchors.push((frame, ts));
                possible_offset = fps - 1;
                break;
            }
        }
    }

    anchors.into_iter().collect()
}

/// Shift the last anchor back by `offset` frames, merging earlier anchors it
/// now covers.
fn apply_shift(anchors: &mut Vec<(i64, CaptureTimestamp)>, offset: i64, possible_offset: &mut i64) {
    let (last_frame, last_ts) = *anchors.last().expect("anchors never empty");
    let shifted_frame = last_frame - offset;

    // Earlier anchors at or past the shifted position must agree on the
    // timestamp to be merged away; a disagreeing anchor wins and the shift
    // is dropped.
    let mut keep = anchors.len() - 1;
    while keep > 0 && shifted_frame <= anchors[keep - 1].0 {
        if anchors[keep - 1].1 != last_ts {
            log::warn!(
                "timestamp anchor at frame {} disagrees with shift of anchor {} by {} frames, keeping the earlier anchor",
                anchors[keep - 1].0,
                last_frame,
                offset,
            );
            return;
        }
        keep -= 1;
    }

    anchors.truncate(keep);
    anchors.push((shifted_frame, last_ts));
    *possible_offset -= offset;
    log::debug!("anchor {last_frame} shifted back {offset} frames to {shifted_frame}");
}

/// Compress a sorted position list into a dominant interval plus starts.
///
/// The interval is the largest observed gap. The starts are the first
/// position plus every position that no earlier start reaches by a whole
/// number of intervals.
pub fn interval_and_starts(positions: &[u64]) -> (Option<u64>, Vec<u64>) {
    if positions.len() < 2 {
        return (None, positions.to_vec());
    }

    let interval = positions
        .windows(2)
        .map(|w| w[1] - w[0])
        .max()
        .expect("len >= 2");

    let mut starts: Vec<u64> = Vec::new();
    for &position in positions {
        let covered = starts
            .iter()
            .any(|&start| position >= start && (position - start) % interval == 0);
        if !covered {
            starts.push(position);
        }
    }

    (Some(interval), starts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(text: &str) -> CaptureTimestamp {
        text.parse().unwrap()
    }

    #[test]
    fn interval_compression_keeps_uncovered_starts() {
        let (interval, starts) = interval_and_starts(&[0, 30, 60, 61, 90]);
        assert_eq!(interval, Some(30));
        assert_eq!(starts, vec![0, 61]);
    }

    #[test]
    fn interval_compression_degenerate_lists() {
        assert_eq!(interval_and_starts(&[]), (None, vec![]));
        assert_eq!(interval_and_starts(&[7]), (None, vec![7]));
        assert_eq!(interval_and_starts(&[0, 25]), (Some(25), vec![0]));
    }

    #[test]
    fn anchor_walk_shifts_retroactively() {
        // 25 fps; the second ticks over at frame 12, so the first anchor
        // really started at frame -13.
        let samples = vec![
            (0, ts("2021-05-01T10:00:00Z")),
            (12, ts("2021-05-01T10:00:01Z")),
            (37, ts("2021-05-01T10:00:02Z")),
        ];
        let anchors = walk_anchors(&samples, 25);
        assert_eq!(anchors.len(), 1);
        let (&frame, &anchor_ts) = anchors.iter().next().unwrap();
        assert_eq!(frame, -13);
        assert_eq!(anchor_ts, ts("2021-05-01T10:00:00Z"));
    }

    #[test]
    fn anchor_walk_starts_new_anchor_on_discontinuity() {
        // A gap in recording: frame 100 jumps a full minute ahead.
        let samples = vec![
            (0, ts("2021-05-01T10:00:00Z")),
            (25, ts("2021-05-01T10:00:01Z")),
            (100, ts("2021-05-01T10:01:00Z")),
            (125, ts("2021-05-01T10:01:01Z")),
        ];
        let anchors = walk_anchors(&samples, 25);
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors.get(&0), Some(&ts("2021-05-01T10:00:00Z")));
        assert_eq!(anchors.get(&100), Some(&ts("2021-05-01T10:01:00Z")));
    }

    #[test]
    fn expansion_reproduces_sample_timestamps() {
        let mut map = FrameInfoMap::new();
        for (n, text) in [
            (0u64, "2021-05-01T10:00:00Z"),
            (12, "2021-05-01T10:00:01Z"),
            (37, "2021-05-01T10:00:02Z"),
            (62, "2021-05-01T10:00:03Z"),
        ] {
            map.insert(
                n,
                crate::frame_info::FrameInfo {
                    pts: n as i64 * 3600,
                    dts: None,
                    frame_type: None,
                    timestamp: Some(ts(text)),
                    start_byte: None,
                },
            );
        }
        let table = reconcile_timestamps(&map).unwrap();
        assert_eq!(table.record_fps, 25);
        for (n, info) in &map {
            assert_eq!(table.timestamp_for_frame(*n), info.timestamp);
        }
    }

    #[test]
    fn too_few_timestamps_is_fatal() {
        let map = FrameInfoMap::new();
        assert!(matches!(
            reconcile_timestamps(&map),
            Err(FrameStepError::TooFewTimestamps { found: 0 })
        ));
    }

    #[test]
    fn timezone_change_is_fatal() {
        let mut map = FrameInfoMap::new();
        for (n, text) in [
            (0u64, "2021-05-01T10:00:00+01:00"),
            (25, "2021-05-01T10:00:01+02:00"),
        ] {
            map.insert(
                n,
                crate::frame_info::FrameInfo {
                    pts: n as i64,
                    dts: None,
                    frame_type: None,
                    timestamp: Some(ts(text)),
                    start_byte: None,
                },
            );
        }
        assert!(matches!(
            reconcile_timestamps(&map),
            Err(FrameStepError::TimezoneChange)
        ));
    }

    #[test]
    fn fractional_record_fps_is_fatal() {
        let mut map = FrameInfoMap::new();
        // 10 frames over 3 seconds: 3.33 fps, not close to a whole number.
        for (n, text) in [(0u64, "2021-05-01T10:00:00Z"), (10, "2021-05-01T10:00:03Z")] {
            map.insert(
                n,
                crate::frame_info::FrameInfo {
                    pts: n as i64,
                    dts: None,
                    frame_type: None,
                    timestamp: Some(ts(text)),
                    start_byte: None,
                },
            );
        }
        assert!(matches!(
            reconcile_timestamps(&map),
            Err(FrameStepError::NonIntegerRecordFps { .. })
        ));
    }
}
