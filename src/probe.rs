//! One-shot timing probe.
//!
//! Establishing the frame-number model needs facts only decoding reveals:
//! the presentation timestamp of the very first frame (containers report
//! packet order, not display order), the constant inter-frame delta, and a
//! representative keyframe spacing. [`probe_timing`] decodes the first two
//! groups of pictures with a throwaway demuxer and decoder, derives those
//! constants, and drops everything; the caller reopens the file fresh.
//!
//! Files whose first GOPs show more than one inter-frame delta are rejected:
//! the whole crate depends on `tick ↔ frame number` being a bijection.

use std::{
    collections::{BTreeSet, HashSet},
    path::Path,
};

use ffmpeg_next::{Error as FfmpegError, Packet, format, media};

use crate::{
    decoder::{DecodeBackend, SoftwareDecoder},
    error::FrameStepError,
    ffmpeg,
    timing::VideoTiming,
};

/// How many complete groups of pictures the probe decodes.
const GOPS_TO_CHECK: usize = 2;

/// Probe the video stream of `path` and derive its [`VideoTiming`].
///
/// # Errors
///
/// Fails when the file cannot be opened, contains no video stream, ends
/// before two complete groups of pictures, or shows a variable inter-frame
/// timestamp delta.
pub fn probe_timing<P: AsRef<Path>>(path: P) -> Result<VideoTiming, FrameStepError> {
    ffmpeg::init()?;
    let path = path.as_ref();
    log::debug!("Probing timing of {}", path.display());

    let mut input = format::input(&path).map_err(|e| FrameStepError::FileOpen {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(FrameStepError::NoVideoStream)?;
    let stream_index = stream.index();
    let time_base = stream.time_base();
    let duration_ticks = stream.duration();
    let is_annex_b = !ffmpeg::has_extradata(&stream.parameters());

    let mut decoder = SoftwareDecoder::open(path)?;

    let mut keyframe_pts: HashSet<i64> = HashSet::new();
    let mut emitted: Vec<i64> = Vec::new();

    // Read and decode until the third keyframe shows up in decoded output,
    // which closes the second GOP. The decoder is never flushed; trailing
    // frames would belong to a GOP the probe does not want.
    let mut walk = GopWalk::new(GOPS_TO_CHECK);
    'read: loop {
        let mut packet = Packet::empty();
        match packet.read(&mut input) {
            Ok(()) => {
                if packet.stream() != stream_index {
                    continue;
                }
                if packet.is_key() {
                    if let Some(pts) = packet.pts() {
                        keyframe_pts.insert(pts);
                    }
                }
                // Skip leading packets before the first keyframe.
                if keyframe_pts.is_empty() {
                    continue;
                }
                decoder.decode(&packet, &mut |frame| emitted.push(frame.pts()))?;
            }
            Err(FfmpegError::Eof) => {
                return Err(FrameStepError::TooFewGops {
                    observed: walk.completed_gops(),
                });
            }
            Err(e) => return Err(FrameStepError::from(e)),
        }

        for &pts in &emitted {
            if walk.observe(pts, keyframe_pts.contains(&pts)) {
                break 'read;
            }
        }
        emitted.clear();
    }

    walk.into_timing(duration_ticks, time_base, is_annex_b)
}

/// Accumulates per-frame observations until enough GOPs have been seen.
struct GopWalk {
    gops_wanted: usize,
    start_tick: Option<i64>,
    last_pts: Option<i64>,
    deltas: BTreeSet<i64>,
    gop_length: u64,
    max_gop_length: u64,
    gop_count: usize,
}

impl GopWalk {
    fn new(gops_wanted: usize) -> Self {
        Self {
            gops_wanted,
            start_tick: None,
            last_pts: None,
            deltas: BTreeSet::new(),
            gop_length: 0,
            max_gop_length: 0,
            gop_count: 0,
        }
    }

    fn completed_gops(&self) -> usize {
        self.gop_count.saturating_sub(1)
    }

    /// Record one decoded frame. Returns `true` once the wanted number of
    /// complete GOPs has been observed.
    fn observe(&mut self, pts: i64, is_key: bool) -> bool {
        if is_key {
            if self.gop_count > 0 {
                self.max_gop_length = self.max_gop_length.max(self.gop_length);
            }
            self.gop_length = 0;
            self.gop_count += 1;
        }
        if self.gop_count > self.gops_wanted {
            return true;
        }
        if self.start_tick.is_none() {
            self.start_tick = Some(pts);
        }
        if let Some(last) = self.last_pts {
            self.deltas.insert(pts - last);
        }
        self.gop_length += 1;
        self.last_pts = Some(pts);
        false
    }

    fn into_timing(
        self,
        duration_ticks: i64,
        time_base: ffmpeg_next::Rational,
        is_annex_b: bool,
    ) -> Result<VideoTiming, FrameStepError> {
        let start_tick = self.start_tick.ok_or(FrameStepError::TooFewGops {
            observed: 0,
        })?;
        let deltas: Vec<i64> = self.deltas.into_iter().collect();
        let [frame_duration_ticks] = deltas[..] else {
            return Err(FrameStepError::VariableFrameDuration(deltas));
        };

        let timing = VideoTiming {
            start_tick,
            end_tick: start_tick + duration_ticks,
            duration_ticks,
            frame_duration_ticks,
            max_gop_length: self.max_gop_length,
            time_base,
            is_annex_b,
        };
        log::debug!(
            "Probe: start_tick={}, frame_duration_ticks={}, max_gop_length={}, {} frames at {:.3} fps",
            timing.start_tick,
            timing.frame_duration_ticks,
            timing.max_gop_length,
            timing.frame_count(),
            timing.fps(),
        );
        Ok(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_counts_gops_and_deltas() {
        let mut walk = GopWalk::new(2);
        // Two GOPs of 3 frames at delta 3600, then the third keyframe.
        let frames = [
            (0, true),
            (3600, false),
            (7200, false),
            (10800, true),
            (14400, false),
            (18000, false),
        ];
        for (pts, key) in frames {
            assert!(!walk.observe(pts, key));
        }
        assert!(walk.observe(21600, true));
        let timing = walk
            .into_timing(90_000, ffmpeg_next::Rational::new(1, 90_000), true)
            .unwrap();
        assert_eq!(timing.start_tick, 0);
        assert_eq!(timing.frame_duration_ticks, 3600);
        assert_eq!(timing.max_gop_length, 3);
    }

    #[test]
    fn walk_rejects_variable_deltas() {
        let mut walk = GopWalk::new(2);
        for (pts, key) in [(0, true), (3600, false), (7300, false), (10800, true)] {
            walk.observe(pts, key);
        }
        walk.observe(21600, true);
        let result = walk.into_timing(90_000, ffmpeg_next::Rational::new(1, 90_000), true);
        assert!(matches!(
            result,
            Err(FrameStepError::VariableFrameDuration(_))
        ));
    }
}
