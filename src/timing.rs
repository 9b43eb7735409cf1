//! Stream timing constants and frame-number arithmetic.
//!
//! [`VideoTiming`] is the immutable result of the open-time probe. Every
//! other part of the crate converts between integer frame numbers and
//! stream ticks through it, so the conversions live here as methods rather
//! than free helpers.

use ffmpeg_next::Rational;

/// Timing constants for one video stream, established by a one-time probe.
///
/// All tick values are in stream time-base units. The frame duration is a
/// single constant; files with variable inter-frame deltas are rejected at
/// open time, which is what makes `tick ↔ frame number` a bijection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoTiming {
    /// Presentation timestamp of the first frame.
    pub start_tick: i64,
    /// Presentation timestamp just past the last frame
    /// (`start_tick + duration_ticks`).
    pub end_tick: i64,
    /// Total stream duration in ticks.
    pub duration_ticks: i64,
    /// Constant distance between consecutive frames, in ticks.
    pub frame_duration_ticks: i64,
    /// Largest observed keyframe-to-keyframe distance, in frames.
    ///
    /// Used to size seek-then-decode-forward work after a large jump.
    pub max_gop_length: u64,
    /// Stream time base (seconds per tick).
    pub time_base: Rational,
    /// Whether the bitstream is Annex-B framed (in-band parameter sets, no
    /// container extradata) as opposed to length-prefixed AVCC.
    pub is_annex_b: bool,
}

impl VideoTiming {
    /// Presentation timestamp for a frame number.
    pub fn pts_for_frame_number(&self, frame_number: u64) -> i64 {
        self.start_tick + frame_number as i64 * self.frame_duration_ticks
    }

    /// Frame number for a presentation timestamp.
    ///
    /// Returns `None` when the timestamp lies before the stream start or
    /// does not fall on a whole frame boundary (interlaced sources emit
    /// half-frame positions for the second field of a pair).
    pub fn frame_number_for_pts(&self, pts: i64) -> Option<u64> {
        let relative = pts - self.start_tick;
        if relative < 0 || relative % self.frame_duration_ticks != 0 {
            return None;
        }
        Some((relative / self.frame_duration_ticks) as u64)
    }

    /// Playback frame rate in frames per second.
    pub fn fps(&self) -> f64 {
        1.0 / (self.frame_duration_ticks as f64 * f64::from(self.time_base))
    }

    /// Total number of frames in the stream.
    pub fn frame_count(&self) -> u64 {
        (self.duration_ticks / self.frame_duration_ticks) as u64
    }

    /// Stream duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.duration_ticks as f64 * f64::from(self.time_base)
    }

    /// Seconds from the stream start to the given frame number.
    pub fn seconds_for_frame_number(&self, frame_number: u64) -> f64 {
        frame_number as f64 * self.frame_duration_ticks as f64 * f64::from(self.time_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> VideoTiming {
        VideoTiming {
            start_tick: 3600,
            end_tick: 3600 + 90_000 * 10,
            duration_ticks: 90_000 * 10,
            frame_duration_ticks: 3600,
            max_gop_length: 25,
            time_base: Rational::new(1, 90_000),
            is_annex_b: true,
        }
    }

    #[test]
    fn pts_and_frame_number_round_trip() {
        let t = timing();
        for n in [0u64, 1, 7, 249] {
            assert_eq!(t.frame_number_for_pts(t.pts_for_frame_number(n)), Some(n));
        }
    }

    #[test]
    fn pre_start_pts_has_no_frame_number() {
        let t = timing();
        assert_eq!(t.frame_number_for_pts(0), None);
        assert_eq!(t.frame_number_for_pts(3599), None);
    }

    #[test]
    fn half_frame_pts_has_no_frame_number() {
        let t = timing();
        assert_eq!(t.frame_number_for_pts(3600 + 1800), None);
    }

    #[test]
    fn fps_from_time_base() {
        let t = timing();
        assert!((t.fps() - 25.0).abs() < 1e-9);
        assert_eq!(t.frame_count(), 250);
    }
}
