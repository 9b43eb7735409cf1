//! Seekable packet supply for a single video stream.
//!
//! A [`PacketSource`] wraps the demuxer and exposes exactly two movements:
//! pull the next video packet, or seek to a frame number. A small state
//! machine (stopped, seeking, streaming with a pending queue) enforces the
//! single-consumer discipline: overlapping reads or a read during a seek are
//! bugs and surface as [`FrameStepError::SourceBusy`] rather than silently
//! interleaving packets.
//!
//! Reads are batched: one refill pulls several video packets into a pending
//! queue, which amortizes demuxer overhead the way a read-multi loop does.

use std::{collections::VecDeque, path::Path, path::PathBuf};

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational, codec, format, format::context::Input, media,
};
use ffmpeg_sys_next::{AVSEEK_FLAG_BYTE, avformat_seek_file};

use crate::{error::FrameStepError, ffmpeg, timing::VideoTiming};

/// How many video packets one locked refill pulls in.
const READ_BATCH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    /// Freshly opened; a seek must position the stream before reading.
    Stopped,
    /// A seek is in flight.
    Seeking,
    /// Packets can be read. `locked` guards the refill itself.
    Streaming { locked: bool },
}

/// Demuxer wrapper for the one video stream of a media file.
pub struct PacketSource {
    input: Input,
    path: PathBuf,
    stream_index: usize,
    time_base: Rational,
    duration_ticks: i64,
    state: SourceState,
    pending: VecDeque<Packet>,
    end_of_stream: bool,
}

impl PacketSource {
    /// Open `path` and locate its video stream.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or does not contain exactly one
    /// video stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FrameStepError> {
        ffmpeg::init()?;
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening packet source for {}", path.display());

        let input = format::input(&path).map_err(|e| FrameStepError::FileOpen {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let video_streams: Vec<usize> = input
            .streams()
            .filter(|s| s.parameters().medium() == media::Type::Video)
            .map(|s| s.index())
            .collect();
        let stream_index = match video_streams.as_slice() {
            [] => return Err(FrameStepError::NoVideoStream),
            [index] => *index,
            more => return Err(FrameStepError::MultipleVideoStreams(more.len())),
        };

        let stream = input
            .stream(stream_index)
            .ok_or(FrameStepError::NoVideoStream)?;
        let time_base = stream.time_base();
        let duration_ticks = stream.duration();

        Ok(Self {
            input,
            path,
            stream_index,
            time_base,
            duration_ticks,
            state: SourceState::Stopped,
            pending: VecDeque::new(),
            end_of_stream: false,
        })
    }

    /// Path this source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time base of the video stream.
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Stream duration in ticks.
    pub fn duration_ticks(&self) -> i64 {
        self.duration_ticks
    }

    /// Codec parameters of the video stream.
    pub fn parameters(&self) -> codec::Parameters {
        self.input
            .stream(self.stream_index)
            .map(|s| s.parameters())
            .unwrap_or_else(codec::Parameters::new)
    }

    /// Whether the stream carries out-of-band codec configuration
    /// (extradata). Annex-B streams do not.
    pub fn has_extradata(&self) -> bool {
        ffmpeg::has_extradata(&self.parameters())
    }

    /// Container-level metadata tags as owned pairs.
    pub fn metadata_tags(&self) -> Vec<(String, String)> {
        self.input
            .metadata()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Pull the next video packet, refilling the pending queue as needed.
    ///
    /// Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// [`FrameStepError::SourceBusy`] when the source is not in an unlocked
    /// streaming state; demuxer read failures otherwise.
    pub fn next(&mut self) -> Result<Option<Packet>, FrameStepError> {
        loop {
            match self.state {
                SourceState::Streaming { locked: false } => {}
                _ => return Err(FrameStepError::SourceBusy),
            }
            if let Some(packet) = self.pending.pop_front() {
                return Ok(Some(packet));
            }
            if self.end_of_stream {
                return Ok(None);
            }
            self.refill()?;
        }
    }

    fn refill(&mut self) -> Result<(), FrameStepError> {
        self.state = SourceState::Streaming { locked: true };
        let result = self.read_batch();
        self.state = SourceState::Streaming { locked: false };
        result
    }

    fn read_batch(&mut self) -> Result<(), FrameStepError> {
        while self.pending.len() < READ_BATCH {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.pending.push_back(packet);
                    }
                }
                Err(FfmpegError::Eof) => {
                    self.end_of_stream = true;
                    break;
                }
                Err(e) => return Err(FrameStepError::from(e)),
            }
        }
        Ok(())
    }

    /// Position the stream so reading resumes at the keyframe at or before
    /// `frame_number`.
    ///
    /// Frame 0 rewinds to byte offset 0, which reproduces a fresh open even
    /// for containers that cannot seek backwards by timestamp. Any pending
    /// packets are discarded.
    ///
    /// # Errors
    ///
    /// [`FrameStepError::SourceBusy`] when called mid-seek or mid-read;
    /// [`FrameStepError::SeekFailed`] when the demuxer rejects the seek
    /// (fatal, seeks are not retried).
    pub fn seek(&mut self, frame_number: u64, timing: &VideoTiming) -> Result<(), FrameStepError> {
        match self.state {
            SourceState::Seeking | SourceState::Streaming { locked: true } => {
                return Err(FrameStepError::SourceBusy);
            }
            SourceState::Stopped | SourceState::Streaming { locked: false } => {}
        }
        self.state = SourceState::Seeking;
        log::debug!("Seeking packet source to frame {frame_number}");

        let result = if frame_number == 0 {
            self.raw_seek(0, AVSEEK_FLAG_BYTE)
        } else {
            self.raw_seek(timing.pts_for_frame_number(frame_number), 0)
        };

        // The stream restarts cleanly after either outcome; a failed seek is
        // fatal for the session but must not leave the source wedged.
        self.pending.clear();
        self.end_of_stream = false;
        self.state = SourceState::Streaming { locked: false };

        result.map_err(|e| FrameStepError::SeekFailed {
            frame_number,
            reason: e.to_string(),
        })
    }

    fn raw_seek(&mut self, target: i64, flags: i32) -> Result<(), FfmpegError> {
        // ffmpeg-next's seek wrapper only speaks AV_TIME_BASE and cannot do
        // byte seeks, so this calls the underlying API directly.
        let status = unsafe {
            avformat_seek_file(
                self.input.as_mut_ptr(),
                self.stream_index as i32,
                i64::MIN,
                target,
                target,
                flags,
            )
        };
        if status < 0 {
            return Err(FfmpegError::from(status));
        }
        Ok(())
    }
}
