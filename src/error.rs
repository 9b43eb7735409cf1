//! Error types for the `framestep` crate.
//!
//! This module defines [`FrameStepError`], the unified error type returned by
//! all fallible operations. Fatal conditions (probe failures, seek errors,
//! irrecoverable stream properties) each get their own variant with enough
//! context to diagnose the problem without extra logging at the call site.
//! Transient conditions — a frame scrolling out of the cache window, a stale
//! decode — are *not* errors; see [`GetFrame`](crate::GetFrame).

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use thiserror::Error;

/// The unified error type for all `framestep` operations.
///
/// Every public method that can fail returns `Result<T, FrameStepError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameStepError {
    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::VideoSession::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// The file contains more than one video stream; the cache needs exactly
    /// one.
    #[error("File contains {0} video streams, expected exactly one")]
    MultipleVideoStreams(usize),

    /// The probe observed more than one distinct inter-frame timestamp delta.
    ///
    /// The whole frame-number model assumes a constant frame duration, so
    /// this is fatal at open time.
    #[error("Variable frame duration: observed tick deltas {0:?}")]
    VariableFrameDuration(Vec<i64>),

    /// The probe hit end of stream before seeing two complete groups of
    /// pictures.
    #[error("Stream ended after {observed} group(s) of pictures; need at least 2 to probe timing")]
    TooFewGops {
        /// Number of complete GOPs seen before end of stream.
        observed: usize,
    },

    /// The record frame rate computed from embedded capture timestamps is not
    /// close enough to a whole number.
    #[error("Record frame rate {computed} is not within 0.05 of a positive integer")]
    NonIntegerRecordFps {
        /// The raw frames-per-elapsed-second value.
        computed: f64,
    },

    /// Fewer than two embedded capture timestamps were found, so no compact
    /// timestamp table can be built.
    #[error("Found {found} embedded capture timestamp(s), need at least 2")]
    TooFewTimestamps {
        /// Number of timestamped frames in the scanned map.
        found: usize,
    },

    /// The embedded capture timestamps change timezone partway through the
    /// recording.
    #[error("Capture timestamp timezone changes mid-recording")]
    TimezoneChange,

    /// A demuxer seek failed. Fatal for the session; seeks are not retried.
    #[error("Seek to frame {frame_number} failed: {reason}")]
    SeekFailed {
        /// The frame number the seek targeted.
        frame_number: u64,
        /// FFmpeg's report of what went wrong.
        reason: String,
    },

    /// The packet source was read while not in an unlocked streaming state
    /// (never seeked, mid-seek, or a refill already in flight).
    #[error("Packet source is not streaming (stopped, seeking, or mid-read)")]
    SourceBusy,

    /// The packet pipeline has already been handed out (to the fill loop or
    /// to a previous `frames()` call) and cannot be reused.
    #[error("Packet pipeline is already in use; reopen the session for another pass")]
    PipelineInUse,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    DecodeError(String),

    /// The background fill pipeline died; the stored reason is surfaced on
    /// the next cache operation.
    #[error("Background pipeline failed: {0}")]
    PipelineFailure(String),

    /// The session has been closed; no further operations are possible.
    #[error("Session is closed")]
    SessionClosed,

    /// A required metadata tag was missing when reading an archived file.
    #[error("Missing metadata tag: {key}")]
    MissingMetadata {
        /// The tag key (without prefix) that was absent.
        key: String,
    },

    /// A metadata tag value could not be parsed.
    #[error("Malformed metadata tag {key}: {reason}")]
    MetadataParse {
        /// The tag key (without prefix).
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A capture timestamp string was not valid RFC 3339.
    #[error("Malformed capture timestamp: {0}")]
    TimestampParse(String),

    /// Remuxing (archival stream copy) failed.
    #[error("Remux error: {0}")]
    RemuxError(String),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// A JSON value embedded in a container tag could not be encoded or
    /// decoded.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<FfmpegError> for FrameStepError {
    fn from(error: FfmpegError) -> Self {
        FrameStepError::FfmpegError(error.to_string())
    }
}
