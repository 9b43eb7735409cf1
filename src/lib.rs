//! # framestep
//!
//! Frame-accurate random-access decoding for long video recordings.
//!
//! `framestep` turns a compressed, inter-predicted video file into something
//! you can treat like an array of frames: open a [`VideoSession`], ask for
//! frame `n`, get the decoded picture. A background fill pipeline keeps a
//! bounded window of decoded frames around the current position so that
//! stepping, short jumps, and smooth playback are all served from cache,
//! while far jumps translate into a single keyframe-accurate seek.
//!
//! Powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Random access
//!
//! ```no_run
//! use framestep::{GetFrame, SessionOptions, VideoSession};
//!
//! # async fn demo() -> Result<(), framestep::FrameStepError> {
//! let session = VideoSession::open("recording.mp4", SessionOptions::default())?;
//!
//! match session.get_frame(1500).await? {
//!     GetFrame::Frame(frame) => println!("frame 1500: pts {}", frame.pts()),
//!     GetFrame::Aborted => println!("superseded by a later request"),
//!     GetFrame::EndOfStream => println!("past the last frame"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Sequential decoding
//!
//! ```no_run
//! use framestep::{SessionOptions, VideoSession};
//!
//! # fn demo() -> Result<(), framestep::FrameStepError> {
//! let mut session = VideoSession::open("recording.mp4", SessionOptions::default())?;
//! for result in session.frames()? {
//!     let (frame_number, frame) = result?;
//!     println!("{frame_number}: {} ticks", frame.pts());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Embedded capture timestamps
//!
//! Recordings from MDPM-tagging cameras carry per-frame wall-clock capture
//! times in SEI units. [`VideoSession::scan_frame_info`] collects them
//! without decoding, and [`reconcile_timestamps`] compresses the result into
//! a compact table that maps any frame number back to its capture time.
//!
//! ## Design
//!
//! - **Frame numbers, not timestamps.** A one-time probe establishes the
//!   start tick and the constant frame duration; every API speaks integer
//!   frame numbers from there. Variable frame duration is rejected at open.
//! - **Bounded memory.** The cache holds `pre + 1 + post` decoded frames,
//!   anchored at the current position. Eviction is the only release point;
//!   handed-out frames stay alive through their [`Arc`](std::sync::Arc).
//! - **Stale results are aborts, not errors.** When a `get_frame` is
//!   superseded by a newer one, it resolves to [`GetFrame::Aborted`].
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

pub mod cache;
pub mod capture;
pub mod decoder;
pub mod error;
pub mod ffmpeg;
mod fill;
pub mod frame_info;
pub mod metadata;
pub mod nal;
pub mod packet_source;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod remux;
pub mod sequence;
pub mod session;
pub mod timing;

pub use cache::{CacheSlot, CacheStats, FrameCache};
pub use capture::CaptureTimestamp;
pub use decoder::{DecodeBackend, DecodedFrame, DecoderSession, SoftwareDecoder};
pub use error::FrameStepError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use frame_info::{FrameInfo, FrameInfoMap, FrameType};
pub use metadata::VideoMetadata;
pub use nal::{PacketSummary, scan_packet};
pub use packet_source::PacketSource;
pub use probe::probe_timing;
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use reconcile::{CompactTimestampTable, reconcile_timestamps};
pub use remux::{ArchiveOptions, archive};
pub use sequence::FrameSequence;
pub use session::{GetFrame, SessionOptions, VideoSession};
pub use timing::VideoTiming;
