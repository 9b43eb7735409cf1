//! Archiving: stream-copy a recording with metadata tags embedded.
//!
//! [`archive`] rewrites a recording into a new container without touching
//! the video bitstream, equivalent to `ffmpeg -i in.mp4 -c:v copy -an
//! out.mp4` plus a set of container-level tags. A later
//! [`VideoSession::open`](crate::VideoSession::open) on the archived file
//! reads those tags back, so the expensive full-file scan and timestamp
//! reconciliation never have to run twice.
//!
//! # Example
//!
//! ```no_run
//! use framestep::{ArchiveOptions, SessionOptions, VideoMetadata, VideoSession, remux};
//!
//! let session = VideoSession::open("camera.mts", SessionOptions::default())?;
//! let info = session.scan_frame_info(None, None)?;
//! let table = framestep::reconcile_timestamps(&info)?;
//! let metadata = VideoMetadata::from_table(
//!     table,
//!     Some(remux::content_hash("camera.mts")?),
//!     session.timing().frame_count(),
//!     session.timing().fps(),
//!     session.timing().start_tick,
//! );
//! remux::archive("camera.mts", "camera.mp4", &metadata, &ArchiveOptions::default())?;
//! # Ok::<(), framestep::FrameStepError>(())
//! ```

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use ffmpeg_next::{Dictionary, codec::Id, media::Type};
use sha2::{Digest, Sha256};

use crate::{
    error::FrameStepError,
    ffmpeg,
    metadata::VideoMetadata,
    progress::{CancellationToken, NoOpProgress, OperationType, ProgressCallback, ProgressTracker},
};

/// Configuration for [`archive`].
#[derive(Default)]
pub struct ArchiveOptions {
    keep_audio: bool,
    progress: Option<Arc<dyn ProgressCallback>>,
    cancellation: Option<CancellationToken>,
}

impl ArchiveOptions {
    /// Copy audio streams into the archive as well. Off by default.
    #[must_use]
    pub fn keep_audio(mut self) -> Self {
        self.keep_audio = true;
        self
    }

    /// Report per-packet progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Abort when `token` is cancelled. The partially written output is
    /// left on disk.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Stream-copy `input` to `output` with `metadata` embedded as container
/// tags.
///
/// The output container format is inferred from the file extension. Video
/// is always copied; audio only with [`ArchiveOptions::keep_audio`];
/// subtitle and data streams never. Existing container tags on the input
/// are carried over, then the metadata tags are written on top.
///
/// # Errors
///
/// Returns [`FrameStepError::FileOpen`] when either file cannot be opened
/// or created, [`FrameStepError::Cancelled`] when the token fires, and
/// [`FrameStepError::FfmpegError`] for muxer failures.
pub fn archive<P1: AsRef<Path>, P2: AsRef<Path>>(
    input: P1,
    output: P2,
    metadata: &VideoMetadata,
    options: &ArchiveOptions,
) -> Result<(), FrameStepError> {
    ffmpeg::init()?;
    let input_path: PathBuf = input.as_ref().to_path_buf();
    let output_path: PathBuf = output.as_ref().to_path_buf();
    log::debug!(
        "Archiving {} to {}",
        input_path.display(),
        output_path.display()
    );

    let mut input_context =
        ffmpeg_next::format::input(&input_path).map_err(|e| FrameStepError::FileOpen {
            path: input_path.clone(),
            reason: e.to_string(),
        })?;

    let mut output_context =
        ffmpeg_next::format::output(&output_path).map_err(|e| FrameStepError::FileOpen {
            path: output_path.clone(),
            reason: format!("Failed to create output: {e}"),
        })?;

    // Stream mapping: input index to output index, None for dropped
    // streams.
    let mut stream_map: Vec<Option<usize>> = Vec::new();
    let mut video_indices: Vec<usize> = Vec::new();
    let mut output_stream_count: usize = 0;

    for stream in input_context.streams() {
        let medium = stream.parameters().medium();
        let include = match medium {
            Type::Video => true,
            Type::Audio => options.keep_audio,
            _ => false,
        };

        if include {
            let mut out_stream = output_context
                .add_stream(ffmpeg_next::encoder::find(Id::None))
                .map_err(|e| FrameStepError::RemuxError(e.to_string()))?;
            out_stream.set_parameters(stream.parameters());
            // Reset codec tag to let the muxer choose.
            unsafe {
                (*out_stream.parameters().as_mut_ptr()).codec_tag = 0;
            }
            if medium == Type::Video {
                video_indices.push(stream.index());
            }
            stream_map.push(Some(output_stream_count));
            output_stream_count += 1;
        } else {
            stream_map.push(None);
        }
    }

    let mut tags = Dictionary::new();
    for (key, value) in input_context.metadata().iter() {
        tags.set(key, value);
    }
    for (key, value) in metadata.to_tags() {
        tags.set(&key, &value);
    }
    output_context.set_metadata(tags);

    // The MOV/MP4 muxer only writes its known key list unless tags are
    // routed through the mdta/ilst atoms.
    let mut muxer_options = Dictionary::new();
    muxer_options.set("movflags", "use_metadata_tags");
    output_context
        .write_header_with(muxer_options)
        .map_err(|e| FrameStepError::RemuxError(e.to_string()))?;

    // The muxer may rewrite stream time bases in write_header.
    let output_time_bases: Vec<ffmpeg_next::Rational> = output_context
        .streams()
        .map(|stream| stream.time_base())
        .collect();

    let mut tracker = ProgressTracker::new(
        options
            .progress
            .clone()
            .unwrap_or_else(|| Arc::new(NoOpProgress)),
        OperationType::Archiving,
        Some(metadata.number_of_frames),
        100,
    );

    for (stream, mut packet) in input_context.packets() {
        if let Some(token) = &options.cancellation {
            if token.is_cancelled() {
                return Err(FrameStepError::Cancelled);
            }
        }

        let input_index = stream.index();
        let Some(output_index) = stream_map.get(input_index).copied().flatten() else {
            continue;
        };
        let Some(&output_time_base) = output_time_bases.get(output_index) else {
            continue;
        };

        let is_video = video_indices.contains(&input_index);
        packet.set_stream(output_index);
        packet.rescale_ts(stream.time_base(), output_time_base);
        packet.set_position(-1);
        packet
            .write_interleaved(&mut output_context)
            .map_err(|e| FrameStepError::RemuxError(e.to_string()))?;

        if is_video {
            tracker.advance(None);
        }
    }

    output_context
        .write_trailer()
        .map_err(|e| FrameStepError::RemuxError(e.to_string()))?;
    tracker.finish();
    log::debug!("Archive complete: {}", output_path.display());
    Ok(())
}

/// SHA-256 of the whole file, as lowercase hex.
///
/// Stored in the metadata tags so an archive can be matched back to its
/// source recording.
///
/// # Errors
///
/// Returns [`FrameStepError::IoError`] when the file cannot be read.
pub fn content_hash<P: AsRef<Path>>(path: P) -> Result<String, FrameStepError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}
