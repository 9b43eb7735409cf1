//! The per-file session: open once, then step anywhere.
//!
//! [`VideoSession`] owns everything the crate knows about one recording:
//! the probed [`VideoTiming`], the decoded-frame cache, the background fill
//! pipeline, and any metadata embedded in the container by a previous
//! archive run.
//!
//! A session moves through a one-way lifecycle: opened (probing happens
//! inside [`VideoSession::open`]), ready, closed. The fill pipeline starts
//! lazily on the first [`get_frame`](VideoSession::get_frame) and owns the
//! packet pipeline from then on; the sequential and random-access paths are
//! mutually exclusive per session.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{
    cache::{CacheSlot, FrameCache},
    decoder::DecodedFrame,
    error::FrameStepError,
    ffmpeg, fill,
    frame_info::{FrameInfo, FrameInfoMap},
    metadata::VideoMetadata,
    packet_source::PacketSource,
    probe,
    progress::{CancellationToken, NoOpProgress, OperationType, ProgressCallback, ProgressTracker},
    sequence::FrameSequence,
    timing::VideoTiming,
};

/// Configuration for [`VideoSession::open`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Collect per-frame metadata (frame type, capture timestamp, byte
    /// offset) for every packet the fill pipeline touches.
    pub capture_frame_metadata: bool,
    /// Decoded frames kept behind the current position.
    pub pre_cache: u64,
    /// Decoded frames kept ahead of the current position.
    pub post_cache: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            capture_frame_metadata: false,
            pre_cache: 50,
            post_cache: 50,
        }
    }
}

/// Outcome of a [`VideoSession::get_frame`] call.
#[derive(Debug)]
pub enum GetFrame {
    /// The requested frame, decoded. The `Arc` keeps it alive after the
    /// cache evicts its slot.
    Frame(Arc<DecodedFrame>),
    /// A newer `get_frame` superseded this one. Not an error; the caller
    /// simply no longer wants this frame.
    Aborted,
    /// The stream ends before the requested frame number.
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ready,
    Closed,
}

/// Ownership of the packet pipeline: either the background fill pipeline or
/// a [`FrameSequence`], never both.
struct PipelineState {
    fill: Option<fill::FillHandle>,
    taken: bool,
}

/// Random access to the frames of one video file.
///
/// See the [crate docs](crate) for an overview and examples.
pub struct VideoSession {
    path: PathBuf,
    options: SessionOptions,
    timing: VideoTiming,
    cache: Arc<FrameCache>,
    capture: Option<Arc<Mutex<FrameInfoMap>>>,
    fatal: Arc<Mutex<Option<String>>>,
    pipeline: Mutex<PipelineState>,
    state: SessionState,
    container_tags: Vec<(String, String)>,
    embedded_metadata: Option<VideoMetadata>,
}

impl VideoSession {
    /// Open `path` and probe its timing.
    ///
    /// This decodes the first two groups of pictures to establish the frame
    /// grid, reads back any metadata tags a previous archive run embedded,
    /// and allocates the frame cache. No background work starts yet.
    ///
    /// # Errors
    ///
    /// Anything fatal about the file surfaces here: open failures, zero or
    /// multiple video streams, variable frame duration, fewer than two
    /// GOPs, malformed embedded metadata.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use framestep::{SessionOptions, VideoSession};
    ///
    /// let session = VideoSession::open("recording.mp4", SessionOptions::default())?;
    /// println!("{} frames at {:.2} fps", session.timing().frame_count(), session.timing().fps());
    /// # Ok::<(), framestep::FrameStepError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: SessionOptions) -> Result<Self, FrameStepError> {
        ffmpeg::init()?;
        let path = path.as_ref().to_path_buf();
        log::debug!("Opening session for {}", path.display());

        let timing = probe::probe_timing(&path)?;

        // A short-lived source just for the container tags; the fill
        // pipeline and scans open their own.
        let tag_source = PacketSource::open(&path)?;
        let container_tags = tag_source.metadata_tags();
        drop(tag_source);

        let borrowed: Vec<(&str, &str)> = container_tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let embedded_metadata = VideoMetadata::from_tags(borrowed)?;
        if embedded_metadata.is_some() {
            log::debug!("Found embedded metadata tags in {}", path.display());
        }

        let cache = Arc::new(FrameCache::new(0, options.pre_cache, options.post_cache));
        let capture = options
            .capture_frame_metadata
            .then(|| Arc::new(Mutex::new(FrameInfoMap::new())));

        Ok(Self {
            path,
            options,
            timing,
            cache,
            capture,
            fatal: Arc::new(Mutex::new(None)),
            pipeline: Mutex::new(PipelineState {
                fill: None,
                taken: false,
            }),
            state: SessionState::Ready,
            container_tags,
            embedded_metadata,
        })
    }

    /// The probed timing constants.
    pub fn timing(&self) -> &VideoTiming {
        &self.timing
    }

    /// Metadata embedded by a previous archive run, if any.
    pub fn container_metadata(&self) -> Option<&VideoMetadata> {
        self.embedded_metadata.as_ref()
    }

    /// All container-level tags, verbatim.
    pub fn container_tags(&self) -> &[(String, String)] {
        &self.container_tags
    }

    /// Path of the opened file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Per-frame metadata the fill pipeline collected so far for
    /// `frame_number`.
    ///
    /// Always `None` unless the session was opened with
    /// [`SessionOptions::capture_frame_metadata`].
    pub fn frame_info(&self, frame_number: u64) -> Option<FrameInfo> {
        let capture = self.capture.as_ref()?;
        let map = capture.lock().ok()?;
        map.get(&frame_number).cloned()
    }

    fn check_fatal(&self) -> Result<(), FrameStepError> {
        if let Ok(fatal) = self.fatal.lock() {
            if let Some(reason) = fatal.as_ref() {
                return Err(FrameStepError::PipelineFailure(reason.clone()));
            }
        }
        Ok(())
    }

    fn pipeline_lock(&self) -> std::sync::MutexGuard<'_, PipelineState> {
        match self.pipeline.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_fill_pipeline(&self) -> Result<(), FrameStepError> {
        let mut pipeline = self.pipeline_lock();
        if pipeline.fill.is_some() {
            return Ok(());
        }
        if pipeline.taken {
            return Err(FrameStepError::PipelineInUse);
        }
        pipeline.taken = true;
        pipeline.fill = Some(fill::spawn(fill::FillContext {
            path: self.path.clone(),
            timing: self.timing,
            cache: Arc::clone(&self.cache),
            capture: self.capture.as_ref().map(Arc::clone),
            fatal: Arc::clone(&self.fatal),
        }));
        Ok(())
    }

    /// Fetch the decoded frame for `frame_number`.
    ///
    /// Re-anchors the cache window at `frame_number` (evicting frames that
    /// leave it) and waits until the background pipeline delivers the
    /// frame. Takes `&self`, so concurrent tasks sharing the session can
    /// race: a later `get_frame` supersedes any still-waiting earlier one,
    /// which then resolves to [`GetFrame::Aborted`]. Asking past the end of
    /// the stream resolves to [`GetFrame::EndOfStream`]. Neither is an
    /// error. Dropping the returned future abandons the request without
    /// side effects beyond the window re-anchor.
    ///
    /// # Errors
    ///
    /// [`FrameStepError::SessionClosed`] after [`close`](Self::close);
    /// [`FrameStepError::PipelineInUse`] when [`frames`](Self::frames) owns
    /// the packet pipeline; [`FrameStepError::PipelineFailure`] when the
    /// background pipeline has died.
    pub async fn get_frame(&self, frame_number: u64) -> Result<GetFrame, FrameStepError> {
        if self.state == SessionState::Closed {
            return Err(FrameStepError::SessionClosed);
        }
        self.check_fatal()?;
        self.ensure_fill_pipeline()?;

        self.cache.set_current_frame_number(frame_number);

        loop {
            let notified = self.cache.change_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_fatal()?;
            if self.cache.current_frame_number() != frame_number {
                log::debug!("get_frame({frame_number}) superseded, aborting");
                return Ok(GetFrame::Aborted);
            }
            match self.cache.get(frame_number) {
                None => return Ok(GetFrame::Aborted),
                Some(CacheSlot::Decoded(frame)) => return Ok(GetFrame::Frame(frame)),
                Some(CacheSlot::PastEndOfStream) => return Ok(GetFrame::EndOfStream),
                Some(CacheSlot::Empty) | Some(CacheSlot::Pending) => {}
            }

            notified.await;
        }
    }

    /// Decode the whole recording in order.
    ///
    /// Returns a finite, non-restartable iterator over
    /// `(frame_number, frame)` pairs. Takes ownership of the packet
    /// pipeline for this session: once called, `get_frame` is unavailable
    /// (and vice versa once the fill pipeline has started).
    ///
    /// # Errors
    ///
    /// [`FrameStepError::PipelineInUse`] when the pipeline is already
    /// owned; open/seek failures otherwise.
    pub fn frames(&mut self) -> Result<FrameSequence, FrameStepError> {
        if self.state == SessionState::Closed {
            return Err(FrameStepError::SessionClosed);
        }
        {
            let mut pipeline = self.pipeline_lock();
            if pipeline.taken {
                return Err(FrameStepError::PipelineInUse);
            }
            pipeline.taken = true;
        }
        let source = PacketSource::open(&self.path)?;
        FrameSequence::open(source, self.timing)
    }

    /// Scan every packet of the recording and build the full per-frame
    /// metadata map, without decoding.
    ///
    /// Independent of the cache pipeline; uses its own demuxer and can run
    /// even while `get_frame` is in use. Half-frame packets (second fields
    /// of interlaced pairs) are skipped.
    ///
    /// # Errors
    ///
    /// [`FrameStepError::Cancelled`] when `cancel` fires; demuxer errors
    /// otherwise.
    pub fn scan_frame_info(
        &self,
        progress: Option<Arc<dyn ProgressCallback>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<FrameInfoMap, FrameStepError> {
        if self.state == SessionState::Closed {
            return Err(FrameStepError::SessionClosed);
        }
        let mut source = PacketSource::open(&self.path)?;
        source.seek(0, &self.timing)?;

        let mut tracker = ProgressTracker::new(
            progress.unwrap_or_else(|| Arc::new(NoOpProgress)),
            OperationType::MetadataScan,
            Some(self.timing.frame_count()),
            100,
        );

        let mut map = FrameInfoMap::new();
        while let Some(packet) = source.next()? {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(FrameStepError::Cancelled);
                }
            }
            let Some(pts) = packet.pts().or_else(|| packet.dts()) else {
                continue;
            };
            let Some(frame_number) = self.timing.frame_number_for_pts(pts) else {
                continue;
            };
            map.entry(frame_number)
                .or_insert_with(|| fill::packet_frame_info(&packet, pts, &self.timing));
            tracker.advance(Some(frame_number));
        }
        tracker.finish();
        log::debug!("Scanned metadata for {} frames", map.len());
        Ok(map)
    }

    /// Shut down the background pipeline and close the session.
    ///
    /// Idempotent. Frames already handed out stay valid through their
    /// `Arc`s; everything else is released.
    pub fn close(&mut self) {
        let taken = self.pipeline_lock().fill.take();
        if let Some(mut fill) = taken {
            fill.shutdown();
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for VideoSession {
    fn drop(&mut self) {
        self.close();
    }
}
