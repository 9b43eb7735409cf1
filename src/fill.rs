//! The background cache-fill pipeline.
//!
//! One pipeline per session, started lazily on the first `get_frame`. It
//! runs on a dedicated thread (the demuxer never crosses threads) and owns
//! a [`PacketSource`], a [`DecoderSession`], and a router thread that files
//! decoded frames into the shared [`FrameCache`] by their own timestamps.
//!
//! Each iteration of the fill loop:
//!
//! 1. waits while the decoder queue is above its ceiling,
//! 2. picks the first empty slot at or after the current frame (then
//!    behind it), suspending on the cache when there is nothing to do,
//! 3. feeds two packets when the wanted frame is close to the stream
//!    position (two, because interlaced sources emit field pairs), or
//! 4. flushes, resets decoder reference state, and seeks on a far jump.
//!
//! Fatal pipeline errors are recorded once and wake all cache waiters;
//! callers see them on their next `get_frame`.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
    mpsc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::{
    cache::{CacheSlot, FrameCache},
    decoder::{DecodedFrame, DecoderSession},
    error::FrameStepError,
    frame_info::{FrameInfo, FrameInfoMap},
    nal,
    packet_source::PacketSource,
    timing::VideoTiming,
};

/// Frames kept decoded behind the current position.
pub(crate) const PRE_FETCH: u64 = 12;
/// Frames kept decoded ahead of the current position.
pub(crate) const POST_FETCH: u64 = 12;
/// Decoder queue ceiling; above it the loop waits for dequeues.
const MAX_DECODER_QUEUE: usize = 10;
/// Forward gaps below this are bridged by feeding packets instead of
/// seeking.
const SMALL_DIFFERENCE: f64 = (PRE_FETCH + POST_FETCH + 15) as f64;
/// Small backward gaps happen with out-of-order frames; tolerate these
/// without a seek.
const BACKWARD_TOLERANCE: f64 = -5.0;
/// Upper bound on waits, so stop requests are noticed.
const WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Where the stream position is relative to frames already fed.
#[derive(Debug, Clone, Copy)]
enum LastFed {
    /// Nothing fed yet; only a seek establishes a position.
    Unknown,
    /// Just seeked; the demuxer position is exactly where we want it.
    GoodEnough,
    /// Frame position of the last packet fed (fractional for the second
    /// field of an interlaced pair).
    Position(f64),
}

/// Everything the pipeline shares with its session.
pub(crate) struct FillContext {
    pub path: std::path::PathBuf,
    pub timing: VideoTiming,
    pub cache: Arc<FrameCache>,
    pub capture: Option<Arc<Mutex<FrameInfoMap>>>,
    pub fatal: Arc<Mutex<Option<String>>>,
}

/// Handle to a running fill pipeline.
pub(crate) struct FillHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    cache: Arc<FrameCache>,
}

impl FillHandle {
    /// Ask the pipeline to stop and wait for it.
    pub(crate) fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.cache.poke();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FillHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start the pipeline thread.
pub(crate) fn spawn(context: FillContext) -> FillHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let cache = Arc::clone(&context.cache);
    let thread_stop = Arc::clone(&stop);
    let thread = thread::spawn(move || run(context, thread_stop));
    FillHandle {
        stop,
        thread: Some(thread),
        cache,
    }
}

fn record_fatal(context: &FillContext, error: &FrameStepError) {
    log::error!("Fill pipeline failed: {error}");
    if let Ok(mut fatal) = context.fatal.lock() {
        fatal.get_or_insert_with(|| error.to_string());
    }
    context.cache.poke();
}

fn run(context: FillContext, stop: Arc<AtomicBool>) {
    let mut source = match PacketSource::open(&context.path) {
        Ok(source) => source,
        Err(e) => {
            record_fatal(&context, &e);
            return;
        }
    };

    let (frame_tx, frame_rx) = mpsc::channel::<Result<DecodedFrame, FrameStepError>>();
    let session = DecoderSession::open(&context.path, frame_tx);
    let router = spawn_router(&context, frame_rx);

    if let Err(e) = fill_loop(&context, &stop, &mut source, &session) {
        record_fatal(&context, &e);
    }

    // Dropping the session closes its output channel, which ends the
    // router.
    drop(session);
    let _ = router.join();
}

/// Routes decoded frames into the cache by their own timestamps.
fn spawn_router(
    context: &FillContext,
    frames: mpsc::Receiver<Result<DecodedFrame, FrameStepError>>,
) -> JoinHandle<()> {
    let cache = Arc::clone(&context.cache);
    let fatal = Arc::clone(&context.fatal);
    let timing = context.timing;
    thread::spawn(move || {
        for result in frames {
            match result {
                Ok(frame) => {
                    let Some(frame_number) = timing.frame_number_for_pts(frame.pts()) else {
                        log::debug!(
                            "Dropping frame at tick {} outside the frame grid",
                            frame.pts()
                        );
                        continue;
                    };
                    let slot = CacheSlot::Decoded(Arc::new(frame));
                    if !cache.set(frame_number, slot) {
                        log::debug!("Dropping frame {frame_number} outside the cache window");
                    }
                }
                Err(e) => {
                    log::error!("Decoder reported: {e}");
                    if let Ok(mut fatal) = fatal.lock() {
                        fatal.get_or_insert_with(|| e.to_string());
                    }
                    cache.poke();
                }
            }
        }
    })
}

fn fill_loop(
    context: &FillContext,
    stop: &AtomicBool,
    source: &mut PacketSource,
    session: &DecoderSession,
) -> Result<(), FrameStepError> {
    let cache = &context.cache;
    let timing = &context.timing;
    let mut last_fed = LastFed::Unknown;

    while !stop.load(Ordering::Acquire) {
        if session.queue_depth() > MAX_DECODER_QUEUE {
            session.wait_for_dequeue(WAIT_TIMEOUT);
            continue;
        }

        let Some(next) = pick_next_frame(cache) else {
            cache.wait_for_change_blocking(WAIT_TIMEOUT);
            continue;
        };

        let gap = match last_fed {
            LastFed::Unknown => None,
            LastFed::GoodEnough => Some(0.0),
            LastFed::Position(position) => Some(next as f64 - position),
        };

        match gap {
            Some(gap) if gap > BACKWARD_TOLERANCE && gap < SMALL_DIFFERENCE => {
                // Two packets per round, for interlaced field pairs.
                for _ in 0..2 {
                    match source.next()? {
                        Some(packet) => feed_packet(context, session, packet, &mut last_fed)?,
                        None => {
                            cache.set(next, CacheSlot::PastEndOfStream);
                            session.flush()?;
                        }
                    }
                }
            }
            _ => {
                log::debug!("Far jump to frame {next}, flushing and seeking");
                session.flush()?;
                session.reset_reference_state()?;
                source.seek(next, timing)?;
                last_fed = LastFed::GoodEnough;
            }
        }
    }
    Ok(())
}

/// First empty slot worth decoding: current or ahead of it, otherwise just
/// behind it.
fn pick_next_frame(cache: &FrameCache) -> Option<u64> {
    let current = cache.current_frame_number() as i64;
    let is_empty = |slot: &CacheSlot| matches!(slot, CacheSlot::Empty);
    cache
        .find_first(current, current + POST_FETCH as i64, is_empty)
        .or_else(|| {
            cache.find_first(
                (current - PRE_FETCH as i64).max(0),
                current - 1,
                is_empty,
            )
        })
}

fn feed_packet(
    context: &FillContext,
    session: &DecoderSession,
    packet: ffmpeg_next::Packet,
    last_fed: &mut LastFed,
) -> Result<(), FrameStepError> {
    let timing = &context.timing;
    let Some(pts) = packet.pts().or_else(|| packet.dts()) else {
        log::warn!("Skipping packet without a timestamp");
        return Ok(());
    };

    let relative = pts - timing.start_tick;
    if relative < 0 {
        // Leading packets before the first displayed frame.
        return Ok(());
    }
    let position = relative as f64 / timing.frame_duration_ticks as f64;

    if let Some(frame_number) = timing.frame_number_for_pts(pts) {
        context.cache.set(frame_number, CacheSlot::Pending);

        if let Some(capture) = &context.capture {
            if let Ok(mut map) = capture.lock() {
                if !map.contains_key(&frame_number) {
                    map.insert(frame_number, packet_frame_info(&packet, pts, timing));
                }
            }
        }
    }

    session.decode(packet)?;
    *last_fed = LastFed::Position(position);
    Ok(())
}

/// Build the metadata record for one packet.
pub(crate) fn packet_frame_info(
    packet: &ffmpeg_next::Packet,
    pts: i64,
    timing: &VideoTiming,
) -> FrameInfo {
    let summary = packet
        .data()
        .map(|data| nal::scan_packet(data, timing.is_annex_b))
        .unwrap_or_default();
    FrameInfo {
        pts,
        dts: packet.dts(),
        frame_type: summary.frame_type,
        timestamp: summary.timestamp,
        start_byte: Some(packet.position() as i64).filter(|&p| p >= 0),
    }
}
