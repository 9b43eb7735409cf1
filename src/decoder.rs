//! Decoding: backend abstraction, worker-thread session, decoded frames.
//!
//! The cache-fill pipeline treats the decoder as an asynchronous device: it
//! pushes encoded packets in, decoded frames come back later, and a queue
//! depth counter provides backpressure. [`DecoderSession`] implements that
//! device by running a [`DecodeBackend`] on a dedicated worker thread, the
//! same shape as a hardware decode session.
//!
//! [`SoftwareDecoder`] is the FFmpeg-backed implementation. Its
//! `reset_reference_state` maps to `avcodec_flush_buffers`, which discards
//! all reference frames so that decoding can restart cleanly from the next
//! keyframe after a seek.

use std::{
    path::Path,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use ffmpeg_next::{
    Packet,
    codec::context::Context as CodecContext,
    format,
    frame,
    media,
};

use crate::{error::FrameStepError, ffmpeg};

/// One decoded video frame plus its presentation timestamp.
///
/// Owns the underlying FFmpeg frame; dropping the last reference releases
/// the pixel data.
pub struct DecodedFrame {
    frame: frame::Video,
    pts: i64,
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.frame.width())
            .field("height", &self.frame.height())
            .field("pts", &self.pts)
            .finish()
    }
}

impl DecodedFrame {
    /// Wrap a decoded frame. Mostly useful for tests with mock backends.
    pub fn new(frame: frame::Video, pts: i64) -> Self {
        Self { frame, pts }
    }

    /// Presentation timestamp in stream ticks.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// The decoded picture.
    pub fn frame(&self) -> &frame::Video {
        &self.frame
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.frame.height()
    }
}

/// A decoding capability the fill pipeline can drive.
///
/// Implementations are created inside the session's worker thread, so they
/// do not need to be [`Send`]; only the factory that builds them does.
pub trait DecodeBackend {
    /// Decode one encoded packet, handing any completed frames to `sink`.
    ///
    /// A single packet may produce zero frames (decoder latency) or several.
    fn decode(
        &mut self,
        packet: &Packet,
        sink: &mut dyn FnMut(DecodedFrame),
    ) -> Result<(), FrameStepError>;

    /// Signal end of input and drain every pending frame into `sink`.
    ///
    /// Idempotent: flushing an already-drained backend emits nothing.
    fn flush(&mut self, sink: &mut dyn FnMut(DecodedFrame)) -> Result<(), FrameStepError>;

    /// Discard all reference state so decoding can restart at a keyframe.
    fn reset_reference_state(&mut self) -> Result<(), FrameStepError>;
}

/// FFmpeg software decoder for one video stream.
pub struct SoftwareDecoder {
    decoder: ffmpeg_next::decoder::Video,
    eof_sent: bool,
}

impl SoftwareDecoder {
    /// Open the file at `path` and build a decoder for its video stream.
    ///
    /// The demuxer used to read the codec parameters is dropped before
    /// returning; only the decoder itself is kept.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened, has no video stream, or its
    /// codec is unsupported.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FrameStepError> {
        ffmpeg::init()?;
        let input = format::input(&path).map_err(|e| FrameStepError::FileOpen {
            path: path.as_ref().to_path_buf(),
            reason: e.to_string(),
        })?;
        let stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or(FrameStepError::NoVideoStream)?;
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()?;
        Ok(Self {
            decoder,
            eof_sent: false,
        })
    }

    /// Receive every frame the decoder has ready.
    fn drain_ready(&mut self, sink: &mut dyn FnMut(DecodedFrame)) {
        let mut decoded = frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let pts = decoded.pts().unwrap_or(0);
            sink(DecodedFrame::new(std::mem::replace(
                &mut decoded,
                frame::Video::empty(),
            ), pts));
        }
    }
}

impl DecodeBackend for SoftwareDecoder {
    fn decode(
        &mut self,
        packet: &Packet,
        sink: &mut dyn FnMut(DecodedFrame),
    ) -> Result<(), FrameStepError> {
        if self.eof_sent {
            return Err(FrameStepError::DecodeError(
                "decoder is drained; reset before feeding more packets".to_string(),
            ));
        }
        self.decoder
            .send_packet(packet)
            .map_err(|e| FrameStepError::DecodeError(e.to_string()))?;
        self.drain_ready(sink);
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn FnMut(DecodedFrame)) -> Result<(), FrameStepError> {
        if !self.eof_sent {
            self.decoder
                .send_eof()
                .map_err(|e| FrameStepError::DecodeError(e.to_string()))?;
            self.eof_sent = true;
        }
        self.drain_ready(sink);
        Ok(())
    }

    fn reset_reference_state(&mut self) -> Result<(), FrameStepError> {
        self.decoder.flush();
        self.eof_sent = false;
        Ok(())
    }
}

enum Command {
    Decode(Packet),
    Flush(mpsc::Sender<()>),
    Reset,
}

/// A decode backend running on its own worker thread.
///
/// Packets go in without blocking; decoded frames come out on the channel
/// given at spawn time. [`queue_depth`](DecoderSession::queue_depth) counts
/// packets accepted but not yet decoded, and
/// [`wait_for_dequeue`](DecoderSession::wait_for_dequeue) blocks until the
/// worker makes progress, which is the fill loop's backpressure signal.
///
/// Dropping the session shuts the worker down and joins it.
pub struct DecoderSession {
    commands: mpsc::Sender<Command>,
    depth: Arc<AtomicUsize>,
    dequeue: Arc<(Mutex<()>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl DecoderSession {
    /// Spawn a worker around the backend that `factory` builds.
    ///
    /// The factory runs on the worker thread, so the backend itself never
    /// crosses threads. Decoded frames and fatal backend errors are sent to
    /// `output`; the channel closes when the session shuts down.
    pub fn spawn<B, F>(
        factory: F,
        output: mpsc::Sender<Result<DecodedFrame, FrameStepError>>,
    ) -> Self
    where
        B: DecodeBackend,
        F: FnOnce() -> Result<B, FrameStepError> + Send + 'static,
    {
        let (commands, command_rx) = mpsc::channel::<Command>();
        let depth = Arc::new(AtomicUsize::new(0));
        let dequeue = Arc::new((Mutex::new(()), Condvar::new()));

        let worker_depth = Arc::clone(&depth);
        let worker_dequeue = Arc::clone(&dequeue);
        let worker = thread::spawn(move || {
            let mut backend = match factory() {
                Ok(backend) => backend,
                Err(e) => {
                    let _ = output.send(Err(e));
                    return;
                }
            };

            let mut sink = |frame: DecodedFrame| {
                // The receiver may already be gone during shutdown.
                let _ = output.send(Ok(frame));
            };

            while let Ok(command) = command_rx.recv() {
                let result = match command {
                    Command::Decode(packet) => {
                        let result = backend.decode(&packet, &mut sink);
                        worker_depth.fetch_sub(1, Ordering::AcqRel);
                        worker_dequeue.1.notify_all();
                        result
                    }
                    Command::Flush(ack) => {
                        let result = backend.flush(&mut sink);
                        let _ = ack.send(());
                        result
                    }
                    Command::Reset => backend.reset_reference_state(),
                };
                if let Err(e) = result {
                    let _ = output.send(Err(e));
                }
            }
        });

        Self {
            commands,
            depth,
            dequeue,
            worker: Some(worker),
        }
    }

    /// Spawn a session decoding the video stream of the file at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        output: mpsc::Sender<Result<DecodedFrame, FrameStepError>>,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::spawn(move || SoftwareDecoder::open(path), output)
    }

    /// Queue one packet for decoding. Returns immediately.
    pub fn decode(&self, packet: Packet) -> Result<(), FrameStepError> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.commands.send(Command::Decode(packet)).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            FrameStepError::SessionClosed
        })
    }

    /// Drain the backend and block until every pending frame was delivered.
    pub fn flush(&self) -> Result<(), FrameStepError> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.commands
            .send(Command::Flush(ack_tx))
            .map_err(|_| FrameStepError::SessionClosed)?;
        ack_rx.recv().map_err(|_| FrameStepError::SessionClosed)
    }

    /// Ask the backend to discard its reference state.
    pub fn reset_reference_state(&self) -> Result<(), FrameStepError> {
        self.commands
            .send(Command::Reset)
            .map_err(|_| FrameStepError::SessionClosed)
    }

    /// Packets accepted but not yet decoded.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Block until the worker dequeues a packet, or `timeout` elapses.
    pub fn wait_for_dequeue(&self, timeout: Duration) {
        let (lock, condvar) = &*self.dequeue;
        if let Ok(guard) = lock.lock() {
            let _ = condvar.wait_timeout(guard, timeout);
        }
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        // Closing the command channel ends the worker loop.
        let (closed, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.commands, closed));
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
