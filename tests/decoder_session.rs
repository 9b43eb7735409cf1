//! Decoder session worker tests with a mock backend.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
    mpsc,
};

use ffmpeg_next::{Packet, frame};
use framestep::{DecodeBackend, DecodedFrame, DecoderSession, FrameStepError};

/// Buffers one frame to mimic decoder latency; flush drains the remainder.
struct MockBackend {
    buffered: Vec<i64>,
    resets: Arc<AtomicUsize>,
}

impl MockBackend {
    fn factory(resets: Arc<AtomicUsize>) -> impl FnOnce() -> Result<Self, FrameStepError> + Send {
        move || {
            Ok(Self {
                buffered: Vec::new(),
                resets,
            })
        }
    }
}

impl DecodeBackend for MockBackend {
    fn decode(
        &mut self,
        packet: &Packet,
        sink: &mut dyn FnMut(DecodedFrame),
    ) -> Result<(), FrameStepError> {
        self.buffered.push(packet.pts().unwrap_or(0));
        if self.buffered.len() > 1 {
            let pts = self.buffered.remove(0);
            sink(DecodedFrame::new(frame::Video::empty(), pts));
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn FnMut(DecodedFrame)) -> Result<(), FrameStepError> {
        for pts in self.buffered.drain(..) {
            sink(DecodedFrame::new(frame::Video::empty(), pts));
        }
        Ok(())
    }

    fn reset_reference_state(&mut self) -> Result<(), FrameStepError> {
        self.buffered.clear();
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn packet_with_pts(pts: i64) -> Packet {
    let mut packet = Packet::empty();
    packet.set_pts(Some(pts));
    packet
}

#[test]
fn frames_arrive_in_feed_order() {
    let (tx, rx) = mpsc::channel();
    let session = DecoderSession::spawn(MockBackend::factory(Arc::default()), tx);

    for pts in 0..4 {
        session.decode(packet_with_pts(pts)).expect("decode");
    }
    session.flush().expect("flush");
    drop(session);

    let delivered: Vec<i64> = rx.into_iter().map(|r| r.expect("frame").pts()).collect();
    assert_eq!(delivered, vec![0, 1, 2, 3]);
}

#[test]
fn flush_blocks_until_buffered_frames_are_out() {
    let (tx, rx) = mpsc::channel();
    let session = DecoderSession::spawn(MockBackend::factory(Arc::default()), tx);

    session.decode(packet_with_pts(7)).expect("decode");
    session.flush().expect("flush");

    // The ack came back, so the buffered frame must already be sent.
    let frame = rx.try_recv().expect("frame available").expect("frame");
    assert_eq!(frame.pts(), 7);
}

#[test]
fn queue_depth_drains_to_zero() {
    let (tx, _rx) = mpsc::channel();
    let session = DecoderSession::spawn(MockBackend::factory(Arc::default()), tx);

    for pts in 0..8 {
        session.decode(packet_with_pts(pts)).expect("decode");
    }
    session.flush().expect("flush");
    assert_eq!(session.queue_depth(), 0);
}

#[test]
fn reset_reaches_the_backend() {
    let resets = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let session = DecoderSession::spawn(MockBackend::factory(Arc::clone(&resets)), tx);

    session.decode(packet_with_pts(1)).expect("decode");
    session.reset_reference_state().expect("reset");
    session.flush().expect("flush");

    assert_eq!(resets.load(Ordering::SeqCst), 1);
    // The buffered frame was discarded by the reset.
    assert!(rx.try_recv().is_err());
}

#[test]
fn factory_failure_surfaces_on_the_output_channel() {
    let (tx, rx) = mpsc::channel();
    let _session = DecoderSession::spawn(
        || Err::<MockBackend, _>(FrameStepError::NoVideoStream),
        tx,
    );

    let result = rx.recv().expect("error delivered");
    assert!(matches!(result, Err(FrameStepError::NoVideoStream)));
}
