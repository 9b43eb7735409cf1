//! Sequential frame iteration.
//!
//! [`FrameSequence`] decodes a recording front to back in strict packet
//! order: one `seek(0)` (a byte rewind, so even containers that cannot seek
//! backwards by timestamp start clean), then packets are fed to a private
//! decoder as fast as it accepts them. This is the bulk-export path; it
//! bypasses the frame cache entirely.
//!
//! The iterator is finite and not restartable. Frame numbers come from each
//! decoded frame's own timestamp, and successive items increase by exactly
//! one frame.

use std::collections::VecDeque;

use crate::{
    decoder::{DecodeBackend, DecodedFrame, SoftwareDecoder},
    error::FrameStepError,
    packet_source::PacketSource,
    timing::VideoTiming,
};

/// Iterator over `(frame_number, frame)` pairs in presentation order.
///
/// Created by [`VideoSession::frames`](crate::VideoSession::frames).
pub struct FrameSequence {
    source: PacketSource,
    decoder: SoftwareDecoder,
    timing: VideoTiming,
    ready: VecDeque<DecodedFrame>,
    flushed: bool,
    done: bool,
}

impl FrameSequence {
    pub(crate) fn open(source: PacketSource, timing: VideoTiming) -> Result<Self, FrameStepError> {
        let mut source = source;
        source.seek(0, &timing)?;
        let decoder = SoftwareDecoder::open(source.path())?;
        Ok(Self {
            source,
            decoder,
            timing,
            ready: VecDeque::new(),
            flushed: false,
            done: false,
        })
    }

    /// Pull decoded frames out of `self.ready`, keeping only those on the
    /// frame grid.
    fn pop_ready(&mut self) -> Option<(u64, DecodedFrame)> {
        while let Some(frame) = self.ready.pop_front() {
            match self.timing.frame_number_for_pts(frame.pts()) {
                Some(frame_number) => return Some((frame_number, frame)),
                None => {
                    // Second field of an interlaced pair, or pre-start.
                    log::debug!("Skipping frame at tick {} off the frame grid", frame.pts());
                }
            }
        }
        None
    }
}

impl Iterator for FrameSequence {
    type Item = Result<(u64, DecodedFrame), FrameStepError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if let Some(item) = self.pop_ready() {
                return Some(Ok(item));
            }
            if self.flushed {
                self.done = true;
                return None;
            }

            let packet = match self.source.next() {
                Ok(packet) => packet,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            let ready = &mut self.ready;
            let result = match packet {
                Some(packet) => self.decoder.decode(&packet, &mut |frame| {
                    ready.push_back(frame);
                }),
                None => {
                    self.flushed = true;
                    self.decoder.flush(&mut |frame| {
                        ready.push_back(frame);
                    })
                }
            };
            if let Err(e) = result {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
