//! The decoded-frame window cache.
//!
//! A [`FrameCache`] holds up to `pre + 1 + post` decoded frames in a ring,
//! anchored at the current frame number. Frame `n` always lives in slot
//! `n % capacity`, so sliding the window forward or backward only evicts the
//! slots that actually leave it.
//!
//! Eviction is the release point for decoded frames: a slot owns an
//! [`Arc<DecodedFrame>`] and dropping it frees the picture unless a caller
//! still holds a clone from `get`.
//!
//! Two kinds of consumers wait on the cache: async `get_frame` callers (via
//! a tokio [`Notify`]) and the blocking fill thread (via a [`Condvar`]).
//! Every mutation signals both.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, futures::Notified};

use crate::decoder::DecodedFrame;

/// Contents of one cache slot.
#[derive(Debug, Clone, Default)]
pub enum CacheSlot {
    /// Nothing here yet.
    #[default]
    Empty,
    /// A packet for this frame has been handed to the decoder.
    Pending,
    /// The stream ended before this frame number.
    PastEndOfStream,
    /// A decoded frame, ready to hand out.
    Decoded(Arc<DecodedFrame>),
}

impl CacheSlot {
    /// Whether this slot holds a decoded frame.
    pub fn is_decoded(&self) -> bool {
        matches!(self, CacheSlot::Decoded(_))
    }
}

/// Occupancy counters, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Slots with nothing in them.
    pub empty: usize,
    /// Slots whose packet is in the decoder.
    pub pending: usize,
    /// Slots holding a decoded frame.
    pub decoded: usize,
    /// Slots marked past the end of the stream.
    pub past_end_of_stream: usize,
}

struct Window {
    current: u64,
    slots: Vec<CacheSlot>,
}

/// Ring-buffer cache of decoded frames around a current position.
pub struct FrameCache {
    pre: u64,
    post: u64,
    window: Mutex<Window>,
    changed: Condvar,
    notify: Notify,
}

impl FrameCache {
    /// Create a cache windowed `pre` frames behind and `post` frames ahead
    /// of `current`.
    pub fn new(current: u64, pre: u64, post: u64) -> Self {
        let capacity = (pre + 1 + post) as usize;
        Self {
            pre,
            post,
            window: Mutex::new(Window {
                current,
                slots: (0..capacity).map(|_| CacheSlot::Empty).collect(),
            }),
            changed: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Frames the window covers behind the current position.
    pub fn pre_size(&self) -> u64 {
        self.pre
    }

    /// Frames the window covers ahead of the current position.
    pub fn post_size(&self) -> u64 {
        self.post
    }

    fn capacity(&self) -> u64 {
        self.pre + 1 + self.post
    }

    fn in_window(&self, current: u64, frame_number: u64) -> bool {
        let diff = frame_number as i64 - current as i64;
        if diff > 0 {
            diff <= self.post as i64
        } else {
            -diff <= self.pre as i64
        }
    }

    /// The frame number the window is anchored at.
    pub fn current_frame_number(&self) -> u64 {
        self.lock().current
    }

    /// Slot contents for `frame_number`, or `None` when it lies outside the
    /// window.
    pub fn get(&self, frame_number: u64) -> Option<CacheSlot> {
        let window = self.lock();
        if !self.in_window(window.current, frame_number) {
            return None;
        }
        Some(window.slots[(frame_number % self.capacity()) as usize].clone())
    }

    /// Store `slot` for `frame_number` if it falls inside the window.
    ///
    /// Returns `false` (dropping `slot`) when the frame is outside the
    /// window. Replacing a `Decoded` slot releases the previous occupant.
    pub fn set(&self, frame_number: u64, slot: CacheSlot) -> bool {
        {
            let mut window = self.lock();
            if !self.in_window(window.current, frame_number) {
                return false;
            }
            let index = (frame_number % self.capacity()) as usize;
            window.slots[index] = slot;
        }
        self.fire_change();
        true
    }

    /// Re-anchor the window at `frame_number`, evicting every slot that
    /// leaves it. A no-op when the anchor is unchanged.
    pub fn set_current_frame_number(&self, frame_number: u64) {
        {
            let mut window = self.lock();
            let old = window.current as i64;
            let new = frame_number as i64;
            if old == new {
                return;
            }

            let capacity = self.capacity() as i64;
            let (start, end) = if (new - old).abs() > capacity {
                (0, capacity - 1)
            } else if new > old {
                (old - self.pre as i64, new - self.pre as i64 - 1)
            } else {
                (new + self.post as i64 + 1, old + self.post as i64)
            };

            for i in start..=end {
                let index = i.rem_euclid(capacity) as usize;
                window.slots[index] = CacheSlot::Empty;
            }
            window.current = frame_number;
        }
        self.fire_change();
    }

    /// First frame number in `[start, end]` (clamped to the window) whose
    /// slot satisfies `predicate`.
    pub fn find_first<F>(&self, start: i64, end: i64, predicate: F) -> Option<u64>
    where
        F: Fn(&CacheSlot) -> bool,
    {
        let window = self.lock();
        let low = (window.current as i64 - self.pre as i64).max(0).max(start);
        let high = (window.current as i64 + self.post as i64).min(end);
        for n in low..=high {
            let index = (n as u64 % self.capacity()) as usize;
            if predicate(&window.slots[index]) {
                return Some(n as u64);
            }
        }
        None
    }

    /// Occupancy counters.
    pub fn stats(&self) -> CacheStats {
        let window = self.lock();
        let mut stats = CacheStats::default();
        for slot in &window.slots {
            match slot {
                CacheSlot::Empty => stats.empty += 1,
                CacheSlot::Pending => stats.pending += 1,
                CacheSlot::Decoded(_) => stats.decoded += 1,
                CacheSlot::PastEndOfStream => stats.past_end_of_stream += 1,
            }
        }
        stats
    }

    /// A future completing on the next cache change.
    ///
    /// Callers should pin it and call `enable()` before inspecting cache
    /// state, so a change between the check and the await is not lost.
    pub fn change_notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Block until the cache changes or `timeout` elapses.
    ///
    /// Spurious wakeups are possible; callers re-check their condition.
    pub fn wait_for_change_blocking(&self, timeout: Duration) {
        let window = self.lock();
        let _ = self.changed.wait_timeout(window, timeout);
    }

    /// Wake all waiters without changing any slot.
    pub fn poke(&self) {
        self.fire_change();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn fire_change(&self) {
        self.changed.notify_all();
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg_next::frame;

    fn decoded(pts: i64) -> CacheSlot {
        CacheSlot::Decoded(Arc::new(DecodedFrame::new(frame::Video::empty(), pts)))
    }

    #[test]
    fn get_outside_window_is_none() {
        let cache = FrameCache::new(100, 10, 10);
        assert!(cache.get(89).is_none());
        assert!(cache.get(111).is_none());
        assert!(cache.get(90).is_some());
        assert!(cache.get(110).is_some());
    }

    #[test]
    fn set_outside_window_is_dropped() {
        let cache = FrameCache::new(0, 5, 5);
        assert!(!cache.set(6, CacheSlot::Pending));
        assert!(cache.set(5, CacheSlot::Pending));
        assert!(matches!(cache.get(5), Some(CacheSlot::Pending)));
    }

    #[test]
    fn forward_slide_keeps_overlap_and_evicts_the_rest() {
        let cache = FrameCache::new(10, 5, 5);
        for n in 5..=15 {
            cache.set(n, decoded(n as i64));
        }
        cache.set_current_frame_number(13);
        // 8..=15 remain cached, 16..=18 are new territory.
        for n in 8..=15 {
            assert!(cache.get(n).is_some_and(|s| s.is_decoded()), "frame {n}");
        }
        for n in 16..=18 {
            assert!(matches!(cache.get(n), Some(CacheSlot::Empty)), "frame {n}");
        }
        assert!(cache.get(7).is_none());
    }

    #[test]
    fn far_jump_wipes_everything() {
        let cache = FrameCache::new(10, 5, 5);
        for n in 5..=15 {
            cache.set(n, decoded(n as i64));
        }
        cache.set_current_frame_number(1000);
        assert_eq!(cache.stats().decoded, 0);
        for n in 995..=1005 {
            assert!(matches!(cache.get(n), Some(CacheSlot::Empty)));
        }
    }

    #[test]
    fn eviction_releases_the_slot_reference() {
        let cache = FrameCache::new(10, 5, 5);
        let frame = Arc::new(DecodedFrame::new(frame::Video::empty(), 0));
        let weak = Arc::downgrade(&frame);
        cache.set(10, CacheSlot::Decoded(frame));
        assert!(weak.upgrade().is_some());
        cache.set_current_frame_number(1000);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn handed_out_frames_survive_eviction() {
        let cache = FrameCache::new(10, 5, 5);
        cache.set(10, decoded(77));
        let Some(CacheSlot::Decoded(held)) = cache.get(10) else {
            panic!("expected a decoded slot");
        };
        cache.set_current_frame_number(1000);
        assert_eq!(held.pts(), 77);
    }

    #[test]
    fn find_first_clamps_to_window() {
        let cache = FrameCache::new(3, 5, 5);
        cache.set(3, CacheSlot::Pending);
        let found = cache.find_first(0, 8, |slot| matches!(slot, CacheSlot::Empty));
        assert_eq!(found, Some(0));
        cache.set(0, CacheSlot::Pending);
        cache.set(1, CacheSlot::Pending);
        cache.set(2, CacheSlot::Pending);
        let found = cache.find_first(0, 8, |slot| matches!(slot, CacheSlot::Empty));
        assert_eq!(found, Some(4));
    }

    #[test]
    fn backward_slide_evicts_ahead() {
        let cache = FrameCache::new(20, 5, 5);
        for n in 15..=25 {
            cache.set(n, decoded(n as i64));
        }
        cache.set_current_frame_number(17);
        for n in 15..=22 {
            assert!(cache.get(n).is_some_and(|s| s.is_decoded()), "frame {n}");
        }
        for n in 12..=14 {
            assert!(matches!(cache.get(n), Some(CacheSlot::Empty)), "frame {n}");
        }
        assert!(cache.get(23).is_none());
    }
}
