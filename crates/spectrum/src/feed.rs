use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::SpectrumFrame;

/// Set in `back` when the slot it names holds a pass the reader has not seen.
const FRESH: usize = 0b100;
const INDEX: usize = 0b011;

/// Three frame slots shared by one writer and one reader. At any time the
/// writer owns one slot, the reader owns another, and `back` names the third
/// (the most recently published pass).
struct Slots {
    frames: [UnsafeCell<SpectrumFrame>; 3],
    back: AtomicUsize,
    published: AtomicU64,
}

// SAFETY: a slot index is only ever held by one side at a time; ownership
// moves exclusively through the atomic swap on `back`.
unsafe impl Sync for Slots {}

impl Slots {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: [
                UnsafeCell::new(SpectrumFrame::default()),
                UnsafeCell::new(SpectrumFrame::default()),
                UnsafeCell::new(SpectrumFrame::default()),
            ],
            back: AtomicUsize::new(1),
            published: AtomicU64::new(0),
        })
    }
}

/// Create a publish/consume pair. The feed always sees the newest pass;
/// passes it did not read in time are overwritten.
pub fn visualization_channel() -> (SpectrumPublisher, VisualizationFeed) {
    let slots = Slots::new();
    (
        SpectrumPublisher::new(slots.clone()),
        VisualizationFeed {
            slots,
            read: 2,
            latest: SpectrumFrame::default(),
            earlier_passes: 0,
        },
    )
}

/// Audio-thread end. Publishing never blocks, allocates or fails.
pub struct SpectrumPublisher {
    slots: Arc<Slots>,
    write: usize,
}

impl SpectrumPublisher {
    fn new(slots: Arc<Slots>) -> Self {
        Self { slots, write: 0 }
    }

    /// Overwrite the shared slot with `frame`.
    #[inline]
    pub fn publish(&mut self, frame: SpectrumFrame) {
        // SAFETY: `write` is owned by this publisher until the swap below.
        unsafe { *self.slots.frames[self.write].get() = frame };
        let previous = self.slots.back.swap(self.write | FRESH, Ordering::AcqRel);
        self.write = previous & INDEX;
        self.slots.published.fetch_add(1, Ordering::Release);
    }

    /// `true` once the feed has been dropped or reconnected elsewhere.
    pub fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.slots) == 1
    }
}

/// Consumer end. Holds the most recent complete pass.
pub struct VisualizationFeed {
    slots: Arc<Slots>,
    read: usize,
    latest: SpectrumFrame,
    /// Passes published through slots this feed has since left behind.
    earlier_passes: u64,
}

impl VisualizationFeed {
    /// The newest published pass.
    pub fn latest(&mut self) -> SpectrumFrame {
        if self.slots.back.load(Ordering::Relaxed) & FRESH != 0 {
            let previous = self.slots.back.swap(self.read, Ordering::AcqRel);
            self.read = previous & INDEX;
            // SAFETY: `read` is owned by this feed until it is swapped back.
            self.latest = unsafe { *self.slots.frames[self.read].get() };
        }
        self.latest
    }

    /// Number of passes published so far, across reconnects.
    pub fn passes(&self) -> u64 {
        self.earlier_passes + self.slots.published.load(Ordering::Acquire)
    }

    /// Attach a fresh slot set for a new tap installation, keeping the last
    /// pass visible until the new tap publishes.
    pub fn reconnect(&mut self) -> SpectrumPublisher {
        self.latest();
        self.earlier_passes = self.passes();
        self.slots = Slots::new();
        self.read = 2;
        SpectrumPublisher::new(self.slots.clone())
    }

    /// Forget the last pass (e.g. after playback stops).
    pub fn clear(&mut self) {
        self.latest();
        self.latest = SpectrumFrame::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(level: f32) -> SpectrumFrame {
        let mut frame = SpectrumFrame::default();
        frame.buckets[0] = level;
        frame.aggregate = level;
        frame
    }

    #[test]
    fn test_latest_returns_newest_pass() {
        let (mut publisher, mut feed) = visualization_channel();
        publisher.publish(frame(0.1));
        publisher.publish(frame(0.7));

        assert_eq!(feed.latest().aggregate, 0.7);
        assert_eq!(feed.passes(), 2);
        // Nothing new: the last pass stays
        assert_eq!(feed.latest().aggregate, 0.7);
        assert_eq!(feed.latest().aggregate, 0.7);
    }

    #[test]
    fn test_unread_passes_are_overwritten() {
        let (mut publisher, mut feed) = visualization_channel();
        for i in 0..24 {
            publisher.publish(frame(i as f32 / 100.0));
        }
        assert_eq!(feed.latest().aggregate, 0.23);
        assert_eq!(feed.passes(), 24);

        publisher.publish(frame(0.5));
        assert_eq!(feed.latest().aggregate, 0.5);
    }

    #[test]
    fn test_reader_never_sees_torn_or_stale_frames() {
        let (mut publisher, mut feed) = visualization_channel();
        let writer = thread::spawn(move || {
            for i in 1..=20_000u32 {
                let mut frame = SpectrumFrame::default();
                frame.buckets.fill(i as f32);
                frame.aggregate = i as f32;
                publisher.publish(frame);
            }
        });

        let mut last = 0.0;
        while !writer.is_finished() {
            let frame = feed.latest();
            assert!(frame.buckets.iter().all(|b| *b == frame.aggregate));
            assert!(frame.aggregate >= last);
            last = frame.aggregate;
        }
        writer.join().unwrap();
        assert_eq!(feed.latest().aggregate, 20_000.0);
    }

    #[test]
    fn test_reconnect_keeps_last_pass() {
        let (mut old, mut feed) = visualization_channel();
        old.publish(frame(0.4));

        let mut fresh = feed.reconnect();
        assert!(old.is_abandoned());
        assert!(!fresh.is_abandoned());
        assert_eq!(feed.latest().aggregate, 0.4);

        old.publish(frame(0.9));
        assert_eq!(feed.latest().aggregate, 0.4);

        fresh.publish(frame(0.6));
        assert_eq!(feed.latest().aggregate, 0.6);
        assert_eq!(feed.passes(), 2);
    }

    #[test]
    fn test_clear_resets_levels() {
        let (mut publisher, mut feed) = visualization_channel();
        publisher.publish(frame(0.8));
        feed.clear();
        assert_eq!(feed.latest(), SpectrumFrame::default());
    }
}
