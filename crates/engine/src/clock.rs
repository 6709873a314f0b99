use std::hint;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use spindle_transport::SessionToken;

/// Sample-accurate progress of the segment in flight, written by the render
/// thread and read from anywhere without locking.
///
/// Session and elapsed time are published as a pair behind a sequence
/// counter: a reader never sees one segment's token with another's progress.
/// Only one thread writes at a time (the render thread, or the engine worker
/// once the output is stopped).
#[derive(Debug, Default)]
pub struct RenderClock {
    /// Odd while a write is in progress.
    seq: AtomicU64,
    session: AtomicU64,
    elapsed_bits: AtomicU64,
}

/// One consistent read of the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReading {
    pub session: SessionToken,
    /// Seconds of source material consumed since the segment began.
    pub elapsed: f64,
}

impl RenderClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&self, session: SessionToken) {
        self.write(session.to_raw(), 0.0);
    }

    pub(crate) fn retag(&self, session: SessionToken) {
        let elapsed = f64::from_bits(self.elapsed_bits.load(Ordering::Relaxed));
        self.write(session.to_raw(), elapsed);
    }

    pub(crate) fn advance(&self, elapsed: f64) {
        self.write(self.session.load(Ordering::Relaxed), elapsed);
    }

    pub(crate) fn reset(&self) {
        self.begin(SessionToken::NONE);
    }

    fn write(&self, session: u64, elapsed: f64) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.session.store(session, Ordering::Relaxed);
        self.elapsed_bits.store(elapsed.to_bits(), Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    pub fn read(&self) -> ClockReading {
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }
            let session = self.session.load(Ordering::Relaxed);
            let elapsed = f64::from_bits(self.elapsed_bits.load(Ordering::Relaxed));
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == before {
                return ClockReading {
                    session: SessionToken::from_raw(session),
                    elapsed,
                };
            }
        }
    }

    /// Elapsed seconds if the segment in flight belongs to `session`.
    pub fn elapsed_for(&self, session: SessionToken) -> Option<f64> {
        let reading = self.read();
        (reading.session == session && session != SessionToken::NONE).then_some(reading.elapsed)
    }
}
