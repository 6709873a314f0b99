//! Engine tuning constants.

use std::time::Duration;

/// Worker → render thread command ring.
pub const GRAPH_COMMAND_CAPACITY: usize = 256;

/// Render thread → worker status ring.
pub const RENDER_STATUS_CAPACITY: usize = 16;

/// Pending requests before `submit` applies backpressure.
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// How often an idle worker checks the render thread for finished segments
/// and releases retired buffers.
pub const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Frames rendered per pass when converting to a non-`f32` device format.
pub const CALLBACK_SCRATCH_FRAMES: usize = 2048;

/// Reverb tunings, in samples at 44.1 kHz.
pub mod reverb {
    pub const REFERENCE_RATE: f32 = 44100.0;
    pub const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
    pub const ALLPASS_TUNING: [usize; 2] = [556, 441];
    pub const STEREO_SPREAD: usize = 23;
    pub const ROOM_FEEDBACK: f32 = 0.84;
    pub const DAMPING: f32 = 0.2;
    pub const ALLPASS_GAIN: f32 = 0.5;
    pub const INPUT_GAIN: f32 = 0.015;
    pub const WET_GAIN: f32 = 3.0;
}
