//! Playback engine: a render graph driven by an output device, and the
//! serial worker that owns and mutates it.
//!
//! ```text
//!  controller ──EngineRequest──▶ EngineWorker ──GraphCommand (rtrb)──▶ RenderGraph
//!      ▲                            │  ▲                                  │
//!      └────────EngineEvent─────────┘  └──────RenderStatus (rtrb)─────────┘
//! ```
//!
//! The render thread never allocates or frees: segments and taps travel as
//! basedrop `Shared`/`Owned` values and are reclaimed on the worker.

pub mod config;
mod clock;
mod device;
mod error;
mod graph;
mod nodes;
mod output;
mod render;
mod worker;

pub use clock::{ClockReading, RenderClock};
pub use device::CpalOutput;
pub use error::EngineError;
pub use graph::PlaybackGraph;
pub use nodes::{Reverb, TimePitch};
pub use output::{AudioOutput, OfflineHandle, OfflineOutput};
pub use render::RenderGraph;
pub use worker::{EngineEvent, EngineRequest, EngineWorker, TapRequest};
