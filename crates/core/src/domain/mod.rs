//! Domain entities and signal-processing rules

pub mod audio;
pub mod config;
pub mod dsp;
pub mod feedback;
pub mod guard;
pub mod pipeline;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    block_rms, f32_to_i16, i16_to_f32, AudioError, CaptureSource, PathState, RenderSink,
    RouteProbe, SampleRate,
};
pub use config::*;
pub use dsp::*;
pub use feedback::{
    goertzel_energy, Detection, FeedbackSuppressor, NotchPlacement, NotchSlot, SlotState,
    ToneEnergyDetector, CANDIDATE_COUNT, CANDIDATE_FREQUENCIES_HZ, MAX_NOTCH_SLOTS,
};
pub use guard::{FeedbackGuard, GuardAction, MuteKind};
pub use pipeline::{BlockReport, LoopbackProcessor, StreamClock};
