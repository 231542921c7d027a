//! Audio host collaborators
//!
//! Live devices go through CPAL, which abstracts the platform APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio
//!
//! The worker in [`engine`] only sees the `CaptureSource` / `RenderSink` /
//! `RouteProbe` traits, so the same loop drives devices, memory and files.

pub mod cpal_backend;
pub mod engine;
pub mod memory;
pub mod route;
pub mod stream;
pub mod wav;

pub use cpal_backend::*;
pub use engine::*;
pub use memory::*;
pub use route::*;
pub use stream::*;
pub use wav::*;
