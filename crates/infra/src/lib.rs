//! Earshot infrastructure: the host side of the loopback.
//!
//! The real-time worker, route probes and the capture/render adapters
//! (in-memory, cpal devices, WAV files) that feed `earshot-core`.

pub mod audio;

pub use audio::*;
