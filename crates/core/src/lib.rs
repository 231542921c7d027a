//! Earshot core: the signal-processing heart of a microphone-to-speaker
//! assistive listening loopback.
//!
//! Everything in here is pure, synchronous and allocation-free on the hot
//! path. Devices, threads and transports live in `earshot-infra`.

pub mod domain;

pub use domain::*;
