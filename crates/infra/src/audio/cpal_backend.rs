//! CPAL device discovery and stream configuration
//!
//! The loopback only ever needs the default input and output devices, both
//! opened with f32 samples at one shared rate. Whatever channel layout the
//! device offers is accepted; the stream layer folds it to mono.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use earshot_core::domain::audio::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Short description of one device, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub default_sample_rate: Option<u32>,
}

/// Wrapper around the platform's default CPAL host
pub struct CpalHost {
    host: cpal::Host,
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpalHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalHost").field("id", &self.host.id()).finish()
    }
}

impl CpalHost {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }

    /// Every device the host reports
    pub fn devices(&self) -> Result<Vec<DeviceSummary>> {
        let devices = self
            .host
            .devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?;

        let summaries: Vec<DeviceSummary> = devices
            .map(|device| {
                let is_input = device
                    .supported_input_configs()
                    .map(|mut c| c.next().is_some())
                    .unwrap_or(false);
                let is_output = device
                    .supported_output_configs()
                    .map(|mut c| c.next().is_some())
                    .unwrap_or(false);
                let default_sample_rate = device
                    .default_input_config()
                    .or_else(|_| device.default_output_config())
                    .ok()
                    .map(|config| config.sample_rate());

                DeviceSummary {
                    name: device_name(&device),
                    is_input,
                    is_output,
                    default_sample_rate,
                }
            })
            .collect();

        info!("Found {} audio devices", summaries.len());
        Ok(summaries)
    }

    pub fn default_input(&self) -> Result<cpal::Device> {
        self.host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
    }

    pub fn default_output(&self) -> Result<cpal::Device> {
        self.host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
    }
}

#[allow(deprecated)]
pub fn device_name(device: &cpal::Device) -> String {
    device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string())
}

fn supports_rate(range: &SupportedStreamConfigRange, rate: u32) -> bool {
    range.sample_format() == SampleFormat::F32
        && range.min_sample_rate() <= rate
        && rate <= range.max_sample_rate()
}

fn stream_config(channels: u16, sample_rate: u32) -> StreamConfig {
    StreamConfig {
        channels,
        sample_rate,
        buffer_size: BufferSize::Default,
    }
}

/// Capture configuration at `preferred_rate`, or the device default rate
/// when the preferred one is not offered
pub fn negotiate_input_config(device: &cpal::Device, preferred_rate: u32) -> Result<StreamConfig> {
    let ranges: Vec<SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?
        .collect();

    if let Some(range) = ranges
        .iter()
        .filter(|r| supports_rate(r, preferred_rate))
        .min_by_key(|r| r.channels())
    {
        return Ok(stream_config(range.channels(), preferred_rate));
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
    if fallback.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedConfiguration(format!(
            "Input device {} offers no f32 stream",
            device_name(device)
        )));
    }

    warn!(
        "Input device does not support {} Hz, using its default {} Hz",
        preferred_rate,
        fallback.sample_rate()
    );
    Ok(stream_config(fallback.channels(), fallback.sample_rate()))
}

/// Render configuration at exactly `sample_rate`
pub fn negotiate_output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    device
        .supported_output_configs()
        .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?
        .filter(|r| supports_rate(r, sample_rate))
        .min_by_key(|r| r.channels())
        .map(|range| stream_config(range.channels(), sample_rate))
        .ok_or_else(|| {
            AudioError::UnsupportedConfiguration(format!(
                "Output device {} cannot render f32 at {} Hz",
                device_name(device),
                sample_rate
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_creation() {
        let host = CpalHost::default();
        assert_eq!(host.host.id(), cpal::default_host().id());
    }

    #[test]
    fn test_enumerate_devices() {
        let host = CpalHost::default();
        match host.devices() {
            Ok(devices) => {
                for device in &devices {
                    assert!(!device.name.is_empty());
                }
            }
            Err(e) => {
                // Headless CI machines may not expose any audio host
                eprintln!("Skipping test: {}", e);
            }
        }
    }

    #[test]
    fn test_stream_config_shape() {
        let config = stream_config(2, 48000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.buffer_size, BufferSize::Default);
    }
}
