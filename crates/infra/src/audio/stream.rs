//! Live capture and render over CPAL streams
//!
//! The CPAL callbacks and the loopback worker talk through two bounded
//! crossbeam channels of sample chunks. The worker side (`CpalCapture`,
//! `CpalRender`) is `Send`; the streams themselves are kept alive by a
//! `CpalStreams` guard that stays on the thread which opened them.

use super::cpal_backend::{device_name, negotiate_input_config, negotiate_output_config, CpalHost};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::Stream;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use earshot_core::domain::audio::{AudioError, CaptureSource, RenderSink, Result, SampleRate};
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// Chunk of mono samples moving between a callback and the worker
pub type AudioBuffer = Vec<f32>;

/// Depth of both callback queues, in chunks
const QUEUE_DEPTH: usize = 32;
/// Silent blocks queued ahead of the first rendered block
const PRE_ROLL_BLOCKS: usize = 2;
/// Longest the worker waits for capture before re-checking its stop flag
const CAPTURE_TIMEOUT: Duration = Duration::from_millis(100);

/// Keeps both CPAL streams playing; dropping it stops them
pub struct CpalStreams {
    _input: Stream,
    _output: Stream,
    sample_rate: u32,
    input_name: String,
    output_name: String,
}

impl CpalStreams {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

/// Worker-side end of the capture stream
pub struct CpalCapture {
    receiver: Receiver<AudioBuffer>,
    pending: AudioBuffer,
    offset: usize,
    sample_rate: u32,
}

impl CaptureSource for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, buffer: &mut [f32]) -> Result<usize> {
        if self.offset >= self.pending.len() {
            match self.receiver.recv_timeout(CAPTURE_TIMEOUT) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::StreamError("Capture stream closed".to_string()))
                }
            }
        }

        let count = buffer.len().min(self.pending.len() - self.offset);
        buffer[..count].copy_from_slice(&self.pending[self.offset..self.offset + count]);
        self.offset += count;
        Ok(count)
    }
}

/// Worker-side end of the render stream
pub struct CpalRender {
    sender: Sender<AudioBuffer>,
}

impl RenderSink for CpalRender {
    fn write_block(&mut self, block: &[f32]) -> Result<()> {
        match self.sender.try_send(block.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                trace!("Render queue full, dropping block");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(AudioError::StreamError("Render stream closed".to_string()))
            }
        }
    }
}

/// Plays mono chunks from `receiver`, duplicating each sample to every
/// output channel and filling underruns with silence
struct RenderCallback {
    receiver: Receiver<AudioBuffer>,
    pending: AudioBuffer,
    offset: usize,
    channels: usize,
}

impl RenderCallback {
    fn next_sample(&mut self) -> f32 {
        if self.offset >= self.pending.len() {
            match self.receiver.try_recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return 0.0,
            }
        }
        match self.pending.get(self.offset) {
            Some(&sample) => {
                self.offset += 1;
                sample
            }
            None => 0.0,
        }
    }

    fn fill(&mut self, data: &mut [f32]) {
        let channels = self.channels.max(1);
        for frame in data.chunks_mut(channels) {
            let sample = self.next_sample();
            frame.fill(sample);
        }
    }
}

/// First channel of an interleaved buffer
fn first_channel(data: &[f32], channels: usize) -> AudioBuffer {
    data.iter().step_by(channels.max(1)).copied().collect()
}

/// Open the default input and output devices as one loopback pair
///
/// The session rate is the capture rate; `preferred_rate` is used when the
/// input device offers it. Two silent blocks are queued ahead of the first
/// processed block so the render side does not start on an underrun.
pub fn open_default_duplex(
    host: &CpalHost,
    preferred_rate: u32,
    block_ms: u64,
) -> Result<(CpalStreams, CpalCapture, CpalRender)> {
    let input_device = host.default_input()?;
    let output_device = host.default_output()?;

    let input_config = negotiate_input_config(&input_device, preferred_rate)?;
    let sample_rate = input_config.sample_rate;
    let output_config = negotiate_output_config(&output_device, sample_rate)?;

    let input_name = device_name(&input_device);
    let output_name = device_name(&output_device);
    info!(
        "Opening loopback: {} ({} ch) -> {} ({} ch) at {} Hz",
        input_name, input_config.channels, output_name, output_config.channels, sample_rate
    );

    let (capture_tx, capture_rx) = bounded::<AudioBuffer>(QUEUE_DEPTH);
    let (render_tx, render_rx) = bounded::<AudioBuffer>(QUEUE_DEPTH);

    let block_len = SampleRate::from_hz(sample_rate).samples_for_ms(block_ms as f32);
    for _ in 0..PRE_ROLL_BLOCKS {
        let _ = render_tx.try_send(vec![0.0; block_len]);
    }

    let input_channels = input_config.channels as usize;
    let input = input_device
        .build_input_stream(
            &input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if capture_tx.try_send(first_channel(data, input_channels)).is_err() {
                    trace!("Capture queue full, dropping chunk");
                }
            },
            |err| error!("Input stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(format!("Failed to build input stream: {}", e)))?;

    let mut callback = RenderCallback {
        receiver: render_rx,
        pending: Vec::new(),
        offset: 0,
        channels: output_config.channels as usize,
    };
    let output = output_device
        .build_output_stream(
            &output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback.fill(data),
            |err| error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(format!("Failed to build output stream: {}", e)))?;

    output
        .play()
        .map_err(|e| AudioError::StreamError(format!("Failed to start output stream: {}", e)))?;
    input
        .play()
        .map_err(|e| AudioError::StreamError(format!("Failed to start input stream: {}", e)))?;
    debug!(block_len, "Loopback streams playing");

    Ok((
        CpalStreams {
            _input: input,
            _output: output,
            sample_rate,
            input_name,
            output_name,
        },
        CpalCapture {
            receiver: capture_rx,
            pending: Vec::new(),
            offset: 0,
            sample_rate,
        },
        CpalRender { sender: render_tx },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_channel() {
        let interleaved = [0.1, 0.9, 0.2, 0.8, 0.3, 0.7];
        assert_eq!(first_channel(&interleaved, 2), vec![0.1, 0.2, 0.3]);
        assert_eq!(first_channel(&interleaved, 1), interleaved.to_vec());
    }

    #[test]
    fn test_render_callback_duplicates_and_pads() {
        let (tx, rx) = bounded(4);
        tx.send(vec![0.5, -0.5]).unwrap();
        let mut callback = RenderCallback {
            receiver: rx,
            pending: Vec::new(),
            offset: 0,
            channels: 2,
        };

        let mut data = [1.0f32; 6];
        callback.fill(&mut data);
        assert_eq!(data, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_capture_reassembles_chunks() {
        let (tx, rx) = bounded(4);
        tx.send(vec![1.0, 2.0, 3.0]).unwrap();
        tx.send(vec![4.0]).unwrap();
        let mut capture = CpalCapture {
            receiver: rx,
            pending: Vec::new(),
            offset: 0,
            sample_rate: 16000,
        };

        let mut block = [0.0; 2];
        assert_eq!(capture.read_block(&mut block).unwrap(), 2);
        assert_eq!(block, [1.0, 2.0]);
        assert_eq!(capture.read_block(&mut block).unwrap(), 1);
        assert_eq!(block[0], 3.0);
        assert_eq!(capture.read_block(&mut block).unwrap(), 1);
        assert_eq!(block[0], 4.0);

        drop(tx);
        assert!(capture.read_block(&mut block).is_err());
    }

    #[test]
    fn test_render_reports_closed_stream() {
        let (tx, rx) = bounded(1);
        let mut render = CpalRender { sender: tx };
        render.write_block(&[0.0]).unwrap();
        // Full queue drops silently
        render.write_block(&[0.0]).unwrap();
        drop(rx);
        assert!(render.write_block(&[0.0]).is_err());
    }
}
