//! In-memory capture and render adapters
//!
//! Used by the offline path and by tests: `MemoryCapture` replays a buffer
//! block by block and `MemoryRender` collects everything the worker writes.

use earshot_core::domain::audio::{i16_to_f32, CaptureSource, RenderSink, Result};
use std::sync::{Arc, Mutex, PoisonError};

/// Capture source backed by a fixed buffer of normalized samples
#[derive(Debug, Clone)]
pub struct MemoryCapture {
    sample_rate: u32,
    samples: Vec<f32>,
    position: usize,
}

impl MemoryCapture {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
            position: 0,
        }
    }

    pub fn from_i16(sample_rate: u32, samples: &[i16]) -> Self {
        Self::new(sample_rate, samples.iter().map(|&s| i16_to_f32(s)).collect())
    }

    /// Samples not yet delivered
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl CaptureSource for MemoryCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, buffer: &mut [f32]) -> Result<usize> {
        let count = buffer.len().min(self.remaining());
        buffer[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn is_finished(&self) -> bool {
        self.position >= self.samples.len()
    }
}

/// Shared view of what a [`MemoryRender`] has received
#[derive(Debug, Clone, Default)]
pub struct RenderBuffer {
    inner: Arc<Mutex<Vec<f32>>>,
}

impl RenderBuffer {
    /// Copy of every rendered sample so far
    pub fn samples(&self) -> Vec<f32> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render sink that appends every block to a shared buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryRender {
    buffer: RenderBuffer,
}

impl MemoryRender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that stays readable after the sink moved into the worker
    pub fn buffer(&self) -> RenderBuffer {
        self.buffer.clone()
    }
}

impl RenderSink for MemoryRender {
    fn write_block(&mut self, block: &[f32]) -> Result<()> {
        self.buffer
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_capture_delivers_in_blocks() {
        let mut capture = MemoryCapture::new(16000, (0..10).map(|i| i as f32).collect());
        let mut block = [0.0; 4];

        assert_eq!(capture.read_block(&mut block).unwrap(), 4);
        assert_eq!(block, [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(capture.read_block(&mut block).unwrap(), 4);
        assert!(!capture.is_finished());
        assert_eq!(capture.read_block(&mut block).unwrap(), 2);
        assert_eq!(&block[..2], &[8.0, 9.0]);
        assert!(capture.is_finished());
        assert_eq!(capture.read_block(&mut block).unwrap(), 0);
    }

    #[test]
    fn test_capture_from_i16() {
        let capture = MemoryCapture::from_i16(8000, &[0, 16384, -32768]);
        assert_eq!(capture.sample_rate(), 8000);
        assert_eq!(capture.samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_render_collects_blocks() {
        let mut render = MemoryRender::new();
        let buffer = render.buffer();
        assert!(buffer.is_empty());

        render.write_block(&[0.1, 0.2]).unwrap();
        render.write_block(&[0.3]).unwrap();

        assert_eq!(buffer.samples(), vec![0.1, 0.2, 0.3]);
        assert_eq!(buffer.len(), 3);
    }

    proptest! {
        #[test]
        fn prop_capture_then_render_preserves_samples(
            samples in proptest::collection::vec(-1.0f32..1.0, 0..2000),
            block_len in 1usize..512,
        ) {
            let mut capture = MemoryCapture::new(16000, samples.clone());
            let mut render = MemoryRender::new();
            let buffer = render.buffer();
            let mut block = vec![0.0; block_len];

            while !capture.is_finished() {
                let count = capture.read_block(&mut block).unwrap();
                render.write_block(&block[..count]).unwrap();
            }

            prop_assert_eq!(buffer.samples(), samples);
            prop_assert_eq!(capture.remaining(), 0);
        }
    }
}
