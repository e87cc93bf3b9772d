//! Sample-rate conversion with a rubato `FastFixedIn` resampler.
//!
//! Capture runs at the device's native rate (commonly 48 kHz); the live model
//! wants 16 kHz mono. `RateConverter` bridges that gap on the relay thread,
//! where allocation is allowed. When the rates already match it degenerates
//! to a passthrough with no rubato session at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{ColloquyError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Carry-over buffer holding partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Input samples rubato expects per process call.
    block_size: usize,
    /// Pre-allocated output buffer, `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `source_rate` to `target_rate` Hz, processing
    /// `block_size` input samples per rubato call.
    ///
    /// # Errors
    /// Returns `ColloquyError::AudioDevice` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, block_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                block_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            block_size,
            1, // mono
        )
        .map_err(|e| ColloquyError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(source_rate, target_rate, block_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            block_size,
            output_buf: vec![vec![0f32; max_out]],
        })
    }

    /// Process incoming samples, returning converted output (may be empty
    /// while input accumulates toward a full rubato block).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.block_size {
            let block = &self.input_buf[..self.block_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.block_size);
        }
        result
    }

    /// Returns `true` when no rate conversion occurs.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
