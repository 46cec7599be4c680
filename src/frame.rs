//! Dark-signal correction and frame accumulation.

use crate::constants::{ACTIVE_PIXEL_BEGIN, ACTIVE_PIXEL_END, EDARK_PIXEL_INDICES, PIXEL_COUNT};
use crate::spectrum::SpectrumFrame;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mean raw intensity over the optically shielded pixels, the dark-signal
/// baseline of the frame.
pub fn electric_darkness(frame: &SpectrumFrame) -> f32 {
    let sum: u32 = EDARK_PIXEL_INDICES
        .iter()
        .map(|&i| u32::from(frame.pixels()[i]))
        .sum();
    sum as f32 / EDARK_PIXEL_INDICES.len() as f32
}

/// A dark-corrected frame: raw intensities minus the electric-dark
/// baseline. Values carry no range guarantee and may be negative.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CorrectedFrame {
    samples: Vec<f32>,
    integration_micros: u32,
    electric_darkness: f32,
}

impl CorrectedFrame {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn integration_micros(&self) -> u32 {
        self.integration_micros
    }

    /// The baseline that was subtracted from every sample.
    pub fn electric_darkness(&self) -> f32 {
        self.electric_darkness
    }

    /// Largest corrected value over the optically meaningful pixel window.
    pub fn peak(&self) -> f32 {
        active_peak(&self.samples)
    }
}

/// Subtract the electric-dark baseline from every sample of `frame`.
pub fn dark_corrected(frame: &SpectrumFrame) -> CorrectedFrame {
    let darkness = electric_darkness(frame);
    let samples = frame
        .pixels()
        .iter()
        .map(|&raw| f32::from(raw) - darkness)
        .collect();
    CorrectedFrame {
        samples,
        integration_micros: frame.integration_micros(),
        electric_darkness: darkness,
    }
}

fn active_peak(samples: &[f32]) -> f32 {
    samples[ACTIVE_PIXEL_BEGIN..ACTIVE_PIXEL_END]
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max)
}

/// Element-wise running sum of corrected frames plus a frame counter.
///
/// Owned by the caller driving repeated acquisitions, not by the session.
/// Addition commutes, so frames may be folded in in any order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumAccumulator {
    sum: Vec<f32>,
    frames: u32,
}

impl SpectrumAccumulator {
    pub fn new() -> Self {
        Self {
            sum: vec![0.0; PIXEL_COUNT],
            frames: 0,
        }
    }

    /// Fold one corrected frame into the running sum.
    pub fn add(&mut self, frame: &CorrectedFrame) {
        for (acc, &sample) in self.sum.iter_mut().zip(frame.samples()) {
            *acc += sample;
        }
        self.frames += 1;
    }

    pub fn sum(&self) -> &[f32] {
        &self.sum
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Largest accumulated value over the optically meaningful pixel
    /// window.
    pub fn peak(&self) -> f32 {
        active_peak(&self.sum)
    }
}

impl Default for SpectrumAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
