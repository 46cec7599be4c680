//! Wavelength and linearity calibration read from the device EEPROM.

use crate::constants::PIXEL_COUNT;
use crate::error::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Factory calibration and optical-bench description.
///
/// Populated from device string/numeric queries once while a session
/// initializes and immutable for the session's lifetime. The coefficients
/// are taken as the device reports them; degenerate (all-zero) values are
/// accepted without validation, the EEPROM is the authority.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationData {
    pub serial_number: String,
    /// Cubic wavelength polynomial, lowest order first.
    pub wavelength_coeffs: [f32; 4],
    pub stray_light_constant: f32,
    /// Detector non-linearity polynomial, lowest order first.
    pub linearity_coeffs: [f32; 8],
    pub grating_number: i32,
    /// Filter cutoff wavelength in nanometers, 0 when no filter is fitted.
    pub filter_wavelength: i32,
    /// Entrance slit width in micrometers.
    pub slit_size: i32,
    /// Raw device configuration string as reported by the device.
    pub device_configuration: String,
}

impl CalibrationData {
    /// Evaluate the wavelength polynomial `c0 + c1*i + c2*i^2 + c3*i^3` for
    /// every pixel index. Pure function of the coefficients; the result
    /// always has exactly [`PIXEL_COUNT`] entries.
    pub fn wavelength_table(&self) -> Vec<f64> {
        let [c0, c1, c2, c3] = self.wavelength_coeffs.map(f64::from);
        (0..PIXEL_COUNT)
            .map(|i| {
                let i = i as f64;
                c0 + c1 * i + c2 * i * i + c3 * i * i * i
            })
            .collect()
    }
}

/// Parse the optical-bench configuration reply: three whitespace-delimited
/// integers — grating number, filter wavelength, slit size.
pub fn parse_bench_configuration(text: &str) -> Result<(i32, i32, i32), Error> {
    let mut fields = text.split_whitespace().map(|field| {
        field
            .parse::<i32>()
            .map_err(|_| Error::Protocol(format!("malformed bench configuration field {field:?}")))
    });
    match (fields.next(), fields.next(), fields.next()) {
        (Some(grating), Some(filter), Some(slit)) => Ok((grating?, filter?, slit?)),
        _ => Err(Error::Protocol(format!(
            "bench configuration {text:?} must have three fields"
        ))),
    }
}
