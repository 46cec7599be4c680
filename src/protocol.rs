//! # Ocean Optics USB4000 command protocol
//!
//! Commands are single-byte opcodes followed by a small payload, written to
//! bulk endpoint `0x01`; replies arrive on bulk endpoint `0x81`. Three reply
//! shapes exist:
//!
//! - **String**: a 2-byte header echoing the query, then NUL-terminated
//!   text. Used for the serial number, the optical-bench configuration, and
//!   the device configuration string.
//! - **Numeric**: string framing whose text is a floating-point literal.
//!   Used for the wavelength, stray-light, and linearity coefficients.
//! - **Binary**: a fixed-length reply decoded by byte offset. Used for the
//!   firmware version, PCB temperature, and integration-time queries.
//!
//! All multi-byte wire values are little-endian and are composed from
//! explicit byte pairs, so decoding takes the same path on every host
//! regardless of native byte order.

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

use crate::constants::{
    FIRMWARE_SUB_COMMAND, INTEGRATION_COARSE_MICROS, INTEGRATION_MAX_MICROS, INTEGRATION_MIN_MICROS,
};
use crate::error::Error;

/// Command opcodes, byte 0 of every command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum OpCode {
    /// Reset / re-initialize the device.
    Initialize = 0x01,
    /// Set integration time; payload is 4 little-endian microsecond bytes.
    SetIntegrationTime = 0x02,
    /// Set strobe enable; payload is the enable flag plus a reserved byte.
    SetStrobeEnable = 0x03,
    /// String or numeric query; payload is one sub-command byte.
    Query = 0x05,
    /// Trigger acquisition of one spectral frame; no payload.
    RequestSpectrum = 0x09,
    /// Set trigger mode; payload is a little-endian 16-bit mode.
    SetTriggerMode = 0x0a,
    /// Query firmware version; payload is one fixed sub-byte.
    QueryFirmwareVersion = 0x6b,
    /// Query PCB temperature; no payload.
    QueryPcbTemperature = 0x6c,
    /// Query the programmed integration time; no payload.
    QueryIntegrationTime = 0xfe,
}

/// Sub-commands of [`OpCode::Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum QueryCode {
    SerialNumber = 0x00,
    WavelengthCoeff0 = 0x01,
    WavelengthCoeff1 = 0x02,
    WavelengthCoeff2 = 0x03,
    WavelengthCoeff3 = 0x04,
    StrayLightConstant = 0x05,
    LinearityCoeff0 = 0x06,
    LinearityCoeff1 = 0x07,
    LinearityCoeff2 = 0x08,
    LinearityCoeff3 = 0x09,
    LinearityCoeff4 = 0x0a,
    LinearityCoeff5 = 0x0b,
    LinearityCoeff6 = 0x0c,
    LinearityCoeff7 = 0x0d,
    BenchConfiguration = 0x0f,
    DeviceConfiguration = 0x10,
}

/// Query sequence for the four wavelength polynomial coefficients.
pub const WAVELENGTH_QUERIES: [QueryCode; 4] = [
    QueryCode::WavelengthCoeff0,
    QueryCode::WavelengthCoeff1,
    QueryCode::WavelengthCoeff2,
    QueryCode::WavelengthCoeff3,
];

/// Query sequence for the eight linearity coefficients.
pub const LINEARITY_QUERIES: [QueryCode; 8] = [
    QueryCode::LinearityCoeff0,
    QueryCode::LinearityCoeff1,
    QueryCode::LinearityCoeff2,
    QueryCode::LinearityCoeff3,
    QueryCode::LinearityCoeff4,
    QueryCode::LinearityCoeff5,
    QueryCode::LinearityCoeff6,
    QueryCode::LinearityCoeff7,
];

/// Acquisition trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum TriggerMode {
    /// Free-running acquisition.
    #[strum(to_string = "normal")]
    Normal = 0,
    #[strum(to_string = "software")]
    Software = 1,
    #[strum(to_string = "external sync")]
    ExternalSync = 2,
    #[strum(to_string = "external hardware")]
    ExternalHardware = 3,
}

/// Build a command frame: the opcode byte followed by the payload.
pub fn command(op: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(1 + payload.len());
    frame.put_u8(op.into());
    frame.put_slice(payload);
    frame.to_vec()
}

/// Build the 2-byte query frame for `code`.
pub fn query_command(code: QueryCode) -> Vec<u8> {
    command(OpCode::Query, &[code.into()])
}

/// Build the 2-byte firmware version query frame.
pub fn firmware_version_command() -> Vec<u8> {
    command(OpCode::QueryFirmwareVersion, &[FIRMWARE_SUB_COMMAND])
}

/// Bytes of echoed header preceding the text of string/numeric replies.
const STRING_HEADER_BYTES: usize = 2;

/// Decode a string reply: the text after the 2-byte header, up to the NUL
/// terminator (or the end of the read if the device omits it).
pub fn parse_string_response(raw: &[u8]) -> Result<String, Error> {
    if raw.len() <= STRING_HEADER_BYTES {
        return Err(Error::Protocol(format!(
            "string reply too short: {} bytes",
            raw.len()
        )));
    }
    let text = &raw[STRING_HEADER_BYTES..];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    Ok(String::from_utf8_lossy(&text[..end]).into_owned())
}

/// Decode a numeric reply: string framing whose text parses as a float.
pub fn parse_numeric_response(raw: &[u8]) -> Result<f32, Error> {
    let text = parse_string_response(raw)?;
    text.trim()
        .parse::<f32>()
        .map_err(|_| Error::Protocol(format!("malformed numeric reply: {text:?}")))
}

/// Decode the integration-time reply: microseconds as a little-endian
/// 32-bit field at bytes 2..6.
pub fn parse_integration_micros(raw: &[u8]) -> Result<u32, Error> {
    if raw.len() < 6 {
        return Err(Error::Protocol(format!(
            "integration time reply too short: {} bytes",
            raw.len()
        )));
    }
    let mut field = &raw[2..6];
    Ok(field.get_u32_le())
}

/// Decode the 3-byte firmware version reply, least-significant byte first.
pub fn parse_firmware_version(raw: &[u8]) -> Result<u16, Error> {
    let &[_, lo, hi] = raw else {
        return Err(Error::Protocol(format!(
            "firmware version reply must be 3 bytes, got {}",
            raw.len()
        )));
    };
    Ok(u16::from(hi) << 8 | u16::from(lo))
}

/// Scale of the PCB temperature sensor, degrees Celsius per count.
const TEMPERATURE_DEG_PER_COUNT: f32 = 0.003906;

/// Decode the 3-byte PCB temperature reply into degrees Celsius.
pub fn parse_pcb_temperature(raw: &[u8]) -> Result<f32, Error> {
    let &[_, lo, hi] = raw else {
        return Err(Error::Protocol(format!(
            "PCB temperature reply must be 3 bytes, got {}",
            raw.len()
        )));
    };
    let counts = u16::from(hi) << 8 | u16::from(lo);
    Ok(TEMPERATURE_DEG_PER_COUNT * f32::from(counts))
}

/// Check a requested integration time against the programmable domain.
pub fn validate_integration_micros(micros: u32) -> Result<(), Error> {
    if !(INTEGRATION_MIN_MICROS..=INTEGRATION_MAX_MICROS).contains(&micros) {
        return Err(Error::Validation(format!(
            "integration time {micros} us outside [{INTEGRATION_MIN_MICROS}, {INTEGRATION_MAX_MICROS}] us"
        )));
    }
    Ok(())
}

/// Round a requested integration time to the nearest step the device can
/// represent: 10 us steps below 655 ms, 1 ms steps from there up. Ties
/// round away from zero.
pub fn quantize_integration_micros(micros: u32) -> u32 {
    if micros < INTEGRATION_COARSE_MICROS {
        (micros + 5) / 10 * 10
    } else {
        (micros + 500) / 1000 * 1000
    }
}
