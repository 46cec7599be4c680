//! Multi-packet spectral frame acquisition.
//!
//! A frame arrives as 15 packets of 512 bytes — the first 4 on the
//! high-speed endpoint, the rest on the standard-speed endpoint — followed
//! by a single end-of-frame marker byte. Each packet carries 256 samples,
//! little-endian on the wire.

use std::time::Duration;

use tracing::trace;

use crate::constants::{
    ENDPOINT_CMD_OUT, ENDPOINT_SPECTRUM_HS, ENDPOINT_SPECTRUM_SS, FRAME_END_MARKER,
    HIGH_SPEED_PACKETS, PIXEL_COUNT, SPECTRUM_PACKET_BYTES, TOTAL_PACKETS,
};
use crate::error::Error;
use crate::protocol::{self, OpCode};
use crate::transport::{BulkTransport, Timeouts};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One complete readout of the detector and the integration time in effect
/// when it was captured. Immutable once assembled; always exactly
/// [`PIXEL_COUNT`] samples.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumFrame {
    pixels: Vec<u16>,
    integration_micros: u32,
}

impl SpectrumFrame {
    pub(crate) fn new(pixels: Vec<u16>, integration_micros: u32) -> Self {
        debug_assert_eq!(pixels.len(), PIXEL_COUNT);
        Self {
            pixels,
            integration_micros,
        }
    }

    /// Raw pixel intensities in pixel-index order.
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    /// Integration time the frame was exposed with, microseconds.
    pub fn integration_micros(&self) -> u32 {
        self.integration_micros
    }
}

/// Timeout for the first spectrum packet. The exposure must finish before
/// the device can stream, so it scales with the integration time; later
/// packets use the short defaults since the device is already streaming.
pub(crate) fn first_packet_timeout(default: Duration, integration_micros: u32) -> Duration {
    let scaled = Duration::from_millis((f64::from(integration_micros) * 2.1 / 1000.0) as u64);
    default.max(scaled)
}

/// Run the acquisition sequence against `transport` and reassemble the
/// frame.
///
/// With `send_request` the spectrum request opcode is written first; pass
/// `false` to drain a frame the device is emitting on its own (external
/// trigger modes). Any short packet, or a missing or wrong end-of-frame
/// marker, means the bulk stream is desynchronized; the caller must treat
/// the error as fatal for the session.
pub fn acquire<T: BulkTransport>(
    transport: &mut T,
    timeouts: Timeouts,
    integration_micros: u32,
    send_request: bool,
) -> Result<SpectrumFrame, Error> {
    if send_request {
        let frame = protocol::command(OpCode::RequestSpectrum, &[]);
        let written = transport.write_bulk(ENDPOINT_CMD_OUT, &frame, timeouts.command)?;
        if written != frame.len() {
            return Err(Error::ShortWrite {
                expected: frame.len(),
                actual: written,
            });
        }
    }

    let mut pixels = Vec::with_capacity(PIXEL_COUNT);
    let mut packet = [0u8; SPECTRUM_PACKET_BYTES];

    for index in 0..TOTAL_PACKETS {
        let (endpoint, timeout) = if index < HIGH_SPEED_PACKETS {
            let timeout = if index == 0 {
                first_packet_timeout(timeouts.command, integration_micros)
            } else {
                timeouts.command
            };
            (ENDPOINT_SPECTRUM_HS, timeout)
        } else {
            (ENDPOINT_SPECTRUM_SS, timeouts.query)
        };

        let read = transport.read_bulk(endpoint, &mut packet, timeout)?;
        if read != SPECTRUM_PACKET_BYTES {
            return Err(Error::Protocol(format!(
                "spectrum packet {index} short: {read} of {SPECTRUM_PACKET_BYTES} bytes"
            )));
        }
        trace!(packet = index, "spectrum packet read");
        decode_samples_le(&packet, &mut pixels);
    }

    let mut marker = [0u8; 1];
    let read = transport.read_bulk(ENDPOINT_SPECTRUM_SS, &mut marker, timeouts.query)?;
    if read != 1 {
        return Err(Error::Protocol(format!(
            "end-of-frame marker missing: read {read} bytes"
        )));
    }
    if marker[0] != FRAME_END_MARKER {
        return Err(Error::Protocol(format!(
            "bad end-of-frame marker {:#04x}",
            marker[0]
        )));
    }

    Ok(SpectrumFrame::new(pixels, integration_micros))
}

/// Decode one 512-byte packet into 256 samples.
///
/// Samples are little-endian on the wire and are composed from explicit
/// byte pairs, one code path on every host whatever its native byte order.
fn decode_samples_le(packet: &[u8], out: &mut Vec<u16>) {
    for pair in packet.chunks_exact(2) {
        out.push(u16::from_le_bytes([pair[0], pair[1]]));
    }
}
