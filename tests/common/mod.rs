//! Scripted in-memory transport and reply builders shared by the
//! integration tests.

// Not every helper is used by every test file.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use usb4000_rs::constants::{
    ENDPOINT_CMD_IN, ENDPOINT_SPECTRUM_HS, ENDPOINT_SPECTRUM_SS, FRAME_END_MARKER,
    HIGH_SPEED_PACKETS, PIXEL_COUNT, SAMPLES_PER_PACKET,
};
use usb4000_rs::device::Usb4000;
use usb4000_rs::error::Error;
use usb4000_rs::transport::{BulkTransport, Timeouts};

/// One scripted reply on an IN endpoint.
pub enum Reply {
    Data(Vec<u8>),
    Timeout,
}

#[derive(Default)]
struct MockState {
    writes: Vec<(u8, Vec<u8>)>,
    command_replies: VecDeque<Reply>,
    high_speed_replies: VecDeque<Reply>,
    standard_replies: VecDeque<Reply>,
}

impl MockState {
    fn queue_mut(&mut self, endpoint: u8) -> &mut VecDeque<Reply> {
        match endpoint {
            ENDPOINT_CMD_IN => &mut self.command_replies,
            ENDPOINT_SPECTRUM_HS => &mut self.high_speed_replies,
            ENDPOINT_SPECTRUM_SS => &mut self.standard_replies,
            other => panic!("unexpected IN endpoint {other:#04x}"),
        }
    }
}

/// A [`BulkTransport`] that records every write and serves reads from
/// per-endpoint reply queues. An exhausted queue reads as a timeout, like
/// a silent device. Clones share state, so tests keep one handle for
/// scripting while the session owns another.
#[derive(Default, Clone)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, endpoint: u8, data: Vec<u8>) {
        self.state
            .borrow_mut()
            .queue_mut(endpoint)
            .push_back(Reply::Data(data));
    }

    pub fn push_timeout(&self, endpoint: u8) {
        self.state
            .borrow_mut()
            .queue_mut(endpoint)
            .push_back(Reply::Timeout);
    }

    /// Everything written so far, as (endpoint, frame) pairs.
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.borrow().writes.clone()
    }

    /// Command frames written so far, without endpoint numbers.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .writes
            .iter()
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.state.borrow_mut().writes.clear();
    }
}

impl BulkTransport for MockTransport {
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize, Error> {
        self.state.borrow_mut().writes.push((endpoint, data.to_vec()));
        Ok(data.len())
    }

    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize, Error> {
        match self.state.borrow_mut().queue_mut(endpoint).pop_front() {
            Some(Reply::Data(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Some(Reply::Timeout) | None => Err(Error::Transport(rusb::Error::Timeout)),
        }
    }
}

/// Encode a string reply: 2-byte echoed header, text, NUL terminator.
pub fn string_reply(text: &str) -> Vec<u8> {
    let mut reply = vec![0x05, 0x00];
    reply.extend_from_slice(text.as_bytes());
    reply.push(0);
    reply
}

pub fn numeric_reply(value: f32) -> Vec<u8> {
    string_reply(&format!("{value}"))
}

pub fn integration_reply(micros: u32) -> Vec<u8> {
    let mut reply = vec![0xfe, 0x00];
    reply.extend_from_slice(&micros.to_le_bytes());
    reply
}

pub fn firmware_reply(version: u16) -> Vec<u8> {
    let [lo, hi] = version.to_le_bytes();
    vec![0x6b, lo, hi]
}

pub fn temperature_reply(counts: u16) -> Vec<u8> {
    let [lo, hi] = counts.to_le_bytes();
    vec![0x6c, lo, hi]
}

/// Calibration values the scripted initialization answers with.
pub struct ScriptedDevice {
    pub serial: &'static str,
    pub wavelength_coeffs: [f32; 4],
    pub stray_light: f32,
    pub linearity_coeffs: [f32; 8],
    pub bench: &'static str,
    pub device_configuration: &'static str,
    pub firmware: u16,
    pub integration_micros: u32,
}

impl Default for ScriptedDevice {
    fn default() -> Self {
        Self {
            serial: "USB4G12345",
            wavelength_coeffs: [400.0, 0.1, 0.0, 0.0],
            stray_light: 0.5,
            linearity_coeffs: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            bench: "3 475 25",
            device_configuration: "USB4000 OEM",
            firmware: 0x0102,
            integration_micros: 1000,
        }
    }
}

/// Queue the full initialization conversation on the command endpoint.
pub fn script_initialization(mock: &MockTransport, device: &ScriptedDevice) {
    mock.push_reply(ENDPOINT_CMD_IN, string_reply(device.serial));
    for coeff in device.wavelength_coeffs {
        mock.push_reply(ENDPOINT_CMD_IN, numeric_reply(coeff));
    }
    mock.push_reply(ENDPOINT_CMD_IN, numeric_reply(device.stray_light));
    for coeff in device.linearity_coeffs {
        mock.push_reply(ENDPOINT_CMD_IN, numeric_reply(coeff));
    }
    mock.push_reply(ENDPOINT_CMD_IN, string_reply(device.bench));
    mock.push_reply(ENDPOINT_CMD_IN, string_reply(device.device_configuration));
    mock.push_reply(ENDPOINT_CMD_IN, firmware_reply(device.firmware));
    mock.push_reply(ENDPOINT_CMD_IN, integration_reply(device.integration_micros));
}

/// Open a `Ready` session over a freshly scripted mock, returning the
/// session and a scripting handle onto the same transport.
pub fn open_session(device: &ScriptedDevice) -> (Usb4000<MockTransport>, MockTransport) {
    let mock = MockTransport::new();
    script_initialization(&mock, device);
    let session = Usb4000::open(mock.clone(), Timeouts::default())
        .expect("scripted initialization should succeed");
    (session, mock)
}

/// Queue one complete well-formed frame carrying the given pixel values.
pub fn script_frame_pixels(mock: &MockTransport, pixels: &[u16]) {
    assert_eq!(pixels.len(), PIXEL_COUNT);
    for (index, chunk) in pixels.chunks(SAMPLES_PER_PACKET).enumerate() {
        let endpoint = if index < HIGH_SPEED_PACKETS {
            ENDPOINT_SPECTRUM_HS
        } else {
            ENDPOINT_SPECTRUM_SS
        };
        mock.push_reply(endpoint, encode_packet(chunk));
    }
    mock.push_reply(ENDPOINT_SPECTRUM_SS, vec![FRAME_END_MARKER]);
}

/// Queue a frame of a single repeated sample value.
pub fn script_flat_frame(mock: &MockTransport, level: u16) {
    script_frame_pixels(mock, &vec![level; PIXEL_COUNT]);
}

/// Little-endian wire encoding of one packet's samples.
pub fn encode_packet(samples: &[u16]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        packet.extend_from_slice(&sample.to_le_bytes());
    }
    packet
}
