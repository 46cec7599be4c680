//! Acquisition framing tests over a scripted transport.

mod common;

use common::*;

use usb4000_rs::constants::{
    ENDPOINT_SPECTRUM_HS, ENDPOINT_SPECTRUM_SS, HIGH_SPEED_PACKETS, PIXEL_COUNT,
    SAMPLES_PER_PACKET, SPECTRUM_PACKET_BYTES, TOTAL_PACKETS,
};
use usb4000_rs::device::SessionState;
use usb4000_rs::error::Error;
use usb4000_rs::spectrum;
use usb4000_rs::transport::Timeouts;

#[test]
fn well_formed_frame_is_accepted() {
    let mut mock = MockTransport::new();
    let pixels: Vec<u16> = (0..PIXEL_COUNT as u32).map(|i| (i % 65536) as u16).collect();
    script_frame_pixels(&mock, &pixels);

    let frame = spectrum::acquire(&mut mock, Timeouts::default(), 3800, true).unwrap();
    assert_eq!(frame.pixels(), pixels.as_slice());

    // The trigger opcode went out before any packet was read.
    assert_eq!(mock.written_frames(), vec![vec![0x09]]);
}

#[test]
fn frame_can_be_read_without_resending_the_trigger() {
    let mut mock = MockTransport::new();
    script_flat_frame(&mock, 7);

    let frame = spectrum::acquire(&mut mock, Timeouts::default(), 3800, false).unwrap();
    assert_eq!(frame.pixels().len(), PIXEL_COUNT);
    assert!(mock.written_frames().is_empty());
}

#[test]
fn short_packet_is_a_protocol_error() {
    for short_index in [0, 1, HIGH_SPEED_PACKETS, TOTAL_PACKETS - 1] {
        let mut mock = MockTransport::new();
        for index in 0..TOTAL_PACKETS {
            let endpoint = if index < HIGH_SPEED_PACKETS {
                ENDPOINT_SPECTRUM_HS
            } else {
                ENDPOINT_SPECTRUM_SS
            };
            let mut packet = encode_packet(&vec![0u16; SAMPLES_PER_PACKET]);
            if index == short_index {
                // One byte short is enough to desynchronize the stream.
                packet.truncate(SPECTRUM_PACKET_BYTES - 1);
            }
            mock.push_reply(endpoint, packet);
        }

        let result = spectrum::acquire(&mut mock, Timeouts::default(), 3800, true);
        assert!(
            matches!(result, Err(Error::Protocol(_))),
            "packet {short_index} short by one byte must be rejected"
        );
    }
}

#[test]
fn wrong_end_of_frame_marker_is_a_protocol_error() {
    let mut mock = MockTransport::new();
    for index in 0..TOTAL_PACKETS {
        let endpoint = if index < HIGH_SPEED_PACKETS {
            ENDPOINT_SPECTRUM_HS
        } else {
            ENDPOINT_SPECTRUM_SS
        };
        mock.push_reply(endpoint, encode_packet(&vec![0u16; SAMPLES_PER_PACKET]));
    }
    mock.push_reply(ENDPOINT_SPECTRUM_SS, vec![0x42]);

    let result = spectrum::acquire(&mut mock, Timeouts::default(), 3800, true);
    assert!(matches!(result, Err(Error::Protocol(_))));
}

#[test]
fn missing_marker_is_a_transport_error() {
    let mut mock = MockTransport::new();
    for index in 0..TOTAL_PACKETS {
        let endpoint = if index < HIGH_SPEED_PACKETS {
            ENDPOINT_SPECTRUM_HS
        } else {
            ENDPOINT_SPECTRUM_SS
        };
        mock.push_reply(endpoint, encode_packet(&vec![0u16; SAMPLES_PER_PACKET]));
    }
    mock.push_timeout(ENDPOINT_SPECTRUM_SS);

    let result = spectrum::acquire(&mut mock, Timeouts::default(), 3800, true);
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[test]
fn samples_decode_little_endian_from_the_wire() {
    let mut mock = MockTransport::new();
    // Every sample is the byte pair 0x34 0x12 on the wire.
    let pixels = vec![0x1234u16; PIXEL_COUNT];
    script_frame_pixels(&mock, &pixels);

    let frame = spectrum::acquire(&mut mock, Timeouts::default(), 3800, true).unwrap();
    assert!(frame.pixels().iter().all(|&p| p == 0x1234));
}

#[test]
fn acquisition_failure_faults_the_session() {
    let (mut session, mock) = open_session(&ScriptedDevice::default());

    // Wrong marker after fifteen good packets.
    for index in 0..TOTAL_PACKETS {
        let endpoint = if index < HIGH_SPEED_PACKETS {
            ENDPOINT_SPECTRUM_HS
        } else {
            ENDPOINT_SPECTRUM_SS
        };
        mock.push_reply(endpoint, encode_packet(&vec![9u16; SAMPLES_PER_PACKET]));
    }
    mock.push_reply(ENDPOINT_SPECTRUM_SS, vec![0x00]);

    assert!(matches!(
        session.acquire_spectrum(true),
        Err(Error::Protocol(_))
    ));
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(matches!(session.acquire_spectrum(true), Err(Error::Faulted)));
}
