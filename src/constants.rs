// Protocol constants for the USB4000

/// Vendor ID of the Ocean Optics USB4000.
pub const VID: u16 = 0x2457;

/// Product ID of the Ocean Optics USB4000.
pub const PID: u16 = 0x1022;

/// Command OUT endpoint.
pub const ENDPOINT_CMD_OUT: u8 = 0x01;

/// Command IN endpoint.
pub const ENDPOINT_CMD_IN: u8 = 0x81;

/// High-speed spectrum IN endpoint (first 4 packets of a frame).
pub const ENDPOINT_SPECTRUM_HS: u8 = 0x86;

/// Standard-speed spectrum IN endpoint (remaining packets and the
/// end-of-frame marker).
pub const ENDPOINT_SPECTRUM_SS: u8 = 0x82;

/// Detector pixels per frame.
pub const PIXEL_COUNT: usize = 256 * 15;

/// Pixels permanently shielded from light, used for dark-signal correction.
pub const EDARK_PIXEL_INDICES: [usize; 13] = [5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17];

/// First optically meaningful pixel.
pub const ACTIVE_PIXEL_BEGIN: usize = 21;

/// One past the last optically meaningful pixel.
pub const ACTIVE_PIXEL_END: usize = 3669;

/// Size of one spectrum packet on the wire (256 samples).
pub const SPECTRUM_PACKET_BYTES: usize = 512;

/// Samples carried by one spectrum packet.
pub const SAMPLES_PER_PACKET: usize = SPECTRUM_PACKET_BYTES / 2;

/// Packets delivered on the high-speed endpoint per frame.
pub const HIGH_SPEED_PACKETS: usize = 4;

/// Packets delivered on the standard-speed endpoint per frame.
pub const STANDARD_PACKETS: usize = 11;

/// Packets per frame across both spectrum endpoints.
pub const TOTAL_PACKETS: usize = HIGH_SPEED_PACKETS + STANDARD_PACKETS;

/// End-of-frame synchronization byte trailing the last spectrum packet.
pub const FRAME_END_MARKER: u8 = 0x69;

/// Shortest programmable integration time, microseconds.
pub const INTEGRATION_MIN_MICROS: u32 = 10;

/// Longest programmable integration time, microseconds.
pub const INTEGRATION_MAX_MICROS: u32 = 65_535_000;

/// Below this value integration time is programmed in 10 us steps, above it
/// in 1 ms steps.
pub const INTEGRATION_COARSE_MICROS: u32 = 655_000;

/// Size of the reply buffer for string/numeric queries.
pub const REPLY_BUFFER_BYTES: usize = 64;

/// Fixed sub-command byte of the firmware version query.
pub const FIRMWARE_SUB_COMMAND: u8 = 0x04;

/// Reply length of the firmware version and PCB temperature queries.
pub const BINARY_REPLY_BYTES: usize = 3;
