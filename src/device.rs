//! USB4000 session state machine.
//!
//! A session is created by [`Usb4000::open`], which runs the one-time
//! initialization sequence over an already configured transport and leaves
//! the session in `Ready`. Acquisition briefly moves it to `Acquiring`.
//! Transport or protocol failures move it to `Faulted`, after which every
//! operation fails fast until the session is dropped and recreated —
//! partial reads leave the device mid-transmission and the bulk stream
//! cannot be resynchronized in place.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::calibration::{self, CalibrationData};
use crate::constants::{BINARY_REPLY_BYTES, ENDPOINT_CMD_IN, ENDPOINT_CMD_OUT, REPLY_BUFFER_BYTES};
use crate::error::Error;
use crate::protocol::{
    self, LINEARITY_QUERIES, OpCode, QueryCode, TriggerMode, WAVELENGTH_QUERIES,
};
use crate::spectrum::{self, SpectrumFrame};
use crate::transport::{BulkTransport, DeviceManager, Timeouts, UsbTransport};

/// Settle time between writing an integration time and re-reading it for
/// verification.
const VERIFY_SETTLE: Duration = Duration::from_millis(10);

/// Lifecycle of an open session.
///
/// There is no `Closed` variant: a closed session is one that has been
/// dropped (transport teardown runs in the transport's `Drop`), and
/// `Configuring` only exists inside [`Usb4000::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Acquiring,
    Faulted,
}

/// An initialized USB4000 session.
///
/// Generic over the transport so the protocol runs against scripted
/// transports in tests exactly as it runs against the bus. All operations
/// take `&mut self`: the command/response channel is stateful and the
/// borrow checker serializes access to it.
pub struct Usb4000<T: BulkTransport> {
    transport: T,
    timeouts: Timeouts,
    state: SessionState,
    calibration: CalibrationData,
    wavelengths: Vec<f64>,
    firmware_version: u16,
    integration_micros: u32,
}

impl Usb4000<UsbTransport> {
    /// Find, configure, and initialize the attached USB4000.
    pub fn connect(manager: &DeviceManager) -> Result<Self, Error> {
        let transport = manager.open_spectrometer()?;
        Self::open(transport, Timeouts::default())
    }
}

impl<T: BulkTransport> Usb4000<T> {
    /// Run the one-time initialization sequence and return a `Ready`
    /// session.
    ///
    /// Queries, in order: serial number, the four wavelength coefficients,
    /// the stray-light constant, the eight linearity coefficients, the
    /// optical-bench configuration, the device configuration string, the
    /// firmware version, and the currently programmed integration time.
    /// Any failure aborts construction; dropping the transport runs its
    /// teardown, so nothing is left half-open.
    pub fn open(mut transport: T, timeouts: Timeouts) -> Result<Self, Error> {
        let mut channel = CommandChannel {
            transport: &mut transport,
            timeouts,
        };

        channel.write_command(OpCode::Initialize, &[])?;

        let serial_number = channel.query_string(QueryCode::SerialNumber)?;
        info!(serial = %serial_number, "initializing USB4000");

        let mut wavelength_coeffs = [0f32; 4];
        for (coeff, &code) in wavelength_coeffs.iter_mut().zip(WAVELENGTH_QUERIES.iter()) {
            *coeff = channel.query_numeric(code)?;
        }
        let stray_light_constant = channel.query_numeric(QueryCode::StrayLightConstant)?;
        let mut linearity_coeffs = [0f32; 8];
        for (coeff, &code) in linearity_coeffs.iter_mut().zip(LINEARITY_QUERIES.iter()) {
            *coeff = channel.query_numeric(code)?;
        }

        let bench = channel.query_string(QueryCode::BenchConfiguration)?;
        let (grating_number, filter_wavelength, slit_size) =
            calibration::parse_bench_configuration(&bench)?;
        let device_configuration = channel.query_string(QueryCode::DeviceConfiguration)?;

        let firmware_version = channel.read_firmware_version()?;
        let integration_micros = channel.query_integration_micros()?;

        debug!(
            grating_number,
            filter_wavelength,
            slit_size,
            firmware = format!("{firmware_version:04x}"),
            integration_micros,
            "optical bench configured"
        );

        let calibration = CalibrationData {
            serial_number,
            wavelength_coeffs,
            stray_light_constant,
            linearity_coeffs,
            grating_number,
            filter_wavelength,
            slit_size,
            device_configuration,
        };
        let wavelengths = calibration.wavelength_table();

        Ok(Self {
            transport,
            timeouts,
            state: SessionState::Ready,
            calibration,
            wavelengths,
            firmware_version,
            integration_micros,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn serial_number(&self) -> &str {
        &self.calibration.serial_number
    }

    pub fn calibration(&self) -> &CalibrationData {
        &self.calibration
    }

    /// Wavelength in nanometers for every pixel index, derived from the
    /// calibration polynomial.
    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    /// Firmware version as read during initialization.
    pub fn firmware_version(&self) -> u16 {
        self.firmware_version
    }

    /// Integration time currently in effect, as last written or queried.
    pub fn integration_micros(&self) -> u32 {
        self.integration_micros
    }

    /// Re-send the init opcode.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.run(|channel| channel.write_command(OpCode::Initialize, &[]))
    }

    /// Ask the device for the integration time it has programmed.
    pub fn query_integration_micros(&mut self) -> Result<u32, Error> {
        let micros = self.run(|channel| channel.query_integration_micros())?;
        self.integration_micros = micros;
        Ok(micros)
    }

    /// Program a new integration time.
    ///
    /// The requested value must lie in `[10, 65_535_000]` microseconds and
    /// is quantized to the device's step size before writing. With `verify`
    /// the device is re-queried after a short settle; a mismatch is a soft
    /// failure — `Ok(false)`, the session stays usable and the cached
    /// integration time is left untouched.
    pub fn set_integration_micros(&mut self, micros: u32, verify: bool) -> Result<bool, Error> {
        self.ensure_ready()?;
        protocol::validate_integration_micros(micros)?;
        let quantized = protocol::quantize_integration_micros(micros);

        self.run(|channel| {
            channel.write_command(OpCode::SetIntegrationTime, &quantized.to_le_bytes())
        })?;

        if verify {
            thread::sleep(VERIFY_SETTLE);
            let written = self.run(|channel| channel.query_integration_micros())?;
            if written != quantized {
                warn!(requested = quantized, written, "integration time verification mismatch");
                return Ok(false);
            }
        }

        self.integration_micros = quantized;
        Ok(true)
    }

    /// Select the acquisition trigger source.
    pub fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<(), Error> {
        self.run(|channel| {
            channel.write_command(OpCode::SetTriggerMode, &u16::from(mode).to_le_bytes())
        })?;
        debug!(mode = %mode, "trigger mode set");
        Ok(())
    }

    /// Enable or disable the lamp strobe output.
    pub fn set_strobe_enabled(&mut self, enable: bool) -> Result<(), Error> {
        self.run(|channel| channel.write_command(OpCode::SetStrobeEnable, &[u8::from(enable), 0x00]))
    }

    pub fn read_firmware_version(&mut self) -> Result<u16, Error> {
        self.run(|channel| channel.read_firmware_version())
    }

    /// PCB temperature in degrees Celsius.
    pub fn read_pcb_temperature(&mut self) -> Result<f32, Error> {
        self.run(|channel| channel.read_pcb_temperature())
    }

    /// Capture one spectral frame.
    ///
    /// With `send_request` the spectrum request opcode is written before
    /// reading; pass `false` to drain a frame the device is emitting on its
    /// own (external trigger modes). Any failure mid-sequence faults the
    /// session.
    pub fn acquire_spectrum(&mut self, send_request: bool) -> Result<SpectrumFrame, Error> {
        self.ensure_ready()?;
        self.state = SessionState::Acquiring;

        match spectrum::acquire(
            &mut self.transport,
            self.timeouts,
            self.integration_micros,
            send_request,
        ) {
            Ok(frame) => {
                self.state = SessionState::Ready;
                Ok(frame)
            }
            Err(err) => {
                warn!(error = %err, "acquisition failed, faulting session");
                self.state = SessionState::Faulted;
                Err(err)
            }
        }
    }

    /// Tear down the session, handing the transport back to the caller.
    /// Dropping the returned transport completes the teardown.
    pub fn close(self) -> T {
        self.transport
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Acquiring | SessionState::Faulted => Err(Error::Faulted),
        }
    }

    /// Run one command exchange in `Ready`, moving the session to
    /// `Faulted` when the error leaves the channel in an unknown state.
    fn run<R>(
        &mut self,
        op: impl FnOnce(&mut CommandChannel<'_, T>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.ensure_ready()?;
        let mut channel = CommandChannel {
            transport: &mut self.transport,
            timeouts: self.timeouts,
        };
        match op(&mut channel) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.faults_session() {
                    warn!(error = %err, "session faulted");
                    self.state = SessionState::Faulted;
                }
                Err(err)
            }
        }
    }
}

/// Low-level command/response exchanges shared by initialization and the
/// `Ready`-state operations.
struct CommandChannel<'a, T: BulkTransport> {
    transport: &'a mut T,
    timeouts: Timeouts,
}

impl<T: BulkTransport> CommandChannel<'_, T> {
    fn write(&mut self, frame: &[u8], timeout: Duration) -> Result<(), Error> {
        let written = self.transport.write_bulk(ENDPOINT_CMD_OUT, frame, timeout)?;
        if written != frame.len() {
            return Err(Error::ShortWrite {
                expected: frame.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn write_command(&mut self, op: OpCode, payload: &[u8]) -> Result<(), Error> {
        self.write(&protocol::command(op, payload), self.timeouts.command)
    }

    /// Send a command frame and read the up-to-64-byte reply.
    fn exchange(&mut self, frame: &[u8], read_timeout: Duration) -> Result<Vec<u8>, Error> {
        self.write(frame, self.timeouts.command)?;
        let mut buf = [0u8; REPLY_BUFFER_BYTES];
        let read = self
            .transport
            .read_bulk(ENDPOINT_CMD_IN, &mut buf, read_timeout)?;
        Ok(buf[..read].to_vec())
    }

    fn query_string(&mut self, code: QueryCode) -> Result<String, Error> {
        let raw = self.exchange(&protocol::query_command(code), self.timeouts.query)?;
        protocol::parse_string_response(&raw)
    }

    fn query_numeric(&mut self, code: QueryCode) -> Result<f32, Error> {
        let raw = self.exchange(&protocol::query_command(code), self.timeouts.query)?;
        protocol::parse_numeric_response(&raw)
    }

    fn query_integration_micros(&mut self) -> Result<u32, Error> {
        let raw = self.exchange(
            &protocol::command(OpCode::QueryIntegrationTime, &[]),
            self.timeouts.query,
        )?;
        protocol::parse_integration_micros(&raw)
    }

    fn read_firmware_version(&mut self) -> Result<u16, Error> {
        self.write(&protocol::firmware_version_command(), self.timeouts.command)?;
        let mut buf = [0u8; BINARY_REPLY_BYTES];
        let read = self
            .transport
            .read_bulk(ENDPOINT_CMD_IN, &mut buf, self.timeouts.command)?;
        protocol::parse_firmware_version(&buf[..read])
    }

    fn read_pcb_temperature(&mut self) -> Result<f32, Error> {
        self.write(
            &protocol::command(OpCode::QueryPcbTemperature, &[]),
            self.timeouts.command,
        )?;
        let mut buf = [0u8; BINARY_REPLY_BYTES];
        let read = self
            .transport
            .read_bulk(ENDPOINT_CMD_IN, &mut buf, self.timeouts.command)?;
        protocol::parse_pcb_temperature(&buf[..read])
    }
}
