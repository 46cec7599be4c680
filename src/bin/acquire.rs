// src/bin/acquire.rs

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use usb4000_rs::device::Usb4000;
use usb4000_rs::frame::{SpectrumAccumulator, dark_corrected};
use usb4000_rs::protocol::TriggerMode;
use usb4000_rs::transport::DeviceManager;

/// Capture dark-corrected spectra from an attached USB4000.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Integration time in microseconds.
    #[arg(short, long, default_value_t = 3800)]
    integration_us: u32,
    /// Number of frames to capture and accumulate.
    #[arg(short, long, default_value_t = 100)]
    frames: u32,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(&cli) {
        error!("Acquisition failed: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let manager = DeviceManager::new().context("Failed to initialize the USB stack")?;
    let mut session = Usb4000::connect(&manager).context("Failed to open the spectrometer")?;

    info!(
        serial = session.serial_number(),
        firmware = format!("{:04x}", session.firmware_version()),
        grating = session.calibration().grating_number,
        slit_um = session.calibration().slit_size,
        "session ready"
    );
    info!(
        temperature_c = session.read_pcb_temperature()?,
        "PCB temperature"
    );

    if !session.set_integration_micros(cli.integration_us, true)? {
        warn!("integration time verification failed; continuing with the device's value");
    }
    session.set_trigger_mode(TriggerMode::Normal)?;

    let mut accumulator = SpectrumAccumulator::new();
    for n in 1..=cli.frames {
        let frame = session.acquire_spectrum(true)?;
        let corrected = dark_corrected(&frame);
        accumulator.add(&corrected);

        info!(
            frame = n,
            electric_darkness = corrected.electric_darkness(),
            peak = corrected.peak(),
            accumulated_peak = accumulator.peak(),
            connected = manager.device_present(),
            "frame captured"
        );
    }

    info!(frames = accumulator.frames(), "acquisition complete");
    Ok(())
}
