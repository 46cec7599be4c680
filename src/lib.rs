//! Driver for the Ocean Optics USB4000 grating spectrometer.

pub mod calibration;
pub mod constants;
pub mod device;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod spectrum;
pub mod transport;

pub use device::{SessionState, Usb4000};
pub use error::Error;
