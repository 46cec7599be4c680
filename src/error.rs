use thiserror::Error;

/// The primary error type for the `usb4000-rs` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("USB device not found. Is the USB4000 connected?")]
    DeviceNotFound,

    #[error("device configuration failed at {stage}: {source}")]
    Configuration {
        stage: &'static str,
        source: rusb::Error,
    },

    #[error("USB error: {0}")]
    Transport(#[from] rusb::Error),

    #[error("short bulk write: {actual} of {expected} bytes transferred")]
    ShortWrite { expected: usize, actual: usize },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid parameter: {0}")]
    Validation(String),

    #[error("session is faulted and must be torn down")]
    Faulted,
}

impl Error {
    /// Whether this error leaves the USB command/response channel in an
    /// unknown state, requiring the session to move to `Faulted`.
    ///
    /// Configuration and enumeration failures happen before a session
    /// exists, and validation failures never touch the device, so none of
    /// those fault a running session.
    pub fn faults_session(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::ShortWrite { .. } | Error::Protocol(_)
        )
    }
}
