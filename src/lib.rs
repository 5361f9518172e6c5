//! # ftdi-iostream
//!
//! Classic RS-232 serial port emulation over USB-attached FTDI bridge
//! cables, exposed through the same pluggable I/O stream contract as any
//! other transport of a dive computer download framework.
//!
//! The FTDI chip only knows packetized bulk transfers. This crate layers
//! the serial semantics on top: line configuration, deadline-bounded
//! reads, full writes, buffer purges and modem control lines.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ftdi_iostream::{FlowControl, IoStream, Parity, StopBits, TransportConfig};
//!
//! let mut stream = IoStream::open_ftdi(&TransportConfig::default())?;
//! stream.configure(9600, 8, Parity::None, StopBits::One, FlowControl::None)?;
//! stream.set_timeout(1000)?;
//!
//! stream.write(&[0x55])?;
//! let mut reply = [0u8; 4];
//! stream.read(&mut reply)?;
//!
//! stream.close()?;
//! # Ok::<(), ftdi_iostream::Status>(())
//! ```

pub mod config;
pub mod context;
pub mod discovery;
pub mod iostream;
pub mod line;
pub mod mock;
pub mod transport;
pub mod types;
pub mod usb;

pub use config::TransportConfig;
pub use context::{FtdiContext, HwError};
pub use discovery::{find_cables, parse_product_id, AttachedCable, Identity, CANDIDATES, FTDI_VID};
pub use iostream::{IoStream, Transport};
pub use transport::FtdiTransport;
pub use types::*;
pub use usb::NusbContext;

/// Outcome of a failed transport operation.
///
/// Success is `Ok(..)`; every failure maps onto exactly one of these
/// variants, matching the status set of the host framework.
#[derive(Debug, thiserror::Error)]
pub enum Status {
    /// Malformed caller input: no open handle, or an unsupported line setting.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle or the hardware context could not be allocated.
    #[error("Out of memory: {0}")]
    NoMemory(String),

    /// The hardware reported a failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// A read deadline expired before the requested bytes arrived.
    #[error("Timeout")]
    Timeout,

    /// The operation is not available on this transport.
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),
}

impl Status {
    /// Numeric status code as used by the host framework.
    pub fn code(&self) -> i32 {
        match self {
            Status::Unsupported(_) => -1,
            Status::InvalidArgument(_) => -2,
            Status::NoMemory(_) => -3,
            Status::Io(_) => -6,
            Status::Timeout => -7,
        }
    }
}

/// Fold an operation result into the host framework's status code (`0` on success).
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

impl From<Status> for std::io::Error {
    fn from(status: Status) -> Self {
        use std::io::ErrorKind;
        let kind = match status {
            Status::Timeout => ErrorKind::TimedOut,
            Status::InvalidArgument(_) => ErrorKind::InvalidInput,
            Status::Unsupported(_) => ErrorKind::Unsupported,
            Status::NoMemory(_) | Status::Io(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, status)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_host_numbering() {
        assert_eq!(status_code(&Ok::<(), Status>(())), 0);
        assert_eq!(Status::Unsupported("x").code(), -1);
        assert_eq!(Status::InvalidArgument("x".into()).code(), -2);
        assert_eq!(Status::NoMemory("x".into()).code(), -3);
        assert_eq!(Status::Io("x".into()).code(), -6);
        assert_eq!(status_code(&Err::<(), _>(Status::Timeout)), -7);
    }

    #[test]
    fn timeout_becomes_timed_out_io_error() {
        let err: std::io::Error = Status::Timeout.into();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        let err: std::io::Error = Status::InvalidArgument("bad".into()).into();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
