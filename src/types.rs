use std::fmt;

use crate::Status;

/// Parity setting requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Parity {
    None = 0,
    Odd = 1,
    Even = 2,
    /// Parity bit always 1. Not available on FTDI cables.
    Mark = 3,
    /// Parity bit always 0. Not available on FTDI cables.
    Space = 4,
}

impl TryFrom<u32> for Parity {
    type Error = Status;
    fn try_from(v: u32) -> Result<Self, Status> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Odd),
            2 => Ok(Self::Even),
            3 => Ok(Self::Mark),
            4 => Ok(Self::Space),
            _ => Err(Status::InvalidArgument(format!("unknown parity code {v}"))),
        }
    }
}

/// Stop bit count requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StopBits {
    One = 0,
    /// Not available on FTDI cables.
    OnePointFive = 1,
    Two = 2,
}

impl TryFrom<u32> for StopBits {
    type Error = Status;
    fn try_from(v: u32) -> Result<Self, Status> {
        match v {
            0 => Ok(Self::One),
            1 => Ok(Self::OnePointFive),
            2 => Ok(Self::Two),
            _ => Err(Status::InvalidArgument(format!("unknown stop bits code {v}"))),
        }
    }
}

/// Flow control requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FlowControl {
    None = 0,
    /// RTS/CTS handshake.
    Hardware = 1,
    /// XON/XOFF handshake.
    Software = 2,
}

impl TryFrom<u32> for FlowControl {
    type Error = Status;
    fn try_from(v: u32) -> Result<Self, Status> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Hardware),
            2 => Ok(Self::Software),
            _ => Err(Status::InvalidArgument(format!(
                "unknown flow control code {v}"
            ))),
        }
    }
}

/// Buffer selection for [`purge`](crate::Transport::purge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Direction {
    Input = 1,
    Output = 2,
    All = 3,
}

impl Direction {
    /// Decode a host direction code. Unrecognized codes select both buffers.
    pub fn from_raw(v: u32) -> Self {
        match v {
            1 => Self::Input,
            2 => Self::Output,
            _ => Self::All,
        }
    }
}

/// Character size accepted by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataBits {
    Seven,
    Eight,
}

impl DataBits {
    pub fn count(self) -> u32 {
        match self {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Transport family reported to the host framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
    Usb,
    UsbHid,
    Irda,
    Bluetooth,
    Ble,
}

/// Line settings that were last applied to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl LineConfig {
    /// Bits on the wire per character: start + data + stop + optional parity.
    pub fn bits_per_frame(&self) -> u32 {
        let stop = match self.stop_bits {
            StopBits::Two => 2,
            _ => 1,
        };
        let parity = match self.parity {
            Parity::None => 0,
            _ => 1,
        };
        1 + self.data_bits.count() + stop + parity
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.count(),
            parity,
            stop
        )
    }
}
