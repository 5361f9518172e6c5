//! Hardware boundary: the operations an FTDI chip context offers.
//!
//! [`NusbContext`](crate::NusbContext) drives a real cable; tests use
//! [`MockContext`](crate::mock::MockContext). The transport never reaches
//! past this trait.

/// Failure reported by a chip context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HwError {
    /// No device with the requested identity is attached.
    #[error("device not found")]
    NotFound,

    /// The transfer was interrupted and may be retried.
    #[error("transfer interrupted")]
    Interrupted,

    /// Any other USB or chip level failure.
    #[error("USB error: {0}")]
    Usb(String),

    /// The context itself could not be created.
    #[error("context allocation failed: {0}")]
    Alloc(String),
}

/// Character size in the chip's data characteristics register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipBits {
    Bits7,
    Bits8,
}

impl ChipBits {
    pub fn wire_value(self) -> u16 {
        match self {
            ChipBits::Bits7 => 7,
            ChipBits::Bits8 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipStopBits {
    One,
    Two,
}

impl ChipStopBits {
    pub fn wire_value(self) -> u16 {
        match self {
            ChipStopBits::One => 0,
            ChipStopBits::Two => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipParity {
    None,
    Odd,
    Even,
}

impl ChipParity {
    pub fn wire_value(self) -> u16 {
        match self {
            ChipParity::None => 0,
            ChipParity::Odd => 1,
            ChipParity::Even => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipFlowControl {
    Disabled,
    RtsCts,
    XonXoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakLevel {
    Off,
    On,
}

impl BreakLevel {
    pub fn wire_value(self) -> u16 {
        match self {
            BreakLevel::Off => 0,
            BreakLevel::On => 1,
        }
    }
}

/// Data characteristics written to the chip in a single control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineProperty {
    pub bits: ChipBits,
    pub stop_bits: ChipStopBits,
    pub parity: ChipParity,
}

impl LineProperty {
    /// Chip power-on default, 8N1.
    pub const DEFAULT: LineProperty = LineProperty {
        bits: ChipBits::Bits8,
        stop_bits: ChipStopBits::One,
        parity: ChipParity::None,
    };

    /// Value of the SET_DATA request.
    pub fn wire_value(&self, brk: BreakLevel) -> u16 {
        self.bits.wire_value()
            | (self.parity.wire_value() << 8)
            | (self.stop_bits.wire_value() << 11)
            | (brk.wire_value() << 14)
    }
}

/// One FTDI chip context.
///
/// Transfers may be partial. `read_data` returning `Ok(0)` means no data
/// is pending; `write_data` returning `Ok(0)` means the sink accepted
/// nothing.
pub trait FtdiContext: Send {
    /// Accept whichever interface the device exposes first.
    fn set_interface_any(&mut self) -> Result<(), HwError>;

    /// Claim the device with this identity. Absent devices yield [`HwError::NotFound`].
    fn usb_open(&mut self, vendor_id: u16, product_id: u16) -> Result<(), HwError>;

    /// Release the claimed device.
    fn usb_close(&mut self) -> Result<(), HwError>;

    fn usb_reset(&mut self) -> Result<(), HwError>;

    /// Purge both chip buffers.
    fn purge_buffers(&mut self) -> Result<(), HwError>;

    /// Purge the chip's receive buffer (device to host).
    fn purge_rx_buffer(&mut self) -> Result<(), HwError>;

    /// Purge the chip's transmit buffer (host to device).
    fn purge_tx_buffer(&mut self) -> Result<(), HwError>;

    fn set_baudrate(&mut self, baud_rate: u32) -> Result<(), HwError>;

    fn set_line_property(&mut self, line: LineProperty) -> Result<(), HwError>;

    /// Write data characteristics together with the break condition.
    fn set_line_property_with_break(
        &mut self,
        line: LineProperty,
        brk: BreakLevel,
    ) -> Result<(), HwError>;

    fn set_flow_control(&mut self, flow: ChipFlowControl) -> Result<(), HwError>;

    fn set_dtr(&mut self, state: bool) -> Result<(), HwError>;

    fn set_rts(&mut self, state: bool) -> Result<(), HwError>;

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, HwError>;

    fn write_data(&mut self, buf: &[u8]) -> Result<usize, HwError>;

    /// Bytes already received and buffered by the context.
    fn read_buffer_remaining(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_property_wire_encoding() {
        assert_eq!(LineProperty::DEFAULT.wire_value(BreakLevel::Off), 0x0008);

        let seven_e2 = LineProperty {
            bits: ChipBits::Bits7,
            stop_bits: ChipStopBits::Two,
            parity: ChipParity::Even,
        };
        assert_eq!(seven_e2.wire_value(BreakLevel::Off), 0x1207);
        assert_eq!(seven_e2.wire_value(BreakLevel::On), 0x5207);
    }
}
