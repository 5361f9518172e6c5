//! FTDI chip context over `nusb`.
//!
//! Speaks the FTDI vendor control requests directly and polls the bulk
//! endpoints synchronously through `MaybeFuture::wait`.

use std::time::Duration;

use log::{debug, error};
use nusb::transfer::{Bulk, ControlOut, ControlType, In, Out, Recipient, TransferError};
use nusb::{Endpoint, MaybeFuture};

use crate::context::{BreakLevel, ChipFlowControl, FtdiContext, HwError, LineProperty};

// --- Vendor requests ---
const SIO_RESET_REQUEST: u8 = 0x00;
const SIO_SET_MODEM_CTRL_REQUEST: u8 = 0x01;
const SIO_SET_FLOW_CTRL_REQUEST: u8 = 0x02;
const SIO_SET_BAUDRATE_REQUEST: u8 = 0x03;
const SIO_SET_DATA_REQUEST: u8 = 0x04;

// --- Reset values ---
const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

// --- Flow control (high byte of index) ---
const SIO_DISABLE_FLOW_CTRL: u16 = 0x0;
const SIO_RTS_CTS_HS: u16 = 0x1 << 8;
const SIO_XON_XOFF_HS: u16 = 0x4 << 8;

const XON: u8 = 0x11;
const XOFF: u8 = 0x13;

// --- Modem control ---
const SIO_SET_DTR_HIGH: u16 = 0x0101;
const SIO_SET_DTR_LOW: u16 = 0x0100;
const SIO_SET_RTS_HIGH: u16 = 0x0202;
const SIO_SET_RTS_LOW: u16 = 0x0200;

/// Base clock of BM/R-type chips.
const C_CLK: u32 = 48_000_000;
/// Base clock of H-type chips.
const H_CLK: u32 = 120_000_000;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);
const WRITE_TIMEOUT: Duration = Duration::from_millis(5000);
/// Bulk IN poll window. The chip answers at least every latency period (16 ms).
const POLL_TIMEOUT: Duration = Duration::from_millis(50);
const CHUNKSIZE: usize = 4096;

/// FTDI chip generation, detected from `bcdDevice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    Am,
    Bm,
    Ft2232C,
    Ft232R,
    Ft2232H,
    Ft4232H,
    Ft232H,
    Ft230X,
}

impl ChipType {
    pub fn from_bcd(bcd: u16, has_serial: bool) -> Self {
        match bcd {
            0x0400 => ChipType::Bm,
            // BM chips report 0x200 when their serial number is unset.
            0x0200 if !has_serial => ChipType::Bm,
            0x0200 => ChipType::Am,
            0x0500 => ChipType::Ft2232C,
            0x0600 => ChipType::Ft232R,
            0x0700 => ChipType::Ft2232H,
            0x0800 => ChipType::Ft4232H,
            0x0900 => ChipType::Ft232H,
            0x1000 => ChipType::Ft230X,
            _ => ChipType::Bm,
        }
    }

    pub fn is_h_type(self) -> bool {
        matches!(self, ChipType::Ft2232H | ChipType::Ft4232H | ChipType::Ft232H)
    }

    /// Chips with more than one interface carry the divisor's high bits in the index high byte.
    fn multi_interface(self) -> bool {
        self.is_h_type() || self == ChipType::Ft2232C
    }
}

/// Encoded SET_BAUDRATE request and the rate it really produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudDivisor {
    pub value: u16,
    pub index: u16,
    pub actual: u32,
}

const FRAC_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];

/// Closest achievable rate for a clock, and its encoded divisor.
fn to_clkbits(baud: u32, clk: u32, clk_div: u32) -> (u32, u32) {
    if baud >= clk / clk_div {
        return (clk / clk_div, 0);
    }
    if baud >= clk / (clk_div + clk_div / 2) {
        return (clk / (clk_div + clk_div / 2), 1);
    }
    if baud >= clk / (2 * clk_div) {
        return (clk / (2 * clk_div), 2);
    }

    // Divisor in sixteenths, rounded to eighths.
    let divisor = (u64::from(clk) * 16 / u64::from(clk_div) / u64::from(baud)) as u32;
    let mut best = if divisor & 1 == 1 {
        divisor / 2 + 1
    } else {
        divisor / 2
    };
    if best > 0x20000 {
        best = 0x1ffff;
    }
    let scaled = (u64::from(clk) * 16 / u64::from(clk_div) / u64::from(best)) as u32;
    let actual = if scaled & 1 == 1 {
        scaled / 2 + 1
    } else {
        scaled / 2
    };
    let encoded = (best >> 3) | (FRAC_CODE[(best & 0x7) as usize] << 14);
    (actual, encoded)
}

pub fn convert_baudrate(baud: u32, chip: ChipType, usb_index: u16) -> Option<BaudDivisor> {
    if baud == 0 {
        return None;
    }

    let (actual, encoded) = if chip.is_h_type() && u64::from(baud) * 10 > u64::from(H_CLK / 0x3fff) {
        let (actual, encoded) = to_clkbits(baud, H_CLK, 10);
        (actual, encoded | 0x20000)
    } else {
        to_clkbits(baud, C_CLK, 16)
    };

    let value = (encoded & 0xffff) as u16;
    let index = if chip.multi_interface() {
        (((encoded >> 8) & 0xff00) as u16) | usb_index
    } else {
        (encoded >> 16) as u16
    };
    Some(BaudDivisor {
        value,
        index,
        actual,
    })
}

/// Whether `actual` is within ~5% of `requested`.
fn within_tolerance(requested: u32, actual: u32) -> bool {
    let (r, a) = (u64::from(requested), u64::from(actual));
    if a * 2 < r {
        return false;
    }
    if a < r {
        a * 21 >= r * 20
    } else {
        r * 21 >= a * 20
    }
}

/// Compact away the two modem status bytes heading every packet.
///
/// Returns the number of payload bytes left at the start of `data`.
fn strip_modem_status(data: &mut [u8], packet_size: usize) -> usize {
    let mut write_pos = 0;
    for pkt_start in (0..data.len()).step_by(packet_size) {
        let pkt_end = (pkt_start + packet_size).min(data.len());
        if pkt_end - pkt_start <= 2 {
            continue;
        }
        let payload = pkt_start + 2..pkt_end;
        let len = payload.len();
        data.copy_within(payload, write_pos);
        write_pos += len;
    }
    write_pos
}

fn usb_err<E: std::fmt::Display>(e: E) -> HwError {
    HwError::Usb(e.to_string())
}

fn transfer_err(e: TransferError) -> HwError {
    match e {
        TransferError::Cancelled => HwError::Interrupted,
        other => HwError::Usb(other.to_string()),
    }
}

struct Claimed {
    _device: nusb::Device,
    interface: nusb::Interface,
    bulk_in: Endpoint<Bulk, In>,
    bulk_out: Endpoint<Bulk, Out>,
    chip: ChipType,
    max_packet_size: usize,
}

/// Chip context driving a real cable.
pub struct NusbContext {
    interface_num: u8,
    usb_index: u16,
    read_ep: u8,
    write_ep: u8,
    claimed: Option<Claimed>,

    // Payload received but not yet handed out
    readbuffer: Vec<u8>,
    readbuffer_offset: usize,
    readbuffer_remaining: usize,
}

impl NusbContext {
    pub fn new() -> Result<Self, HwError> {
        Ok(Self {
            interface_num: 0,
            usb_index: 1,
            read_ep: 0x81,
            write_ep: 0x02,
            claimed: None,
            readbuffer: vec![0u8; CHUNKSIZE],
            readbuffer_offset: 0,
            readbuffer_remaining: 0,
        })
    }

    /// Chip generation of the claimed device.
    pub fn chip_type(&self) -> Option<ChipType> {
        self.claimed.as_ref().map(|c| c.chip)
    }

    fn claimed(&mut self) -> Result<&mut Claimed, HwError> {
        self.claimed
            .as_mut()
            .ok_or_else(|| HwError::Usb("USB device unavailable".into()))
    }

    /// Strip a completed bulk IN transfer into the read buffer and hand out
    /// as much as `buf` takes.
    fn deliver(&mut self, received: &[u8], packet_size: usize, buf: &mut [u8]) -> usize {
        let len = received.len().min(self.readbuffer.len());
        if len <= 2 {
            return 0;
        }
        self.readbuffer[..len].copy_from_slice(&received[..len]);
        let payload = strip_modem_status(&mut self.readbuffer[..len], packet_size);

        let n = payload.min(buf.len());
        buf[..n].copy_from_slice(&self.readbuffer[..n]);
        self.readbuffer_offset = n;
        self.readbuffer_remaining = payload - n;
        n
    }

    fn control_out(&mut self, request: u8, value: u16, index: u16) -> Result<(), HwError> {
        let claimed = self.claimed()?;
        claimed
            .interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data: &[],
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(transfer_err)
    }

    fn discard_readbuffer(&mut self) {
        self.readbuffer_offset = 0;
        self.readbuffer_remaining = 0;
    }
}

fn max_packet_size(device: &nusb::Device, chip: ChipType, interface_num: u8) -> usize {
    let fallback = if chip.is_h_type() { 512 } else { 64 };
    let Ok(config) = device.active_configuration() else {
        return fallback;
    };
    for group in config.interfaces() {
        if group.interface_number() != interface_num {
            continue;
        }
        for alt in group.alt_settings() {
            if let Some(ep) = alt.endpoints().next() {
                if ep.max_packet_size() > 0 {
                    return ep.max_packet_size();
                }
            }
        }
    }
    fallback
}

impl FtdiContext for NusbContext {
    fn set_interface_any(&mut self) -> Result<(), HwError> {
        if self.claimed.is_some() {
            return Err(HwError::Usb("interface cannot change while claimed".into()));
        }
        // Any interface resolves to interface A.
        self.interface_num = 0;
        self.usb_index = 1;
        self.read_ep = 0x81;
        self.write_ep = 0x02;
        Ok(())
    }

    fn usb_open(&mut self, vendor_id: u16, product_id: u16) -> Result<(), HwError> {
        let info = nusb::list_devices()
            .wait()
            .map_err(usb_err)?
            .find(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            .ok_or(HwError::NotFound)?;

        let device = info.open().wait().map_err(usb_err)?;
        let interface = device
            .detach_and_claim_interface(self.interface_num)
            .wait()
            .map_err(usb_err)?;

        let desc = device.device_descriptor();
        let chip = ChipType::from_bcd(
            desc.device_version(),
            desc.serial_number_string_index().is_some(),
        );
        let max_packet_size = max_packet_size(&device, chip, self.interface_num);
        let bulk_in = interface.endpoint::<Bulk, In>(self.read_ep).map_err(usb_err)?;
        let bulk_out = interface.endpoint::<Bulk, Out>(self.write_ep).map_err(usb_err)?;
        debug!(
            "Opened {:04x}:{:04x} as {:?}, max packet {}",
            vendor_id, product_id, chip, max_packet_size
        );

        self.discard_readbuffer();
        self.claimed = Some(Claimed {
            _device: device,
            interface,
            bulk_in,
            bulk_out,
            chip,
            max_packet_size,
        });
        Ok(())
    }

    fn usb_close(&mut self) -> Result<(), HwError> {
        self.discard_readbuffer();
        self.claimed = None;
        Ok(())
    }

    fn usb_reset(&mut self) -> Result<(), HwError> {
        let index = self.usb_index;
        self.control_out(SIO_RESET_REQUEST, SIO_RESET_SIO, index)?;
        self.discard_readbuffer();
        Ok(())
    }

    fn purge_buffers(&mut self) -> Result<(), HwError> {
        self.purge_rx_buffer()?;
        self.purge_tx_buffer()
    }

    fn purge_rx_buffer(&mut self) -> Result<(), HwError> {
        let index = self.usb_index;
        self.control_out(SIO_RESET_REQUEST, SIO_RESET_PURGE_RX, index)?;
        self.discard_readbuffer();
        Ok(())
    }

    fn purge_tx_buffer(&mut self) -> Result<(), HwError> {
        let index = self.usb_index;
        self.control_out(SIO_RESET_REQUEST, SIO_RESET_PURGE_TX, index)
    }

    fn set_baudrate(&mut self, baud_rate: u32) -> Result<(), HwError> {
        let chip = self.claimed()?.chip;
        let divisor = convert_baudrate(baud_rate, chip, self.usb_index)
            .ok_or_else(|| HwError::Usb("baud rate must be > 0".into()))?;
        if !within_tolerance(baud_rate, divisor.actual) {
            error!(
                "Baud rate {} not achievable (closest {})",
                baud_rate, divisor.actual
            );
            return Err(HwError::Usb(format!(
                "unsupported baud rate {baud_rate} (closest {})",
                divisor.actual
            )));
        }
        self.control_out(SIO_SET_BAUDRATE_REQUEST, divisor.value, divisor.index)
    }

    fn set_line_property(&mut self, line: LineProperty) -> Result<(), HwError> {
        self.set_line_property_with_break(line, BreakLevel::Off)
    }

    fn set_line_property_with_break(
        &mut self,
        line: LineProperty,
        brk: BreakLevel,
    ) -> Result<(), HwError> {
        let index = self.usb_index;
        self.control_out(SIO_SET_DATA_REQUEST, line.wire_value(brk), index)
    }

    fn set_flow_control(&mut self, flow: ChipFlowControl) -> Result<(), HwError> {
        let (value, mode) = match flow {
            ChipFlowControl::Disabled => (0, SIO_DISABLE_FLOW_CTRL),
            ChipFlowControl::RtsCts => (0, SIO_RTS_CTS_HS),
            ChipFlowControl::XonXoff => (u16::from(XON) | (u16::from(XOFF) << 8), SIO_XON_XOFF_HS),
        };
        let index = mode | self.usb_index;
        self.control_out(SIO_SET_FLOW_CTRL_REQUEST, value, index)
    }

    fn set_dtr(&mut self, state: bool) -> Result<(), HwError> {
        let value = if state { SIO_SET_DTR_HIGH } else { SIO_SET_DTR_LOW };
        let index = self.usb_index;
        self.control_out(SIO_SET_MODEM_CTRL_REQUEST, value, index)
    }

    fn set_rts(&mut self, state: bool) -> Result<(), HwError> {
        let value = if state { SIO_SET_RTS_HIGH } else { SIO_SET_RTS_LOW };
        let index = self.usb_index;
        self.control_out(SIO_SET_MODEM_CTRL_REQUEST, value, index)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, HwError> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.readbuffer_remaining > 0 {
            let n = self.readbuffer_remaining.min(buf.len());
            let start = self.readbuffer_offset;
            buf[..n].copy_from_slice(&self.readbuffer[start..start + n]);
            self.readbuffer_offset += n;
            self.readbuffer_remaining -= n;
            return Ok(n);
        }

        let claimed = self.claimed()?;
        let packet_size = claimed.max_packet_size;
        let request = claimed.bulk_in.allocate(CHUNKSIZE);
        let completion = claimed.bulk_in.transfer_blocking(request, POLL_TIMEOUT);
        match completion.status {
            // A poll cut short by its window still keeps the packets that arrived.
            Ok(()) | Err(TransferError::Cancelled) => {}
            Err(e) => return Err(transfer_err(e)),
        }

        let len = completion.actual_len.min(completion.buffer.len());
        Ok(self.deliver(&completion.buffer[..len], packet_size, buf))
    }

    fn write_data(&mut self, buf: &[u8]) -> Result<usize, HwError> {
        if buf.is_empty() {
            return Ok(0);
        }

        let chunk = &buf[..buf.len().min(CHUNKSIZE)];
        let claimed = self.claimed()?;
        let mut request = nusb::transfer::Buffer::new(chunk.len());
        request.extend_from_slice(chunk);
        let completion = claimed.bulk_out.transfer_blocking(request, WRITE_TIMEOUT);
        completion.status.map_err(transfer_err)?;
        Ok(completion.actual_len)
    }

    fn read_buffer_remaining(&self) -> usize {
        self.readbuffer_remaining
    }
}
