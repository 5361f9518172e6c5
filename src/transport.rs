//! Serial port semantics on top of an FTDI chip context.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::context::{BreakLevel, FtdiContext, HwError};
use crate::discovery::{claim_first, Identity};
use crate::line;
use crate::types::*;
use crate::usb::NusbContext;
use crate::{Result, Status};

/// One open serial-over-USB connection.
///
/// The handle owns the chip context for its whole life. Dropping it
/// releases the device even when [`close`](Self::close) was never called.
///
/// ```no_run
/// use ftdi_iostream::{Direction, FlowControl, FtdiTransport, Parity, StopBits, TransportConfig};
///
/// let mut port = FtdiTransport::open(&TransportConfig::default())?;
/// port.configure(9600, 8, Parity::None, StopBits::One, FlowControl::None)?;
/// port.set_timeout(3000)?;
/// port.purge(Direction::All)?;
/// port.close()?;
/// # Ok::<(), ftdi_iostream::Status>(())
/// ```
pub struct FtdiTransport<C: FtdiContext = NusbContext> {
    context: C,
    identity: Identity,
    /// `None` means block indefinitely.
    timeout: Option<Duration>,
    line: Option<LineConfig>,
    config: TransportConfig,
    closed: bool,
}

/// Log a hardware failure and turn it into an I/O status.
fn hw(what: &'static str) -> impl Fn(HwError) -> Status {
    move |e| {
        error!("{}: {}", what, e);
        Status::Io(format!("{what}: {e}"))
    }
}

impl FtdiTransport<NusbContext> {
    /// Find and open the first attached candidate cable.
    pub fn open(config: &TransportConfig) -> Result<Self> {
        Self::open_with(NusbContext::new, config)
    }
}

impl<C: FtdiContext> FtdiTransport<C> {
    /// Open a transport on a context produced by `alloc`.
    ///
    /// The context is reset and purged before the handle is returned. Any
    /// failure releases the context before the error is reported.
    pub fn open_with<F>(alloc: F, config: &TransportConfig) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<C, HwError>,
    {
        info!("Opening FTDI transport");
        let mut context = alloc().map_err(|e| {
            error!("Failed to allocate FTDI context: {}", e);
            Status::NoMemory(e.to_string())
        })?;

        context
            .set_interface_any()
            .map_err(hw("Selecting FTDI interface failed"))?;

        let identity = claim_first(&mut context, config.vendor_id, &config.candidates)
            .map_err(hw("No usable FTDI cable"))?;

        // The device is claimed; from here on Drop releases it.
        let mut transport = Self {
            context,
            identity,
            timeout: None,
            line: None,
            config: config.clone(),
            closed: false,
        };
        transport
            .context
            .usb_reset()
            .map_err(hw("FTDI reset failed"))?;
        transport
            .context
            .purge_buffers()
            .map_err(hw("FTDI purge failed"))?;

        Ok(transport)
    }

    /// Release the device.
    ///
    /// The handle is consumed and its context freed even when the hardware
    /// reports a failure, which is still returned.
    pub fn close(mut self) -> Result<()> {
        info!(
            "Closing FTDI transport {:04x}:{:04x}",
            self.identity.vendor_id, self.identity.product_id
        );
        self.closed = true;
        self.context
            .usb_close()
            .map_err(hw("Unable to close the FTDI device"))
    }

    /// The cable picked during discovery.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Line settings last applied successfully, if any.
    pub fn line_config(&self) -> Option<&LineConfig> {
        self.line.as_ref()
    }

    /// Current read timeout; `None` while blocking.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Apply line settings.
    ///
    /// All values are validated before the chip is touched. On failure the
    /// previously applied configuration stays recorded.
    pub fn configure(
        &mut self,
        baud_rate: u32,
        data_bits: u32,
        parity: Parity,
        stop_bits: StopBits,
        flow_control: FlowControl,
    ) -> Result<()> {
        debug!(
            "Configure: baudrate={}, databits={}, parity={:?}, stopbits={:?}, flowcontrol={:?}",
            baud_rate, data_bits, parity, stop_bits, flow_control
        );

        let settings = line::map_settings(baud_rate, data_bits, parity, stop_bits, flow_control)?;

        self.context
            .set_baudrate(baud_rate)
            .map_err(hw("Setting baud rate failed"))?;
        self.context
            .set_line_property(settings.line)
            .map_err(hw("Setting line properties failed"))?;
        self.context
            .set_flow_control(settings.flow)
            .map_err(hw("Setting flow control failed"))?;

        self.line = Some(settings.config);
        Ok(())
    }

    /// Set the read timeout in milliseconds. Negative values block indefinitely.
    pub fn set_timeout(&mut self, timeout_ms: i32) -> Result<()> {
        debug!("Timeout: value={}", timeout_ms);
        self.timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
        Ok(())
    }

    /// Fill `buf` completely or fail.
    ///
    /// Blocking mode is approximated by the configured blocking read limit
    /// (10 seconds by default).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = self.timeout.unwrap_or(self.config.blocking_read_limit);
        let start = Instant::now();

        let mut nbytes = 0;
        while nbytes < buf.len() {
            match self.context.read_data(&mut buf[nbytes..]) {
                Ok(0) => {
                    if start.elapsed() > deadline {
                        error!(
                            "FTDI read timed out after {} of {} bytes",
                            nbytes,
                            buf.len()
                        );
                        return Err(Status::Timeout);
                    }
                    thread::sleep(self.config.poll_interval);
                }
                Ok(n) => nbytes += n,
                Err(HwError::Interrupted) => continue,
                Err(e) => return Err(hw("FTDI read failed")(e)),
            }
        }

        debug!("Read {} bytes", nbytes);
        Ok(nbytes)
    }

    /// Write `buf`, stopping early if the chip accepts nothing.
    ///
    /// Returns the number of bytes accepted, which is less than `buf.len()`
    /// only after such an end-of-stream.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut nbytes = 0;
        let mut interrupted = 0;
        while nbytes < buf.len() {
            match self.context.write_data(&buf[nbytes..]) {
                Ok(0) => break,
                Ok(n) => nbytes += n,
                Err(HwError::Interrupted) => {
                    interrupted += 1;
                    if interrupted > self.config.write_retry_budget {
                        error!(
                            "FTDI write interrupted {} times, giving up after {} bytes",
                            interrupted, nbytes
                        );
                        return Err(Status::Io("write interrupted too often".into()));
                    }
                }
                Err(e) => return Err(hw("FTDI write failed")(e)),
            }
        }

        debug!("Wrote {} bytes", nbytes);
        Ok(nbytes)
    }

    /// Discard buffered data.
    ///
    /// `Input` purges the chip's transmit buffer and `Output` its receive
    /// buffer. `All` resets the chip.
    pub fn purge(&mut self, direction: Direction) -> Result<()> {
        debug!(
            "Flush: queue={:?}, input={}",
            direction,
            self.context.read_buffer_remaining()
        );

        let ret = match direction {
            Direction::Input => self.context.purge_tx_buffer(),
            Direction::Output => self.context.purge_rx_buffer(),
            Direction::All => self.context.usb_reset(),
        };
        ret.map_err(hw("FTDI purge failed"))
    }

    /// Bytes received by the chip context but not yet read.
    pub fn get_available(&self) -> Result<usize> {
        Ok(self.context.read_buffer_remaining())
    }

    /// The chip offers no count of bytes still in flight.
    pub fn get_transmitted(&self) -> Result<usize> {
        Err(Status::Unsupported("transmitted byte count"))
    }

    /// Send the break request to the chip, then report break as unsupported.
    ///
    /// The hardware outcome is only logged.
    pub fn set_break(&mut self, level: bool) -> Result<()> {
        debug!("Break: value={}", level);

        let brk = if level { BreakLevel::On } else { BreakLevel::Off };
        let line = line::line_property_of(self.line.as_ref());
        if let Err(e) = self.context.set_line_property_with_break(line, brk) {
            warn!("FTDI break request failed: {}", e);
        }

        Err(Status::Unsupported("break"))
    }

    pub fn set_dtr(&mut self, value: bool) -> Result<()> {
        debug!("DTR: value={}", value);
        self.context.set_dtr(value).map_err(hw("Setting DTR failed"))
    }

    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        debug!("RTS: value={}", level);
        self.context.set_rts(level).map_err(hw("Setting RTS failed"))
    }

    /// Block the calling thread.
    ///
    /// `thread::sleep` resumes after signal interruptions on its own.
    pub fn sleep(&mut self, milliseconds: u32) -> Result<()> {
        debug!("Sleep: value={}", milliseconds);
        thread::sleep(Duration::from_millis(u64::from(milliseconds)));
        Ok(())
    }
}

impl<C: FtdiContext> Drop for FtdiTransport<C> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.context.usb_close() {
            warn!("Releasing dropped FTDI transport failed: {}", e);
        }
    }
}

impl<C: FtdiContext> io::Read for FtdiTransport<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FtdiTransport::read(self, buf).map_err(io::Error::from)
    }
}

impl<C: FtdiContext> io::Write for FtdiTransport<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FtdiTransport::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ChipFlowControl, LineProperty};
    use crate::discovery::CANDIDATES;
    use crate::mock::{Call, MockContext, Op, ReadStep, WriteStep};

    fn config() -> TransportConfig {
        TransportConfig::default()
    }

    fn open(mock: &MockContext) -> FtdiTransport<MockContext> {
        let ctx = mock.clone();
        let t = FtdiTransport::open_with(move || Ok(ctx), &config()).expect("open");
        mock.clear_calls();
        t
    }

    #[test]
    fn open_sequence() {
        let mock = MockContext::new().with_present(&[0x6010]);
        let ctx = mock.clone();
        let t = FtdiTransport::open_with(move || Ok(ctx), &config()).unwrap();

        assert_eq!(t.identity(), CANDIDATES[1]);
        assert_eq!(t.timeout(), None);
        assert!(t.line_config().is_none());
        assert_eq!(
            mock.calls(),
            vec![
                Call::SetInterfaceAny,
                Call::UsbOpen { vendor_id: 0x0403, product_id: 0x6001 },
                Call::UsbOpen { vendor_id: 0x0403, product_id: 0x6010 },
                Call::UsbReset,
                Call::PurgeBuffers,
            ]
        );
    }

    #[test]
    fn allocation_failure_is_no_memory() {
        let result = FtdiTransport::<MockContext>::open_with(
            || Err(HwError::Alloc("exhausted".into())),
            &config(),
        );
        assert!(matches!(result, Err(Status::NoMemory(_))));
    }

    #[test]
    fn interface_failure_releases_context() {
        let mock = MockContext::new()
            .with_present(&[0x6001])
            .with_failing(Op::SetInterface);
        let ctx = mock.clone();
        let result = FtdiTransport::open_with(move || Ok(ctx), &config());
        assert!(matches!(result, Err(Status::Io(_))));
        assert_eq!(mock.live_handles(), 0);
        assert_eq!(mock.calls(), vec![Call::SetInterfaceAny]);
    }

    #[test]
    fn no_cable_is_io_error() {
        let mock = MockContext::new();
        let ctx = mock.clone();
        let result = FtdiTransport::open_with(move || Ok(ctx), &config());
        assert!(matches!(result, Err(Status::Io(_))));
        assert_eq!(mock.live_handles(), 0);
        assert!(!mock.calls().contains(&Call::UsbClose));
    }

    #[test]
    fn reset_failure_releases_claimed_device() {
        let mock = MockContext::new()
            .with_present(&[0x6001])
            .with_failing(Op::UsbReset);
        let ctx = mock.clone();
        let result = FtdiTransport::open_with(move || Ok(ctx), &config());
        assert!(matches!(result, Err(Status::Io(_))));
        assert_eq!(mock.live_handles(), 0);
        assert_eq!(mock.calls().last(), Some(&Call::UsbClose));
    }

    #[test]
    fn purge_failure_during_open() {
        let mock = MockContext::new()
            .with_present(&[0x6001])
            .with_failing(Op::PurgeBuffers);
        let ctx = mock.clone();
        let result = FtdiTransport::open_with(move || Ok(ctx), &config());
        assert!(matches!(result, Err(Status::Io(_))));
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn configure_applies_in_order() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        t.configure(9600, 8, Parity::Even, StopBits::Two, FlowControl::Software)
            .unwrap();
        assert_eq!(
            mock.calls(),
            vec![
                Call::SetBaudrate(9600),
                Call::SetLineProperty(LineProperty {
                    bits: crate::context::ChipBits::Bits8,
                    stop_bits: crate::context::ChipStopBits::Two,
                    parity: crate::context::ChipParity::Even,
                }),
                Call::SetFlowControl(ChipFlowControl::XonXoff),
            ]
        );
        assert_eq!(t.line_config().unwrap().to_string(), "9600 8E2");
    }

    #[test]
    fn invalid_configure_touches_no_hardware() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        t.configure(9600, 8, Parity::None, StopBits::One, FlowControl::None)
            .unwrap();
        mock.clear_calls();

        let err = t
            .configure(115200, 6, Parity::None, StopBits::One, FlowControl::None)
            .unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
        assert!(mock.calls().is_empty());
        assert_eq!(t.line_config().unwrap().baud_rate, 9600);
    }

    #[test]
    fn rejected_flow_control_keeps_previous_config() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        mock.fail(Op::SetFlowControl);
        let err = t
            .configure(4800, 7, Parity::Odd, StopBits::One, FlowControl::Hardware)
            .unwrap_err();
        assert!(matches!(err, Status::Io(_)));
        assert!(t.line_config().is_none());
    }

    #[test]
    fn negative_timeout_blocks() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        t.set_timeout(250).unwrap();
        assert_eq!(t.timeout(), Some(Duration::from_millis(250)));
        t.set_timeout(-1).unwrap();
        assert_eq!(t.timeout(), None);
        t.set_timeout(0).unwrap();
        assert_eq!(t.timeout(), Some(Duration::ZERO));
    }

    #[test]
    fn read_retries_interrupted_transfers() {
        let mock = MockContext::new().with_present(&[0x6001]).with_reads([
            ReadStep::Interrupted,
            ReadStep::Data(vec![0xA5]),
            ReadStep::Interrupted,
            ReadStep::Idle,
            ReadStep::Data(vec![0x5A, 0x01]),
        ]);
        let mut t = open(&mock);
        let mut buf = [0u8; 3];
        assert_eq!(t.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0xA5, 0x5A, 0x01]);
    }

    #[test]
    fn interrupted_read_does_not_consume_deadline() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        t.set_timeout(0).unwrap();

        mock.push_read(ReadStep::Interrupted);
        mock.push_read(ReadStep::Interrupted);
        mock.push_read(ReadStep::Data(vec![0x42]));
        let mut buf = [0u8; 1];
        assert_eq!(t.read(&mut buf).unwrap(), 1);
        assert_eq!(buf, [0x42]);
    }

    #[test]
    fn read_hard_error_is_io() {
        let mock = MockContext::new()
            .with_present(&[0x6001])
            .with_reads([ReadStep::Data(vec![1]), ReadStep::Fail]);
        let mut t = open(&mock);
        let mut buf = [0u8; 4];
        assert!(matches!(t.read(&mut buf), Err(Status::Io(_))));
    }

    #[test]
    fn zero_timeout_gives_up_after_first_idle_poll() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        t.set_timeout(0).unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(t.read(&mut buf), Err(Status::Timeout)));
    }

    #[test]
    fn empty_read_and_write_are_immediate() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        assert_eq!(t.read(&mut []).unwrap(), 0);
        assert_eq!(t.write(&[]).unwrap(), 0);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn write_retry_budget() {
        let mock = MockContext::new()
            .with_present(&[0x6001])
            .with_writes([WriteStep::Interrupted; 4]);
        let ctx = mock.clone();
        let cfg = config().with_write_retry_budget(3);
        let mut t = FtdiTransport::open_with(move || Ok(ctx), &cfg).unwrap();
        assert!(matches!(t.write(b"abc"), Err(Status::Io(_))));
        assert!(mock.written().is_empty());
    }

    #[test]
    fn write_survives_interruptions_within_budget() {
        let mock = MockContext::new().with_present(&[0x6001]).with_writes([
            WriteStep::Interrupted,
            WriteStep::Accept(2),
            WriteStep::Interrupted,
        ]);
        let mut t = open(&mock);
        assert_eq!(t.write(b"abcd").unwrap(), 4);
        assert_eq!(mock.written(), b"abcd");
    }

    #[test]
    fn write_hard_error_is_io() {
        let mock = MockContext::new()
            .with_present(&[0x6001])
            .with_writes([WriteStep::Accept(1), WriteStep::Fail]);
        let mut t = open(&mock);
        assert!(matches!(t.write(b"xyz"), Err(Status::Io(_))));
    }

    #[test]
    fn break_is_attempted_but_unsupported() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        t.configure(2400, 7, Parity::Odd, StopBits::One, FlowControl::None)
            .unwrap();
        mock.clear_calls();

        assert!(matches!(t.set_break(true), Err(Status::Unsupported(_))));
        let expected_line = line::line_property_of(t.line_config());
        assert_eq!(
            mock.calls(),
            vec![Call::SetLinePropertyWithBreak(expected_line, BreakLevel::On)]
        );

        mock.fail(Op::SetLineProperty);
        assert!(matches!(t.set_break(false), Err(Status::Unsupported(_))));
    }

    #[test]
    fn control_lines() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        t.set_dtr(true).unwrap();
        t.set_rts(false).unwrap();
        assert_eq!(mock.calls(), vec![Call::SetDtr(true), Call::SetRts(false)]);

        mock.fail(Op::SetDtr);
        mock.fail(Op::SetRts);
        assert!(matches!(t.set_dtr(false), Err(Status::Io(_))));
        assert!(matches!(t.set_rts(true), Err(Status::Io(_))));
    }

    #[test]
    fn available_and_transmitted() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let t = open(&mock);
        mock.set_backlog(17);
        assert_eq!(t.get_available().unwrap(), 17);
        assert!(matches!(t.get_transmitted(), Err(Status::Unsupported(_))));
    }

    #[test]
    fn purge_failure_is_io() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        mock.fail(Op::PurgeRx);
        assert!(matches!(t.purge(Direction::Output), Err(Status::Io(_))));
        assert!(t.purge(Direction::Input).is_ok());
    }

    #[test]
    fn sleep_waits() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let mut t = open(&mock);
        let start = Instant::now();
        t.sleep(20).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn drop_releases_device_once() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let t = open(&mock);
        drop(t);
        assert_eq!(mock.calls(), vec![Call::UsbClose]);
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn close_does_not_close_twice() {
        let mock = MockContext::new().with_present(&[0x6001]);
        let t = open(&mock);
        t.close().unwrap();
        assert_eq!(mock.calls(), vec![Call::UsbClose]);
    }

    #[test]
    fn io_traits() {
        use std::io::{Read, Write};

        let mock = MockContext::new()
            .with_present(&[0x6001])
            .with_reads([ReadStep::Data(hex::decode("c0ffee").unwrap())]);
        let mut t = open(&mock);
        t.write_all(&hex::decode("0102").unwrap()).unwrap();
        let mut buf = [0u8; 3];
        t.read_exact(&mut buf).unwrap();
        assert_eq!(hex::encode(buf), "c0ffee");
        assert_eq!(mock.written(), vec![1, 2]);

        t.set_timeout(5).unwrap();
        let err = Read::read(&mut t, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
