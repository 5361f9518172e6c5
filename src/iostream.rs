//! The pluggable I/O stream contract and its host-side wrapper.
//!
//! Every transport (native serial, Bluetooth, this FTDI one) implements
//! [`Transport`]; the download framework only ever talks to an [`IoStream`].

use log::debug;

use crate::config::TransportConfig;
use crate::context::FtdiContext;
use crate::transport::FtdiTransport;
use crate::types::*;
use crate::{Result, Status};

/// Capability set of a transport.
///
/// Operations a backend does not provide keep the default body and
/// report [`Status::Unsupported`].
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn set_timeout(&mut self, _timeout_ms: i32) -> Result<()> {
        Err(Status::Unsupported("set_timeout"))
    }

    fn set_break(&mut self, _level: bool) -> Result<()> {
        Err(Status::Unsupported("set_break"))
    }

    fn set_dtr(&mut self, _value: bool) -> Result<()> {
        Err(Status::Unsupported("set_dtr"))
    }

    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Err(Status::Unsupported("set_rts"))
    }

    fn get_available(&mut self) -> Result<usize> {
        Err(Status::Unsupported("get_available"))
    }

    fn get_transmitted(&mut self) -> Result<usize> {
        Err(Status::Unsupported("get_transmitted"))
    }

    fn configure(
        &mut self,
        _baud_rate: u32,
        _data_bits: u32,
        _parity: Parity,
        _stop_bits: StopBits,
        _flow_control: FlowControl,
    ) -> Result<()> {
        Err(Status::Unsupported("configure"))
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Status::Unsupported("read"))
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Status::Unsupported("write"))
    }

    fn purge(&mut self, _direction: Direction) -> Result<()> {
        Err(Status::Unsupported("purge"))
    }

    fn sleep(&mut self, _milliseconds: u32) -> Result<()> {
        Err(Status::Unsupported("sleep"))
    }

    /// Release the transport. Resources are freed whatever the outcome.
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl<C: FtdiContext + 'static> Transport for FtdiTransport<C> {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn set_timeout(&mut self, timeout_ms: i32) -> Result<()> {
        FtdiTransport::set_timeout(self, timeout_ms)
    }

    fn set_break(&mut self, level: bool) -> Result<()> {
        FtdiTransport::set_break(self, level)
    }

    fn set_dtr(&mut self, value: bool) -> Result<()> {
        FtdiTransport::set_dtr(self, value)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        FtdiTransport::set_rts(self, level)
    }

    fn get_available(&mut self) -> Result<usize> {
        FtdiTransport::get_available(self)
    }

    fn get_transmitted(&mut self) -> Result<usize> {
        FtdiTransport::get_transmitted(self)
    }

    fn configure(
        &mut self,
        baud_rate: u32,
        data_bits: u32,
        parity: Parity,
        stop_bits: StopBits,
        flow_control: FlowControl,
    ) -> Result<()> {
        FtdiTransport::configure(self, baud_rate, data_bits, parity, stop_bits, flow_control)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        FtdiTransport::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        FtdiTransport::write(self, buf)
    }

    fn purge(&mut self, direction: Direction) -> Result<()> {
        FtdiTransport::purge(self, direction)
    }

    fn sleep(&mut self, milliseconds: u32) -> Result<()> {
        FtdiTransport::sleep(self, milliseconds)
    }

    fn close(self: Box<Self>) -> Result<()> {
        FtdiTransport::close(*self)
    }
}

/// A stream as held by the download framework.
///
/// Calls on a stream without a handle fail with
/// [`Status::InvalidArgument`], except [`close`](Self::close), which
/// succeeds and does nothing.
#[derive(Default)]
pub struct IoStream {
    handle: Option<Box<dyn Transport>>,
}

impl IoStream {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            handle: Some(transport),
        }
    }

    /// Open the first attached FTDI cable.
    pub fn open_ftdi(config: &TransportConfig) -> Result<Self> {
        let transport = FtdiTransport::open(config)?;
        Ok(Self::new(Box::new(transport)))
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn kind(&self) -> Option<TransportKind> {
        self.handle.as_ref().map(|h| h.kind())
    }

    fn handle(&mut self) -> Result<&mut (dyn Transport + 'static)> {
        self.handle
            .as_deref_mut()
            .ok_or_else(|| Status::InvalidArgument("stream has no open handle".into()))
    }

    pub fn set_timeout(&mut self, timeout_ms: i32) -> Result<()> {
        self.handle()?.set_timeout(timeout_ms)
    }

    pub fn set_break(&mut self, level: bool) -> Result<()> {
        self.handle()?.set_break(level)
    }

    pub fn set_dtr(&mut self, value: bool) -> Result<()> {
        self.handle()?.set_dtr(value)
    }

    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        self.handle()?.set_rts(level)
    }

    pub fn get_available(&mut self) -> Result<usize> {
        self.handle()?.get_available()
    }

    pub fn get_transmitted(&mut self) -> Result<usize> {
        self.handle()?.get_transmitted()
    }

    pub fn configure(
        &mut self,
        baud_rate: u32,
        data_bits: u32,
        parity: Parity,
        stop_bits: StopBits,
        flow_control: FlowControl,
    ) -> Result<()> {
        self.handle()?
            .configure(baud_rate, data_bits, parity, stop_bits, flow_control)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.handle()?.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.handle()?.write(buf)
    }

    pub fn purge(&mut self, direction: Direction) -> Result<()> {
        self.handle()?.purge(direction)
    }

    pub fn sleep(&mut self, milliseconds: u32) -> Result<()> {
        self.handle()?.sleep(milliseconds)
    }

    /// Close the handle. Closing an empty stream is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.close(),
            None => {
                debug!("Close on a stream without handle");
                Ok(())
            }
        }
    }
}
