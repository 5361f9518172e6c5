//! Scripted in-memory chip context for tests.
//!
//! Clones share state, so a test can hand one clone to the transport and
//! keep another to script transfers and inspect the recorded calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::{BreakLevel, ChipFlowControl, FtdiContext, HwError, LineProperty};

/// A hardware call as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetInterfaceAny,
    UsbOpen { vendor_id: u16, product_id: u16 },
    UsbClose,
    UsbReset,
    PurgeBuffers,
    PurgeRx,
    PurgeTx,
    SetBaudrate(u32),
    SetLineProperty(LineProperty),
    SetLinePropertyWithBreak(LineProperty, BreakLevel),
    SetFlowControl(ChipFlowControl),
    SetDtr(bool),
    SetRts(bool),
    /// A read attempt for this many bytes.
    Read(usize),
    /// A write attempt offering these bytes.
    Write(Vec<u8>),
}

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SetInterface,
    UsbClose,
    UsbReset,
    PurgeBuffers,
    PurgeRx,
    PurgeTx,
    SetBaudrate,
    SetLineProperty,
    SetFlowControl,
    SetDtr,
    SetRts,
}

/// Outcome of one `read_data` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Deliver these bytes; anything the caller has no room for stays queued.
    Data(Vec<u8>),
    /// Nothing pending.
    Idle,
    Interrupted,
    Fail,
}

/// Outcome of one `write_data` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// Accept at most this many bytes.
    Accept(usize),
    Interrupted,
    Fail,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Call>,
    present: Vec<u16>,
    claim_errors: HashMap<u16, HwError>,
    failing: HashSet<Op>,
    reads: VecDeque<ReadStep>,
    writes: VecDeque<WriteStep>,
    written: Vec<u8>,
    backlog: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockContext {
    state: Arc<Mutex<MockState>>,
}

impl MockContext {
    /// A context with no cable attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Product ids reported as present during discovery.
    pub fn with_present(self, product_ids: &[u16]) -> Self {
        self.lock().present.extend_from_slice(product_ids);
        self
    }

    /// Make the claim of a present product id fail.
    pub fn with_claim_error(self, product_id: u16, error: HwError) -> Self {
        self.lock().claim_errors.insert(product_id, error);
        self
    }

    pub fn with_failing(self, op: Op) -> Self {
        self.fail(op);
        self
    }

    pub fn with_reads(self, steps: impl IntoIterator<Item = ReadStep>) -> Self {
        self.lock().reads.extend(steps);
        self
    }

    pub fn with_writes(self, steps: impl IntoIterator<Item = WriteStep>) -> Self {
        self.lock().writes.extend(steps);
        self
    }

    pub fn fail(&self, op: Op) {
        self.lock().failing.insert(op);
    }

    pub fn heal(&self, op: Op) {
        self.lock().failing.remove(&op);
    }

    pub fn push_read(&self, step: ReadStep) {
        self.lock().reads.push_back(step);
    }

    pub fn set_backlog(&self, bytes: usize) {
        self.lock().backlog = bytes;
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Recorded calls other than reads and writes.
    pub fn control_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| !matches!(c, Call::Read(_) | Call::Write(_)))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Bytes accepted by the sink so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Clones of this context still alive, not counting `self`.
    pub fn live_handles(&self) -> usize {
        Arc::strong_count(&self.state) - 1
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: Call, op: Option<Op>) -> Result<(), HwError> {
        let mut state = self.lock();
        state.calls.push(call);
        match op {
            Some(op) if state.failing.contains(&op) => {
                Err(HwError::Usb(format!("{op:?} rejected by mock")))
            }
            _ => Ok(()),
        }
    }
}

impl FtdiContext for MockContext {
    fn set_interface_any(&mut self) -> Result<(), HwError> {
        self.record(Call::SetInterfaceAny, Some(Op::SetInterface))
    }

    fn usb_open(&mut self, vendor_id: u16, product_id: u16) -> Result<(), HwError> {
        self.record(
            Call::UsbOpen {
                vendor_id,
                product_id,
            },
            None,
        )?;
        let state = self.lock();
        if let Some(e) = state.claim_errors.get(&product_id) {
            return Err(e.clone());
        }
        if state.present.contains(&product_id) {
            Ok(())
        } else {
            Err(HwError::NotFound)
        }
    }

    fn usb_close(&mut self) -> Result<(), HwError> {
        self.record(Call::UsbClose, Some(Op::UsbClose))
    }

    fn usb_reset(&mut self) -> Result<(), HwError> {
        self.record(Call::UsbReset, Some(Op::UsbReset))
    }

    fn purge_buffers(&mut self) -> Result<(), HwError> {
        self.record(Call::PurgeBuffers, Some(Op::PurgeBuffers))
    }

    fn purge_rx_buffer(&mut self) -> Result<(), HwError> {
        self.record(Call::PurgeRx, Some(Op::PurgeRx))
    }

    fn purge_tx_buffer(&mut self) -> Result<(), HwError> {
        self.record(Call::PurgeTx, Some(Op::PurgeTx))
    }

    fn set_baudrate(&mut self, baud_rate: u32) -> Result<(), HwError> {
        self.record(Call::SetBaudrate(baud_rate), Some(Op::SetBaudrate))
    }

    fn set_line_property(&mut self, line: LineProperty) -> Result<(), HwError> {
        self.record(Call::SetLineProperty(line), Some(Op::SetLineProperty))
    }

    fn set_line_property_with_break(
        &mut self,
        line: LineProperty,
        brk: BreakLevel,
    ) -> Result<(), HwError> {
        self.record(
            Call::SetLinePropertyWithBreak(line, brk),
            Some(Op::SetLineProperty),
        )
    }

    fn set_flow_control(&mut self, flow: ChipFlowControl) -> Result<(), HwError> {
        self.record(Call::SetFlowControl(flow), Some(Op::SetFlowControl))
    }

    fn set_dtr(&mut self, state: bool) -> Result<(), HwError> {
        self.record(Call::SetDtr(state), Some(Op::SetDtr))
    }

    fn set_rts(&mut self, state: bool) -> Result<(), HwError> {
        self.record(Call::SetRts(state), Some(Op::SetRts))
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, HwError> {
        let mut state = self.lock();
        state.calls.push(Call::Read(buf.len()));
        match state.reads.pop_front() {
            None | Some(ReadStep::Idle) => Ok(0),
            Some(ReadStep::Interrupted) => Err(HwError::Interrupted),
            Some(ReadStep::Fail) => Err(HwError::Usb("read failed".into())),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.reads.push_front(ReadStep::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn write_data(&mut self, buf: &[u8]) -> Result<usize, HwError> {
        let mut state = self.lock();
        state.calls.push(Call::Write(buf.to_vec()));
        let n = match state.writes.pop_front() {
            None => buf.len(),
            Some(WriteStep::Accept(n)) => n.min(buf.len()),
            Some(WriteStep::Interrupted) => return Err(HwError::Interrupted),
            Some(WriteStep::Fail) => return Err(HwError::Usb("write failed".into())),
        };
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn read_buffer_remaining(&self) -> usize {
        self.lock().backlog
    }
}
