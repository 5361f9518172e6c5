//! Transport tunables.

use std::time::Duration;

use crate::discovery::{Identity, CANDIDATES, FTDI_VID};

/// Settings used by [`FtdiTransport::open`](crate::FtdiTransport::open).
///
/// ```
/// use std::time::Duration;
/// use ftdi_iostream::TransportConfig;
///
/// let config = TransportConfig::default()
///     .with_blocking_read_limit(Duration::from_secs(5))
///     .with_write_retry_budget(100);
/// assert_eq!(config.vendor_id, 0x0403);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Vendor id probed during discovery.
    pub vendor_id: u16,
    /// Cables tried in order; the first one present wins.
    pub candidates: Vec<Identity>,
    /// Read deadline used while the handle is in blocking mode.
    pub blocking_read_limit: Duration,
    /// Pause between polls when the chip has no data.
    pub poll_interval: Duration,
    /// Interrupted write transfers tolerated per `write` call.
    pub write_retry_budget: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            vendor_id: FTDI_VID,
            candidates: CANDIDATES.to_vec(),
            blocking_read_limit: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1),
            write_retry_budget: 1000,
        }
    }
}

impl TransportConfig {
    /// Probe only the given cables, in the given order.
    pub fn with_candidates(mut self, candidates: Vec<Identity>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_blocking_read_limit(mut self, limit: Duration) -> Self {
        self.blocking_read_limit = limit;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_write_retry_budget(mut self, budget: u32) -> Self {
        self.write_retry_budget = budget;
        self
    }
}
