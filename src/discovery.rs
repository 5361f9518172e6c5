//! Cable discovery: which FTDI-based dive computer interface is attached.
//!
//! All these cables share the FTDI vendor id, so the product id is the only
//! hint. Candidates are probed strictly one after another: a failed claim
//! is not guaranteed to be side-effect free.

use log::{debug, error, info};

use crate::context::{FtdiContext, HwError};

/// Vendor id of FTDI.
pub const FTDI_VID: u16 = 0x0403;

/// A (vendor, product) pair tried during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Cables known to ship with this product id.
    pub label: &'static str,
}

impl Identity {
    pub const fn ftdi(product_id: u16, label: &'static str) -> Self {
        Self {
            vendor_id: FTDI_VID,
            product_id,
            label,
        }
    }
}

/// Parse a hexadecimal product id, with or without a `0x` prefix.
pub fn parse_product_id(text: &str) -> Option<u16> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u16::from_str_radix(digits, 16).ok()
}

/// Known dive computer interface cables, in probe order.
pub const CANDIDATES: [Identity; 7] = [
    Identity::ftdi(0x6001, "Suunto Smart Interface, Heinrichs Weikamp"),
    Identity::ftdi(0x6010, "Suunto Smart Interface, Heinrichs Weikamp"),
    Identity::ftdi(0x6011, "Suunto Smart Interface, Heinrichs Weikamp"),
    Identity::ftdi(0x6015, "Aqualung (possibly)"),
    Identity::ftdi(0xF460, "Oceanic"),
    Identity::ftdi(0xF680, "Suunto"),
    Identity::ftdi(0x87D0, "Cressi Leonardo"),
];

/// Claim the first candidate that is present.
///
/// Stops at the first candidate not reported as absent, whether its claim
/// succeeded or failed for another reason. When every candidate is absent
/// the last `NotFound` is returned.
pub fn claim_first<C: FtdiContext>(
    context: &mut C,
    vendor_id: u16,
    candidates: &[Identity],
) -> Result<Identity, HwError> {
    let mut last = HwError::NotFound;
    for candidate in candidates {
        let ret = context.usb_open(vendor_id, candidate.product_id);
        debug!(
            "FTDI tried VID {:04x} PID {:04x}: {:?}",
            vendor_id, candidate.product_id, ret
        );
        match ret {
            Ok(()) => {
                info!(
                    "Claimed FTDI cable {:04x}:{:04x} ({})",
                    vendor_id, candidate.product_id, candidate.label
                );
                return Ok(Identity {
                    vendor_id,
                    ..*candidate
                });
            }
            Err(HwError::NotFound) => last = HwError::NotFound,
            Err(e) => {
                error!(
                    "FTDI cable {:04x}:{:04x} present but unusable: {}",
                    vendor_id, candidate.product_id, e
                );
                return Err(e);
            }
        }
    }
    Err(last)
}

/// An attached candidate cable, as seen by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedCable {
    /// Serial port path of the kernel driver (e.g. `/dev/ttyUSB0`).
    pub port_name: String,
    pub identity: Identity,
    pub serial_number: Option<String>,
    pub product: Option<String>,
}

/// List attached candidate cables without claiming them.
///
/// Results follow probe order, so the first entry is the cable
/// [`FtdiTransport::open`](crate::FtdiTransport::open) would pick.
pub fn find_cables() -> Vec<AttachedCable> {
    let ports = serialport::available_ports().unwrap_or_else(|e| {
        error!("Failed to enumerate serial ports: {}", e);
        Vec::new()
    });

    let mut cables: Vec<(usize, AttachedCable)> = ports
        .into_iter()
        .filter_map(|port| {
            let serialport::SerialPortType::UsbPort(info) = port.port_type else {
                return None;
            };
            let rank = CANDIDATES
                .iter()
                .position(|c| c.vendor_id == info.vid && c.product_id == info.pid)?;
            debug!(
                "Found candidate {:04x}:{:04x} at {}",
                info.vid, info.pid, port.port_name
            );
            Some((
                rank,
                AttachedCable {
                    port_name: port.port_name,
                    identity: CANDIDATES[rank],
                    serial_number: info.serial_number,
                    product: info.product,
                },
            ))
        })
        .collect();
    cables.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.port_name.cmp(&b.1.port_name)));
    cables.into_iter().map(|(_, cable)| cable).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockContext};

    #[test]
    fn candidate_list_order() {
        let pids: Vec<u16> = CANDIDATES.iter().map(|c| c.product_id).collect();
        assert_eq!(
            pids,
            vec![0x6001, 0x6010, 0x6011, 0x6015, 0xF460, 0xF680, 0x87D0]
        );
        assert!(CANDIDATES.iter().all(|c| c.vendor_id == FTDI_VID));
    }

    #[test]
    fn first_present_candidate_wins() {
        let mut mock = MockContext::new().with_present(&[0xF460, 0x6011]);
        let picked = claim_first(&mut mock, FTDI_VID, &CANDIDATES).unwrap();
        assert_eq!(picked.product_id, 0x6011);

        let opens: Vec<Call> = mock
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::UsbOpen { .. }))
            .collect();
        assert_eq!(opens.len(), 3);
    }

    #[test]
    fn present_but_failing_candidate_stops_the_scan() {
        let mut mock = MockContext::new()
            .with_present(&[0x6010, 0x6011])
            .with_claim_error(0x6010, HwError::Usb("access denied".into()));
        let err = claim_first(&mut mock, FTDI_VID, &CANDIDATES).unwrap_err();
        assert_eq!(err, HwError::Usb("access denied".into()));
        assert_eq!(
            mock.calls().last(),
            Some(&Call::UsbOpen {
                vendor_id: FTDI_VID,
                product_id: 0x6010
            })
        );
    }

    #[test]
    fn nothing_attached() {
        let mut mock = MockContext::new();
        let err = claim_first(&mut mock, FTDI_VID, &CANDIDATES).unwrap_err();
        assert_eq!(err, HwError::NotFound);
        assert_eq!(mock.calls().len(), CANDIDATES.len());
    }

    #[test]
    fn empty_candidate_list() {
        let mut mock = MockContext::new().with_present(&[0x6001]);
        assert_eq!(
            claim_first(&mut mock, FTDI_VID, &[]).unwrap_err(),
            HwError::NotFound
        );
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn product_ids_parse_with_or_without_prefix() {
        assert_eq!(parse_product_id("6015"), Some(0x6015));
        assert_eq!(parse_product_id("0x6015"), Some(0x6015));
        assert_eq!(parse_product_id(" 0XF460 "), Some(0xF460));
        assert_eq!(parse_product_id("87d0"), Some(0x87D0));
        assert_eq!(parse_product_id("0x"), None);
        assert_eq!(parse_product_id("10000"), None);
        assert_eq!(parse_product_id("ftdi"), None);
    }

    #[test]
    fn found_cables_follow_probe_order() {
        // Whatever is plugged in, results are candidates in rank order.
        let ranks: Vec<usize> = find_cables()
            .iter()
            .map(|cable| {
                CANDIDATES
                    .iter()
                    .position(|c| *c == cable.identity)
                    .expect("cable is not a candidate")
            })
            .collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "{ranks:?}");
    }
}
