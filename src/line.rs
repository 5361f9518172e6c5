//! Mapping of host line settings onto chip enumerations.
//!
//! Everything is validated here before the transport touches the
//! hardware, so a rejected setting never leaves the chip half configured.

use crate::context::{ChipBits, ChipFlowControl, ChipParity, ChipStopBits, LineProperty};
use crate::types::*;
use crate::{Result, Status};

/// A validated configuration, in both host and chip terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipSettings {
    pub line: LineProperty,
    pub flow: ChipFlowControl,
    pub config: LineConfig,
}

pub fn map_data_bits(data_bits: u32) -> Result<(DataBits, ChipBits)> {
    match data_bits {
        7 => Ok((DataBits::Seven, ChipBits::Bits7)),
        8 => Ok((DataBits::Eight, ChipBits::Bits8)),
        n => Err(Status::InvalidArgument(format!(
            "{n} data bits not supported"
        ))),
    }
}

pub fn map_parity(parity: Parity) -> Result<ChipParity> {
    match parity {
        Parity::None => Ok(ChipParity::None),
        Parity::Odd => Ok(ChipParity::Odd),
        Parity::Even => Ok(ChipParity::Even),
        Parity::Mark | Parity::Space => Err(Status::InvalidArgument(format!(
            "{parity:?} parity not supported"
        ))),
    }
}

pub fn map_stop_bits(stop_bits: StopBits) -> Result<ChipStopBits> {
    match stop_bits {
        StopBits::One => Ok(ChipStopBits::One),
        StopBits::Two => Ok(ChipStopBits::Two),
        StopBits::OnePointFive => Err(Status::InvalidArgument(
            "1.5 stop bits not supported".into(),
        )),
    }
}

pub fn map_flow_control(flow: FlowControl) -> ChipFlowControl {
    match flow {
        FlowControl::None => ChipFlowControl::Disabled,
        FlowControl::Hardware => ChipFlowControl::RtsCts,
        FlowControl::Software => ChipFlowControl::XonXoff,
    }
}

/// Validate a full set of line settings.
pub fn map_settings(
    baud_rate: u32,
    data_bits: u32,
    parity: Parity,
    stop_bits: StopBits,
    flow_control: FlowControl,
) -> Result<ChipSettings> {
    if baud_rate == 0 {
        return Err(Status::InvalidArgument("baud rate must be > 0".into()));
    }
    let (data_bits, bits) = map_data_bits(data_bits)?;
    let chip_parity = map_parity(parity)?;
    let chip_stop = map_stop_bits(stop_bits)?;

    Ok(ChipSettings {
        line: LineProperty {
            bits,
            stop_bits: chip_stop,
            parity: chip_parity,
        },
        flow: map_flow_control(flow_control),
        config: LineConfig {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
            flow_control,
        },
    })
}

/// Chip line property for an already applied configuration.
///
/// A stored configuration has passed [`map_settings`], so unsupported
/// values cannot occur; they fall back to the chip default for safety.
pub fn line_property_of(config: Option<&LineConfig>) -> LineProperty {
    let Some(config) = config else {
        return LineProperty::DEFAULT;
    };
    LineProperty {
        bits: match config.data_bits {
            DataBits::Seven => ChipBits::Bits7,
            DataBits::Eight => ChipBits::Bits8,
        },
        stop_bits: map_stop_bits(config.stop_bits).unwrap_or(ChipStopBits::One),
        parity: map_parity(config.parity).unwrap_or(ChipParity::None),
    }
}
