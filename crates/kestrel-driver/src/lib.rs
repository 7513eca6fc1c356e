//! Peripheral-control and transport-session core for Kestrel SDR motherboards.
//!
//! This crate owns the authoritative state of the board's clock/time
//! distribution tree, decodes the FPGA's memory-mapped register protocol,
//! hands out transport endpoints to client sessions, and mirrors hardware
//! lock state onto the back-panel indicators.
//!
//! # Architecture
//!
//! ```text
//! Board (bring-up sequencer, session surface)
//!  ├─ MbRegs        — scoped access to the FPGA register block (UIO)
//!  ├─ GpioExpander  — clock-select / power-enable pins, per-revision tables
//!  ├─ ClockingControl — clock/time source state machine
//!  ├─ EndpointPool  — transport source-endpoint allocation
//!  ├─ StatusMonitor — background GPS/REF indicator sampling
//!  └─ Transport managers — UDP (remote) / DMA (local) session flows
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use kestrel_driver::Board;
//! use std::collections::HashMap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut opts = HashMap::new();
//! opts.insert("clock_source".to_string(), "gpsdo".to_string());
//!
//! let board = Board::discover(3, &opts)?;
//! println!("{:?}", board.device_info()?);
//! println!("ref clock: {} MHz", board.ref_clock_freq()? / 1e6);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod board;
mod clocking;
mod endpoint;
mod error;
pub mod gpio;
mod monitor;
pub mod regmap;
pub mod sensors;
pub mod transport;

#[cfg(test)]
mod testhw;

pub use board::{Board, BoardHardware, DeviceArgs, DeviceInfo, InitState, MBOARD_REGS_LABEL};
pub use clocking::{
    ClockSource, ClockingControl, Daughterboard, RefClockConsumer, TimeSource,
    GPSDO_REF_CLOCK_FREQ, INTERNAL_REF_CLOCK_FREQ, VALID_EXT_CLOCK_FREQS,
};
pub use endpoint::{EndpointPool, Sid};
pub use error::{Error, Result};
pub use monitor::{StatusMonitor, StatusSources, MONITOR_INTERVAL};
pub use regmap::{check_compat, MbRegs, RegisterBackend, RegisterWindow, UioRegisters};
pub use sensors::{GpsClient, GpsdClient, SensorKind, SensorValue};
pub use transport::{
    ConnectionKind, TransportHandle, TransportInfo, TransportKind, TransportManager,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Board, BoardHardware, ClockSource, ConnectionKind, DeviceArgs, Error, InitState, Result,
        SensorValue, Sid, TimeSource, TransportKind,
    };
}
