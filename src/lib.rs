//! Protection core of the BeVolt battery management unit.
//!
//! The crate acquires cell voltages and temperatures from a daisy chain of
//! LTC6811 front ends, evaluates the pack against its limits, integrates state
//! of charge and sequences the contactor and the persistent fault log. All
//! hardware is reached through the traits in [`board_link`], [`fault_log`],
//! [`soc`] and [`monitor`], so everything here runs on the host as well.

#![no_std]
#![allow(async_fn_in_trait)]

#[cfg(test)]
extern crate std;

pub(crate) mod fmt;

pub mod balancing;
pub mod board_link;
pub mod config;
pub mod diagnostics;
pub mod eeprom;
pub mod fault_log;
pub mod monitor;
pub mod pec;
pub mod registers;
pub mod safety;
pub mod snapshot;
pub mod soc;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use board_link::{BoardLink, Ltc6811Link};
pub use config::Limits;
pub use fault_log::{FaultCategory, FaultLog, PersistentStore};
pub use monitor::{Contactor, CurrentSensor, CycleOutcome, Indication, Indicator, Monitor, Watchdog};
pub use safety::{ChargeState, CurrentSample, SafetyReport, Verdict};
pub use snapshot::PackSnapshot;
pub use soc::{SocEstimator, TickSource};
