//! Whole-cycle view published to diagnostic consumers.
//!
//! Consumers get a copy, never a reference into the monitor's working state.

use crate::config::NUM_MODULES;
use crate::fault_log::FaultCategory;
use crate::safety::{ChargeState, SafetyReport, Verdict};
use crate::telemetry::topology;
use crate::telemetry::{ModuleReading, PackReadings};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackSnapshot {
    readings: PackReadings,
    report: SafetyReport,
    soc: u16,
    contactor_closed: bool,
    cycle: u32,
}

impl PackSnapshot {
    /// Published before the first cycle completes.
    pub const EMPTY: PackSnapshot = PackSnapshot {
        readings: [ModuleReading::EMPTY; NUM_MODULES],
        report: SafetyReport::clean(),
        soc: 0,
        contactor_closed: false,
        cycle: 0,
    };

    pub fn capture(
        readings: PackReadings,
        report: SafetyReport,
        soc: u16,
        contactor_closed: bool,
        cycle: u32,
    ) -> Self {
        Self {
            readings,
            report,
            soc,
            contactor_closed,
            cycle,
        }
    }

    pub fn module(&self, module: usize) -> Option<&ModuleReading> {
        self.readings.get(module)
    }

    pub fn module_voltage(&self, module: usize) -> Option<u16> {
        self.module(module).map(|m| m.voltage_mv)
    }

    /// Average of the module's two sensors.
    pub fn module_temperature(&self, module: usize) -> Option<i32> {
        self.module(module).map(ModuleReading::average_temperature_mc)
    }

    /// Sensors on channels with no module behind them read `None`.
    pub fn sensor_temperature(&self, board: usize, sensor: usize) -> Option<i32> {
        let (module, slot) = topology::sensor_owner(board, sensor)?;
        Some(self.readings[module].temperatures_mc[slot])
    }

    pub fn total_voltage_mv(&self) -> u32 {
        self.readings.iter().map(|m| m.voltage_mv as u32).sum()
    }

    pub fn average_temperature_mc(&self) -> i32 {
        let sum: i64 = self
            .readings
            .iter()
            .map(|m| m.average_temperature_mc() as i64)
            .sum();
        (sum / NUM_MODULES as i64) as i32
    }

    pub fn max_temperature_mc(&self) -> i32 {
        self.readings
            .iter()
            .flat_map(|m| m.temperatures_mc)
            .max()
            .unwrap_or(0)
    }

    /// `None` when the current sensor failed this cycle.
    pub fn current_ma(&self) -> Option<i32> {
        self.report.current().map(|c| c.milliamps)
    }

    pub fn charge_state(&self) -> Option<ChargeState> {
        self.report.charge_state()
    }

    pub fn soc(&self) -> u16 {
        self.soc
    }

    pub fn verdict(&self) -> Verdict {
        self.report.aggregate()
    }

    pub fn module_verdict(&self, module: usize) -> Option<Verdict> {
        self.report.module_verdict(module)
    }

    pub fn modules_in_danger(&self, category: FaultCategory) -> [bool; NUM_MODULES] {
        self.report.modules_in_danger(category)
    }

    /// Danger set packed as a bitmask, bit `m` for module `m`.
    pub fn danger_mask(&self, category: FaultCategory) -> u32 {
        let set = self.modules_in_danger(category);
        (0..NUM_MODULES)
            .filter(|&module| set[module])
            .fold(0, |mask, module| mask | 1 << module)
    }

    pub fn report(&self) -> &SafetyReport {
        &self.report
    }

    pub fn contactor_closed(&self) -> bool {
        self.contactor_closed
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub(crate) fn set_contactor_closed(&mut self, closed: bool) {
        self.contactor_closed = closed;
    }

    pub(crate) fn set_soc(&mut self, soc: u16) {
        self.soc = soc;
    }
}

impl Default for PackSnapshot {
    fn default() -> Self {
        Self::EMPTY
    }
}
