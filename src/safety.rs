//! Pack safety evaluation.
//!
//! [`evaluate`] is a pure function of one cycle's readings, the current
//! sample and the limits. It never looks at previous cycles.

use bitflags::bitflags;

use crate::config::{Limits, NUM_MODULES};
use crate::fault_log::FaultCategory;
use crate::telemetry::{ModuleReading, PackReadings};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeState {
    Charging,
    Discharging,
}

/// Pack current, positive while charging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentSample {
    pub milliamps: i32,
    pub charge_state: ChargeState,
}

impl CurrentSample {
    pub const fn from_milliamps(milliamps: i32) -> Self {
        let charge_state = if milliamps > 0 {
            ChargeState::Charging
        } else {
            ChargeState::Discharging
        };
        Self {
            milliamps,
            charge_state,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    #[default]
    Safe,
    Overvoltage,
    Undervoltage,
    OverTemperature,
    OverCurrent,
    /// Data from the module cannot be trusted, or a sense wire is open.
    Danger,
}

impl Verdict {
    pub const fn severity(self) -> u8 {
        match self {
            Verdict::Safe => 0,
            Verdict::OverCurrent => 1,
            Verdict::OverTemperature => 2,
            Verdict::Danger => 3,
            Verdict::Undervoltage | Verdict::Overvoltage => 4,
        }
    }

    pub const fn is_safe(self) -> bool {
        matches!(self, Verdict::Safe)
    }

    /// Undervoltage and overvoltage recalibrate the SoC estimate.
    pub const fn is_voltage(self) -> bool {
        matches!(self, Verdict::Undervoltage | Verdict::Overvoltage)
    }

    fn worse_than(self, other: Verdict) -> bool {
        self.severity() > other.severity()
    }
}

bitflags! {
    /// Every limit a module breaches in one cycle.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Violations: u8 {
        const UNDERVOLTAGE = 1 << 0;
        const OVERVOLTAGE = 1 << 1;
        const OVER_TEMPERATURE = 1 << 2;
        const DANGER = 1 << 3;
        /// Pack wide, only ever set by [`SafetyReport::pack_violations`].
        const OVER_CURRENT = 1 << 4;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Violations {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Violations({=u8:#x})", self.bits())
    }
}

impl Violations {
    /// The one verdict reported for the module.
    pub fn verdict(self) -> Verdict {
        if self.contains(Violations::UNDERVOLTAGE) {
            Verdict::Undervoltage
        } else if self.contains(Violations::OVERVOLTAGE) {
            Verdict::Overvoltage
        } else if self.contains(Violations::DANGER) {
            Verdict::Danger
        } else if self.contains(Violations::OVER_TEMPERATURE) {
            Verdict::OverTemperature
        } else {
            Verdict::Safe
        }
    }
}

/// Module flag that places a module in a category's danger set. Categories
/// that are not tracked per module have none.
const fn category_flag(category: FaultCategory) -> Option<Violations> {
    match category {
        FaultCategory::HighTemperature => Some(Violations::OVER_TEMPERATURE),
        FaultCategory::HighVoltage => Some(Violations::OVERVOLTAGE),
        FaultCategory::LowVoltage => Some(Violations::UNDERVOLTAGE),
        FaultCategory::VoltageMisc => Some(Violations::DANGER),
        FaultCategory::HighCurrent | FaultCategory::Watchdog | FaultCategory::CanBus => None,
    }
}

/// Result of one evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SafetyReport {
    modules: [Violations; NUM_MODULES],
    current: Option<CurrentSample>,
    over_current: bool,
}

impl SafetyReport {
    pub const fn clean() -> Self {
        Self {
            modules: [Violations::empty(); NUM_MODULES],
            current: None,
            over_current: false,
        }
    }

    /// Worst verdict across the pack. On equal severity the lowest module
    /// wins; the current check comes after every module.
    pub fn aggregate(&self) -> Verdict {
        let mut worst = Verdict::Safe;
        for violations in &self.modules {
            let verdict = violations.verdict();
            if verdict.worse_than(worst) {
                worst = verdict;
            }
        }
        if self.over_current && Verdict::OverCurrent.worse_than(worst) {
            worst = Verdict::OverCurrent;
        }
        worst
    }

    pub fn module_verdict(&self, module: usize) -> Option<Verdict> {
        self.modules.get(module).map(|v| v.verdict())
    }

    pub fn module_violations(&self, module: usize) -> Option<Violations> {
        self.modules.get(module).copied()
    }

    pub fn verdicts(&self) -> [Verdict; NUM_MODULES] {
        self.modules.map(Violations::verdict)
    }

    /// Danger set of a category, indexed by module. Current faults are pack
    /// wide and never flag a module.
    pub fn modules_in_danger(&self, category: FaultCategory) -> [bool; NUM_MODULES] {
        match category_flag(category) {
            Some(flag) => self.modules.map(|v| v.contains(flag)),
            None => [false; NUM_MODULES],
        }
    }

    pub fn over_current(&self) -> bool {
        self.over_current
    }

    pub fn current(&self) -> Option<CurrentSample> {
        self.current
    }

    pub fn charge_state(&self) -> Option<ChargeState> {
        self.current.map(|c| c.charge_state)
    }

    /// Union of every module's violations, plus the current check.
    pub fn pack_violations(&self) -> Violations {
        let mut violations = self
            .modules
            .iter()
            .fold(Violations::empty(), |acc, &v| acc | v);
        violations.set(Violations::OVER_CURRENT, self.over_current);
        violations
    }

    /// Categories in violation, in logging order.
    pub fn violated_categories(&self) -> impl Iterator<Item = FaultCategory> + '_ {
        const ORDER: [FaultCategory; 5] = [
            FaultCategory::HighTemperature,
            FaultCategory::HighVoltage,
            FaultCategory::LowVoltage,
            FaultCategory::HighCurrent,
            FaultCategory::VoltageMisc,
        ];
        ORDER.into_iter().filter(move |&category| match category_flag(category) {
            Some(flag) => self.modules.iter().any(|v| v.contains(flag)),
            None => self.over_current,
        })
    }

    /// Whether the contactor may stay closed. The override only forgives
    /// undervoltage; every other violation still counts.
    pub fn is_safe_with_override(&self, undervoltage_override: bool) -> bool {
        let mut tolerated = Violations::empty();
        if undervoltage_override {
            tolerated |= Violations::UNDERVOLTAGE;
        }
        !self.over_current && self.modules.iter().all(|v| v.difference(tolerated).is_empty())
    }
}

fn check_module(reading: &ModuleReading, max_temperature_mc: i32, limits: &Limits) -> Violations {
    let mut violations = Violations::empty();

    // Untrusted voltage data says nothing about the limits, so skip them
    if reading.voltage_fault.is_some() || reading.open_wire {
        violations |= Violations::DANGER;
    } else if reading.voltage_mv < limits.min_voltage_mv {
        violations |= Violations::UNDERVOLTAGE;
    } else if reading.voltage_mv > limits.max_voltage_mv {
        violations |= Violations::OVERVOLTAGE;
    }

    if reading.temperature_fault.is_some() {
        violations |= Violations::DANGER;
    } else if reading.temperatures_mc.iter().any(|&t| t > max_temperature_mc) {
        violations |= Violations::OVER_TEMPERATURE;
    }

    violations
}

/// Evaluates one cycle. `current` is `None` when the current sensor failed,
/// which counts as an over-current condition.
pub fn evaluate(
    readings: &PackReadings,
    current: Option<CurrentSample>,
    limits: &Limits,
) -> SafetyReport {
    let max_temperature_mc = limits.max_temperature_mc(current.map(|c| c.charge_state));
    let modules = readings.each_ref().map(|r| check_module(r, max_temperature_mc, limits));
    let over_current = match current {
        Some(sample) => sample.milliamps.unsigned_abs() > limits.max_current_ma.unsigned_abs(),
        None => true,
    };

    SafetyReport {
        modules,
        current,
        over_current,
    }
}
