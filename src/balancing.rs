//! Balancing intent derived from the voltage checks. Nothing is actuated
//! here; a discharge-control driver would consume the plan.

use crate::config::NUM_MODULES;
use crate::safety::{SafetyReport, Violations};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BalancingAction {
    #[default]
    Hold,
    /// Below the minimum: keep it out of any bleed and top it up first.
    ChargeMin,
    /// Above the maximum: bleed charge through the discharge switch.
    ReleaseCharge,
}

pub fn plan(report: &SafetyReport) -> [BalancingAction; NUM_MODULES] {
    core::array::from_fn(|module| {
        let violations = report.module_violations(module).unwrap_or_default();
        if violations.contains(Violations::UNDERVOLTAGE) {
            BalancingAction::ChargeMin
        } else if violations.contains(Violations::OVERVOLTAGE) {
            BalancingAction::ReleaseCharge
        } else {
            BalancingAction::Hold
        }
    })
}
