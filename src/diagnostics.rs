//! Answers diagnostic requests from a published snapshot.
//!
//! Queries never touch the monitor. Operator actions come back as
//! [`Reply::Operator`] for the caller to forward to the monitor task.

use shared_types::{
    DiagnosticError, DiagnosticRequest, DiagnosticResponse, FAULT_DATA_BYTES, FaultCode,
    PackVerdict,
};

use crate::config::{NUM_BOARDS, TEMP_SENSORS_PER_BOARD};
use crate::fault_log::FaultCategory;
use crate::safety::{ChargeState, Verdict};
use crate::snapshot::PackSnapshot;

impl From<Verdict> for PackVerdict {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Safe => PackVerdict::Safe,
            Verdict::Overvoltage => PackVerdict::Overvoltage,
            Verdict::Undervoltage => PackVerdict::Undervoltage,
            Verdict::OverTemperature => PackVerdict::OverTemperature,
            Verdict::OverCurrent => PackVerdict::OverCurrent,
            Verdict::Danger => PackVerdict::Danger,
        }
    }
}

impl From<FaultCategory> for FaultCode {
    fn from(category: FaultCategory) -> Self {
        match category {
            FaultCategory::HighTemperature => FaultCode::HighTemperature,
            FaultCategory::HighVoltage => FaultCode::HighVoltage,
            FaultCategory::LowVoltage => FaultCode::LowVoltage,
            FaultCategory::VoltageMisc => FaultCode::VoltageMisc,
            FaultCategory::HighCurrent => FaultCode::HighCurrent,
            FaultCategory::Watchdog => FaultCode::Watchdog,
            FaultCategory::CanBus => FaultCode::CanBus,
        }
    }
}

impl From<FaultCode> for FaultCategory {
    fn from(code: FaultCode) -> Self {
        match code {
            FaultCode::HighTemperature => FaultCategory::HighTemperature,
            FaultCode::HighVoltage => FaultCategory::HighVoltage,
            FaultCode::LowVoltage => FaultCategory::LowVoltage,
            FaultCode::VoltageMisc => FaultCategory::VoltageMisc,
            FaultCode::HighCurrent => FaultCategory::HighCurrent,
            FaultCode::Watchdog => FaultCategory::Watchdog,
            FaultCode::CanBus => FaultCategory::CanBus,
        }
    }
}

/// Requests that change monitor state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorRequest {
    ResetFaultLog,
    SetStateOfCharge(u16),
    SetUndervoltageOverride(bool),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    Respond(DiagnosticResponse),
    /// Forward to the monitor, then answer `Accepted`.
    Operator(OperatorRequest),
}

pub const REPLAY_CACHE_ENTRIES: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CachedEntry {
    category: FaultCategory,
    data_len: u16,
    data: [u8; FAULT_DATA_BYTES],
}

/// Fault-log replay captured by the monitor task, so log entries can be
/// served without touching the EEPROM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayCache {
    entries: [Option<CachedEntry>; REPLAY_CACHE_ENTRIES],
    len: usize,
}

impl ReplayCache {
    pub const fn new() -> Self {
        Self {
            entries: [None; REPLAY_CACHE_ENTRIES],
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Keeps the first `FAULT_DATA_BYTES` of `data`. Entries past the
    /// cache size are dropped.
    pub fn push(&mut self, category: FaultCategory, data: &[u8]) {
        let Some(slot) = self.entries.get_mut(self.len) else {
            return;
        };
        let mut kept = [0u8; FAULT_DATA_BYTES];
        let n = data.len().min(FAULT_DATA_BYTES);
        kept[..n].copy_from_slice(&data[..n]);
        *slot = Some(CachedEntry {
            category,
            data_len: data.len().min(u16::MAX as usize) as u16,
            data: kept,
        });
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn entry(&self, index: usize) -> Option<&CachedEntry> {
        self.entries.get(index)?.as_ref()
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

fn error(error: DiagnosticError) -> Reply {
    Reply::Respond(DiagnosticResponse::Error { error })
}

pub fn respond(request: &DiagnosticRequest, snapshot: &PackSnapshot, cache: &ReplayCache) -> Reply {
    let response = match *request {
        DiagnosticRequest::ModuleVoltage { module } => match snapshot.module_voltage(module as usize) {
            Some(millivolts) => DiagnosticResponse::ModuleVoltage { module, millivolts },
            None => return error(DiagnosticError::UnknownModule),
        },
        DiagnosticRequest::ModuleTemperature { module } => {
            match snapshot.module_temperature(module as usize) {
                Some(millicelsius) => DiagnosticResponse::ModuleTemperature {
                    module,
                    millicelsius,
                },
                None => return error(DiagnosticError::UnknownModule),
            }
        }
        DiagnosticRequest::SensorTemperature { board, sensor } => {
            if board as usize >= NUM_BOARDS || sensor as usize >= TEMP_SENSORS_PER_BOARD {
                return error(DiagnosticError::UnknownSensor);
            }
            match snapshot.sensor_temperature(board as usize, sensor as usize) {
                Some(millicelsius) => DiagnosticResponse::SensorTemperature {
                    board,
                    sensor,
                    millicelsius,
                },
                None => return error(DiagnosticError::UnknownSensor),
            }
        }
        DiagnosticRequest::PackSummary => DiagnosticResponse::PackSummary {
            total_voltage_mv: snapshot.total_voltage_mv(),
            average_temperature_mc: snapshot.average_temperature_mc(),
            max_temperature_mc: snapshot.max_temperature_mc(),
            current_ma: snapshot.current_ma().unwrap_or(0),
            charging: snapshot.charge_state() == Some(ChargeState::Charging),
            soc_hundredths: snapshot.soc(),
            verdict: snapshot.verdict().into(),
            contactor_closed: snapshot.contactor_closed(),
            cycle: snapshot.cycle(),
        },
        DiagnosticRequest::DangerSet { category } => DiagnosticResponse::DangerSet {
            category,
            modules: snapshot.danger_mask(category.into()),
        },
        DiagnosticRequest::FaultLogEntry { index } => match cache.entry(index as usize) {
            Some(entry) => DiagnosticResponse::FaultLogEntry {
                index,
                category: entry.category.into(),
                data_len: entry.data_len,
                data: entry.data,
            },
            None => return error(DiagnosticError::NoSuchEntry),
        },
        DiagnosticRequest::ResetFaultLog => {
            return Reply::Operator(OperatorRequest::ResetFaultLog);
        }
        DiagnosticRequest::SetStateOfCharge { hundredths_percent } => {
            return Reply::Operator(OperatorRequest::SetStateOfCharge(hundredths_percent));
        }
        DiagnosticRequest::SetUndervoltageOverride { enabled } => {
            return Reply::Operator(OperatorRequest::SetUndervoltageOverride(enabled));
        }
    };
    Reply::Respond(response)
}
