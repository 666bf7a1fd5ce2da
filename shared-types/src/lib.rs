#![no_std]

use serde::{Deserialize, Serialize};

#[cfg(feature = "bindgen")]
use postcard_bindgen::PostcardBindings;

/// Number of data bytes carried by a single fault log entry response.
pub const FAULT_DATA_BYTES: usize = 8;

// Requests sent by the host over the diagnostics interface. Query variants are
// answered from the latest published pack snapshot; the last three are
// operator actions forwarded to the monitor task.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindgen", derive(PostcardBindings))]
pub enum DiagnosticRequest {
    ModuleVoltage { module: u8 },
    ModuleTemperature { module: u8 },
    SensorTemperature { board: u8, sensor: u8 },
    PackSummary,
    DangerSet { category: FaultCode },
    FaultLogEntry { index: u8 },

    // Operator actions
    ResetFaultLog,
    SetStateOfCharge { hundredths_percent: u16 },
    SetUndervoltageOverride { enabled: bool },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindgen", derive(PostcardBindings))]
pub enum DiagnosticResponse {
    ModuleVoltage {
        module: u8,
        millivolts: u16,
    },
    ModuleTemperature {
        module: u8,
        millicelsius: i32,
    },
    SensorTemperature {
        board: u8,
        sensor: u8,
        millicelsius: i32,
    },
    PackSummary {
        total_voltage_mv: u32,
        average_temperature_mc: i32,
        max_temperature_mc: i32,
        current_ma: i32,
        charging: bool,
        soc_hundredths: u16,
        verdict: PackVerdict,
        contactor_closed: bool,
        cycle: u32,
    },
    // Bit N is set when module N is in the danger set of the category
    DangerSet {
        category: FaultCode,
        modules: u32,
    },
    FaultLogEntry {
        index: u8,
        category: FaultCode,
        data_len: u16,
        data: [u8; FAULT_DATA_BYTES],
    },
    Accepted,
    Error {
        error: DiagnosticError,
    },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindgen", derive(PostcardBindings))]
pub enum PackVerdict {
    Safe,
    Overvoltage,
    Undervoltage,
    OverTemperature,
    OverCurrent,
    Danger,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindgen", derive(PostcardBindings))]
pub enum FaultCode {
    HighTemperature,
    HighVoltage,
    LowVoltage,
    VoltageMisc,
    HighCurrent,
    Watchdog,
    CanBus,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "bindgen", derive(PostcardBindings))]
pub enum DiagnosticError {
    UnknownModule,
    UnknownSensor,
    NoSuchEntry,
    Malformed,
    Busy,
}
