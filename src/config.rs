//! Compile-time pack topology, safety limits and persistent layout.

use crate::safety::ChargeState;

// Pack topology

pub const NUM_BOARDS: usize = 4; // LTC6811 front ends in the daisy chain
pub const CELL_CHANNELS_PER_BOARD: usize = 12; // cell inputs of one LTC6811
pub const MODULES_PER_BOARD: usize = 8; // cell inputs actually wired per board
pub const NUM_MODULES: usize = 31; // the last board is partially populated

pub const MUX_CHANNELS: usize = 8; // inputs of one LTC1380 mux
pub const MUXES_PER_BOARD: usize = 2;
pub const TEMP_SENSORS_PER_BOARD: usize = MUX_CHANNELS * MUXES_PER_BOARD;
pub const MAX_TEMP_SENSORS_PER_BOARD: usize = 20; // hardware ceiling of a board
pub const SENSORS_PER_MODULE: usize = 2;

const _: () = assert!(NUM_MODULES <= NUM_BOARDS * MODULES_PER_BOARD);
const _: () = assert!(MODULES_PER_BOARD <= MUX_CHANNELS);
const _: () = assert!(MODULES_PER_BOARD <= CELL_CHANNELS_PER_BOARD);
const _: () = assert!(TEMP_SENSORS_PER_BOARD <= MAX_TEMP_SENSORS_PER_BOARD);
// Danger sets travel as a u32 bitmask and module ids as a single log byte
const _: () = assert!(NUM_MODULES <= 32);

// Acquisition

pub const ADC_POLL_RETRIES: u32 = 64;
pub const ADC_POLL_INTERVAL_US: u32 = 250;
pub const OPEN_WIRE_CONVERSIONS: usize = 2; // ADOW passes per bias direction
pub const OPEN_WIRE_THRESHOLD: i32 = -4000; // 100 uV codes, i.e. -400 mV

// State of charge

pub const MAX_CHARGE_MAH: i64 = 100_000; // 100 Ah pack capacity
pub const SOC_FULL: u16 = 10_000; // 100.00 %
pub const SOC_DEFAULT: u16 = SOC_FULL; // used when nothing valid is persisted
pub const SOC_PERSIST_STEP: u16 = 100; // rewrite the record after every 1.00 % of drift

// Persistent store layout (M24128, 16 KiB)

pub const EEPROM_SIZE: usize = 16 * 1024;

pub const FAULT_CODE_BASE: u16 = 0x0000;
pub const TEMPERATURE_LOG_BASE: u16 = 0x0100;
pub const VOLTAGE_LOG_BASE: u16 = 0x0400;
pub const CURRENT_LOG_BASE: u16 = 0x0600;
pub const WATCHDOG_LOG_BASE: u16 = 0x0700;
pub const CAN_LOG_BASE: u16 = 0x0800;
pub const CAN_LOG_END: u16 = 0x0900;

pub const LOG_POINTER_TABLE: u16 = 0x3f00; // six little-endian u16 pointers
pub const SOC_ADDR: u16 = 0x3f10; // little-endian u16, 0.01 % units
pub const LOG_TERMINATOR: u8 = 0xff; // erased EEPROM reads as an empty log

/// Safety limits applied by the evaluator, in fixed-point units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Limits {
    pub min_voltage_mv: u16,
    pub max_voltage_mv: u16,
    pub max_charge_temperature_mc: i32,
    pub max_discharge_temperature_mc: i32,
    pub max_current_ma: i32,
}

impl Limits {
    pub const DEFAULT: Limits = Limits {
        min_voltage_mv: 2700,
        max_voltage_mv: 4000,
        max_charge_temperature_mc: 48_000,
        max_discharge_temperature_mc: 73_000,
        max_current_ma: 450_000,
    };

    /// Temperature ceiling for the given charge state. Without a charge state
    /// the tighter of the two applies.
    pub fn max_temperature_mc(&self, charge_state: Option<ChargeState>) -> i32 {
        match charge_state {
            Some(ChargeState::Charging) => self.max_charge_temperature_mc,
            Some(ChargeState::Discharging) => self.max_discharge_temperature_mc,
            None => self
                .max_charge_temperature_mc
                .min(self.max_discharge_temperature_mc),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::DEFAULT
    }
}
