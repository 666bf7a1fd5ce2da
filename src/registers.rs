//! LTC6811 command codes, register groups and COMM nibble codes.

/// Data bytes of one register group for one board.
pub const REGISTER_BYTES: usize = 6;
/// Register group plus its PEC, as it travels on the wire.
pub const FRAME_BYTES: usize = REGISTER_BYTES + 2;
/// Cell voltages carried by one cell voltage register group.
pub const CELLS_PER_GROUP: usize = 3;

/// CFGR0: GPIO pull-downs off, reference powered between conversions.
pub const DEFAULT_CONFIG: [u8; REGISTER_BYTES] = [0xfc, 0x00, 0x00, 0x00, 0x00, 0x00];

/// ADC filter mode, the MD bits of the conversion commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcMode {
    Mode422Hz = 0,
    Mode27kHz = 1,
    Mode7kHz = 2,
    Mode26Hz = 3,
}

/// Auxiliary measurement inputs, the CHG bits of ADAX.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuxChannel {
    All = 0,
    Gpio1 = 1,
    Gpio2 = 2,
    Gpio3 = 3,
    Gpio4 = 4,
    Gpio5 = 5,
    SecondReference = 6,
}

/// Result register contents after CLRCELL or CLRAUX, until the next
/// conversion overwrites them.
pub const CLEARED_CODE: u16 = 0xffff;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// ADCV over all cells
    StartCellConversion { mode: AdcMode, discharge: bool },
    /// ADOW over all cells with the given current source direction
    StartOpenWire {
        mode: AdcMode,
        pull_up: bool,
        discharge: bool,
    },
    /// ADAX
    StartAuxConversion { mode: AdcMode, channel: AuxChannel },
    /// PLADC, SDO stays low until the running conversion completes
    PollConversion,
    /// STCOMM, shifts the COMM register out on the GPIO I2C master
    StartComm,
    ClearCells,
    ClearAux,
}

impl Command {
    pub const fn code(self) -> u16 {
        match self {
            Command::StartCellConversion { mode, discharge } => {
                0x260 | (mode as u16) << 7 | (discharge as u16) << 4
            }
            Command::StartOpenWire {
                mode,
                pull_up,
                discharge,
            } => 0x228 | (mode as u16) << 7 | (pull_up as u16) << 6 | (discharge as u16) << 4,
            Command::StartAuxConversion { mode, channel } => {
                0x460 | (mode as u16) << 7 | channel as u16
            }
            Command::PollConversion => 0x714,
            Command::StartComm => 0x723,
            Command::ClearCells => 0x711,
            Command::ClearAux => 0x712,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterGroup {
    Config,
    CellVoltageA,
    CellVoltageB,
    CellVoltageC,
    CellVoltageD,
    AuxA,
    AuxB,
    StatusA,
    StatusB,
    Comm,
}

pub const CELL_VOLTAGE_GROUPS: [RegisterGroup; 4] = [
    RegisterGroup::CellVoltageA,
    RegisterGroup::CellVoltageB,
    RegisterGroup::CellVoltageC,
    RegisterGroup::CellVoltageD,
];

impl RegisterGroup {
    pub const fn read_code(self) -> u16 {
        match self {
            RegisterGroup::Config => 0x002,
            RegisterGroup::CellVoltageA => 0x004,
            RegisterGroup::CellVoltageB => 0x006,
            RegisterGroup::CellVoltageC => 0x008,
            RegisterGroup::CellVoltageD => 0x00a,
            RegisterGroup::AuxA => 0x00c,
            RegisterGroup::AuxB => 0x00e,
            RegisterGroup::StatusA => 0x010,
            RegisterGroup::StatusB => 0x012,
            RegisterGroup::Comm => 0x722,
        }
    }

    /// Only the configuration and COMM groups are writable.
    pub const fn write_code(self) -> Option<u16> {
        match self {
            RegisterGroup::Config => Some(0x001),
            RegisterGroup::Comm => Some(0x721),
            _ => None,
        }
    }
}

/// Initial communication control nibbles of the COMM register.
pub mod icom {
    pub const BLANK: u8 = 0x0;
    pub const STOP: u8 = 0x1;
    pub const START: u8 = 0x6;
    pub const NO_TRANSMIT: u8 = 0x7;
}

/// Final communication control nibbles of the COMM register.
pub mod fcom {
    pub const ACK: u8 = 0x0;
    pub const NACK: u8 = 0x8;
    pub const NACK_STOP: u8 = 0x9;
}
