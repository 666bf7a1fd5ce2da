//! Cell voltage and temperature acquisition over the board chain.
//!
//! One call to [`Telemetry::refresh`] runs a cell conversion, an open-wire
//! check and a full temperature sweep. The sweep visits every sensor channel
//! in turn and each visit costs seven chain-wide link transactions (two COMM
//! writes with their STCOMM, the CLRAUX, the ADAX start and the readback)
//! plus the ADC poll, so its latency grows with `TEMP_SENSORS_PER_BOARD`
//! times the chain length.
//!
//! Result registers are cleared before every conversion. A board that misses
//! the start command then reads back all ones instead of the last cycle's
//! values.
//!
//! Problems are absorbed here and reported in-band on each module reading.
//! A failed PEC only taints the board that sent it; a conversion that never
//! finishes or a broken transport taints every board, since the conversion
//! command is a broadcast.

pub mod mux;
pub mod temperature;
pub mod topology;
pub mod voltage;

use embedded_hal_async::delay::DelayNs;

use crate::board_link::BoardLink;
use crate::config::{
    ADC_POLL_INTERVAL_US, ADC_POLL_RETRIES, CELL_CHANNELS_PER_BOARD, MODULES_PER_BOARD, NUM_BOARDS,
    NUM_MODULES, OPEN_WIRE_CONVERSIONS, SENSORS_PER_MODULE, TEMP_SENSORS_PER_BOARD,
};
use crate::registers::{
    AdcMode, AuxChannel, CELL_VOLTAGE_GROUPS, CELLS_PER_GROUP, CLEARED_CODE, Command,
    DEFAULT_CONFIG, REGISTER_BYTES, RegisterGroup,
};

use self::mux::MuxChannel;
use self::topology::ModuleLocation;

const CELL_ADC_MODE: AdcMode = AdcMode::Mode7kHz;
const AUX_ADC_MODE: AdcMode = AdcMode::Mode7kHz;
// GPIO1 carries the mux output
const TEMPERATURE_INPUT: AuxChannel = AuxChannel::Gpio1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquisitionError<E> {
    Link(E),
    ConversionTimeout,
    /// The configuration did not read back intact from the listed board.
    ConfigMismatch(usize),
}

/// Why a board's data is not trusted this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AcquisitionFault {
    Integrity,
    ConversionTimeout,
    Link,
}

impl<E> AcquisitionError<E> {
    pub fn fault(&self) -> AcquisitionFault {
        match self {
            AcquisitionError::ConversionTimeout => AcquisitionFault::ConversionTimeout,
            AcquisitionError::Link(_) => AcquisitionFault::Link,
            AcquisitionError::ConfigMismatch(_) => AcquisitionFault::Integrity,
        }
    }
}

/// Per-board state kept between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Board {
    pub config: [u8; REGISTER_BYTES],
    pub aux: [u8; REGISTER_BYTES],
    pub voltage_fault: Option<AcquisitionFault>,
    pub temperature_fault: Option<AcquisitionFault>,
    /// Bit `k` set when pin `Ck` was found open
    pub open_wire: u16,
}

impl Board {
    const fn new() -> Self {
        Self {
            config: [0; REGISTER_BYTES],
            aux: [0; REGISTER_BYTES],
            voltage_fault: None,
            temperature_fault: None,
            open_wire: 0,
        }
    }
}

/// One module's view of the latest acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleReading {
    pub voltage_mv: u16,
    pub temperatures_mc: [i32; SENSORS_PER_MODULE],
    pub open_wire: bool,
    pub voltage_fault: Option<AcquisitionFault>,
    pub temperature_fault: Option<AcquisitionFault>,
}

impl ModuleReading {
    pub const EMPTY: ModuleReading = ModuleReading {
        voltage_mv: 0,
        temperatures_mc: [0; SENSORS_PER_MODULE],
        open_wire: false,
        voltage_fault: None,
        temperature_fault: None,
    };

    pub const fn average_temperature_mc(&self) -> i32 {
        (self.temperatures_mc[0] + self.temperatures_mc[1]) / SENSORS_PER_MODULE as i32
    }
}

pub type PackReadings = [ModuleReading; NUM_MODULES];

type CellCodes = [[u16; CELL_CHANNELS_PER_BOARD]; NUM_BOARDS];

pub struct Telemetry<L, D> {
    link: L,
    delay: D,
    boards: [Board; NUM_BOARDS],
    cell_codes: CellCodes,
    temperatures_mc: [[i32; TEMP_SENSORS_PER_BOARD]; NUM_BOARDS],
}

impl<L, D> Telemetry<L, D>
where
    L: BoardLink,
    D: DelayNs,
{
    pub fn new(link: L, delay: D) -> Self {
        Self {
            link,
            delay,
            boards: [Board::new(); NUM_BOARDS],
            cell_codes: [[0; CELL_CHANNELS_PER_BOARD]; NUM_BOARDS],
            temperatures_mc: [[0; TEMP_SENSORS_PER_BOARD]; NUM_BOARDS],
        }
    }

    pub fn boards(&self) -> &[Board; NUM_BOARDS] {
        &self.boards
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Writes the configuration group to every board and reads it back.
    pub async fn init(&mut self) -> Result<(), AcquisitionError<L::Error>> {
        self.link
            .wake(NUM_BOARDS)
            .await
            .map_err(AcquisitionError::Link)?;
        self.link
            .write_register(RegisterGroup::Config, &[DEFAULT_CONFIG; NUM_BOARDS])
            .await
            .map_err(AcquisitionError::Link)?;

        let mut payloads = [[0u8; REGISTER_BYTES]; NUM_BOARDS];
        let mut integrity = [false; NUM_BOARDS];
        self.link
            .read_register(RegisterGroup::Config, &mut payloads, &mut integrity)
            .await
            .map_err(AcquisitionError::Link)?;

        for board in 0..NUM_BOARDS {
            self.boards[board].config = payloads[board];
            // The low bits of CFGR0 are status, compare the GPIO and REFON bits
            if !integrity[board] || payloads[board][0] & 0xfc != DEFAULT_CONFIG[0] {
                error!("board {} did not accept its configuration", board);
                return Err(AcquisitionError::ConfigMismatch(board));
            }
        }
        info!("{} boards configured", NUM_BOARDS);
        Ok(())
    }

    /// Runs one complete acquisition. Never fails; problems end up in the
    /// per-board fault flags.
    pub async fn refresh(&mut self) {
        if let Err(e) = self.acquire_voltages().await {
            warn!("cell voltage acquisition failed");
            self.mark_all_voltage(e.fault());
        } else if let Err(e) = self.detect_open_wires().await {
            warn!("open-wire check failed");
            self.mark_all_voltage(e.fault());
        }
        self.sweep_temperatures().await;
    }

    pub async fn acquire_voltages(&mut self) -> Result<(), AcquisitionError<L::Error>> {
        self.link
            .wake(NUM_BOARDS)
            .await
            .map_err(AcquisitionError::Link)?;
        self.link
            .command(Command::ClearCells)
            .await
            .map_err(AcquisitionError::Link)?;
        self.link
            .command(Command::StartCellConversion {
                mode: CELL_ADC_MODE,
                discharge: false,
            })
            .await
            .map_err(AcquisitionError::Link)?;
        self.wait_for_conversion().await?;

        let mut codes = [[0u16; CELL_CHANNELS_PER_BOARD]; NUM_BOARDS];
        let integrity = self.read_cell_codes(&mut codes).await?;
        for board in 0..NUM_BOARDS {
            if integrity[board] {
                self.cell_codes[board] = codes[board];
                self.boards[board].voltage_fault = None;
            } else {
                warn!("cell voltage PEC failed on board {}", board);
                self.boards[board].voltage_fault = Some(AcquisitionFault::Integrity);
            }
        }
        Ok(())
    }

    /// Repeats the cell conversion with the pull-up and then the pull-down
    /// current sources and compares the two.
    pub async fn detect_open_wires(&mut self) -> Result<(), AcquisitionError<L::Error>> {
        let mut pull_up = [[0u16; CELL_CHANNELS_PER_BOARD]; NUM_BOARDS];
        let mut pull_down = [[0u16; CELL_CHANNELS_PER_BOARD]; NUM_BOARDS];
        let up_ok = self.open_wire_pass(true, &mut pull_up).await?;
        let down_ok = self.open_wire_pass(false, &mut pull_down).await?;

        for board in 0..NUM_BOARDS {
            if !(up_ok[board] && down_ok[board]) {
                self.boards[board].voltage_fault = Some(AcquisitionFault::Integrity);
                continue;
            }
            let cells = topology::modules_on_board(board);
            let open = voltage::detect_open_wires(&pull_up[board], &pull_down[board], cells);
            if open != 0 && open != self.boards[board].open_wire {
                warn!("open wire on board {}: pins {=u16:#x}", board, open);
            }
            self.boards[board].open_wire = open;
        }
        Ok(())
    }

    async fn open_wire_pass(
        &mut self,
        pull_up: bool,
        codes: &mut CellCodes,
    ) -> Result<[bool; NUM_BOARDS], AcquisitionError<L::Error>> {
        self.link
            .wake(NUM_BOARDS)
            .await
            .map_err(AcquisitionError::Link)?;
        for _ in 0..OPEN_WIRE_CONVERSIONS {
            self.link
                .command(Command::StartOpenWire {
                    mode: CELL_ADC_MODE,
                    pull_up,
                    discharge: false,
                })
                .await
                .map_err(AcquisitionError::Link)?;
            self.wait_for_conversion().await?;
        }
        self.read_cell_codes(codes).await
    }

    async fn read_cell_codes(
        &mut self,
        codes: &mut CellCodes,
    ) -> Result<[bool; NUM_BOARDS], AcquisitionError<L::Error>> {
        let mut ok = [true; NUM_BOARDS];
        for (group_index, group) in CELL_VOLTAGE_GROUPS.iter().enumerate() {
            let mut payloads = [[0u8; REGISTER_BYTES]; NUM_BOARDS];
            let mut integrity = [false; NUM_BOARDS];
            self.link
                .read_register(*group, &mut payloads, &mut integrity)
                .await
                .map_err(AcquisitionError::Link)?;

            for board in 0..NUM_BOARDS {
                ok[board] &= integrity[board];
                for (i, code) in payloads[board].chunks_exact(2).enumerate() {
                    codes[board][group_index * CELLS_PER_GROUP + i] =
                        u16::from_le_bytes([code[0], code[1]]);
                }
            }
        }
        Ok(ok)
    }

    /// Routes one sensor channel to GPIO1 on every board, converts it and
    /// updates the cached temperatures. Returns the per-board integrity of
    /// the readback.
    pub async fn acquire_temperature_channel(
        &mut self,
        sensor: usize,
    ) -> Result<[bool; NUM_BOARDS], AcquisitionError<L::Error>> {
        let Some(channel) = MuxChannel::from_sensor(sensor) else {
            return Ok([true; NUM_BOARDS]);
        };

        for frame in mux::mux_frames(channel) {
            self.link
                .wake(NUM_BOARDS)
                .await
                .map_err(AcquisitionError::Link)?;
            self.link
                .write_register(RegisterGroup::Comm, &[frame; NUM_BOARDS])
                .await
                .map_err(AcquisitionError::Link)?;
            self.link
                .command(Command::StartComm)
                .await
                .map_err(AcquisitionError::Link)?;
        }

        self.link
            .wake(NUM_BOARDS)
            .await
            .map_err(AcquisitionError::Link)?;
        self.link
            .command(Command::ClearAux)
            .await
            .map_err(AcquisitionError::Link)?;
        self.link
            .command(Command::StartAuxConversion {
                mode: AUX_ADC_MODE,
                channel: TEMPERATURE_INPUT,
            })
            .await
            .map_err(AcquisitionError::Link)?;
        self.wait_for_conversion().await?;

        let mut payloads = [[0u8; REGISTER_BYTES]; NUM_BOARDS];
        let mut integrity = [false; NUM_BOARDS];
        self.link
            .read_register(RegisterGroup::AuxA, &mut payloads, &mut integrity)
            .await
            .map_err(AcquisitionError::Link)?;

        for board in 0..NUM_BOARDS {
            if !integrity[board] {
                continue;
            }
            self.boards[board].aux = payloads[board];
            let code = u16::from_le_bytes([payloads[board][0], payloads[board][1]]);
            if code == CLEARED_CODE {
                // ADAX never reached this board, the code is above the ADC range
                integrity[board] = false;
                continue;
            }
            let millivolts = temperature::decode_aux_code(code);
            // Out-of-domain readings keep the previous value
            if let Ok(millicelsius) = temperature::millivolts_to_millicelsius(millivolts) {
                self.temperatures_mc[board][sensor] = millicelsius;
            }
        }
        Ok(integrity)
    }

    pub async fn sweep_temperatures(&mut self) {
        let mut faults = [None; NUM_BOARDS];
        for sensor in 0..TEMP_SENSORS_PER_BOARD {
            match self.acquire_temperature_channel(sensor).await {
                Ok(integrity) => {
                    for board in 0..NUM_BOARDS {
                        if !integrity[board] && faults[board].is_none() {
                            warn!("temperature readback failed on board {} sensor {}", board, sensor);
                            faults[board] = Some(AcquisitionFault::Integrity);
                        }
                    }
                }
                Err(e) => {
                    warn!("temperature sweep aborted at sensor {}", sensor);
                    faults = [Some(e.fault()); NUM_BOARDS];
                    break;
                }
            }
        }
        for (board, fault) in self.boards.iter_mut().zip(faults) {
            board.temperature_fault = fault;
        }
    }

    async fn wait_for_conversion(&mut self) -> Result<(), AcquisitionError<L::Error>> {
        for _ in 0..ADC_POLL_RETRIES {
            if self
                .link
                .conversion_done()
                .await
                .map_err(AcquisitionError::Link)?
            {
                return Ok(());
            }
            self.delay.delay_us(ADC_POLL_INTERVAL_US).await;
        }
        warn!("ADC conversion still busy after {} polls", ADC_POLL_RETRIES);
        Err(AcquisitionError::ConversionTimeout)
    }

    fn mark_all_voltage(&mut self, fault: AcquisitionFault) {
        for board in self.boards.iter_mut() {
            board.voltage_fault = Some(fault);
        }
    }

    /// Marks every board untrusted without touching the link, for a chain
    /// that could not be configured.
    pub fn invalidate(&mut self, fault: AcquisitionFault) {
        for board in self.boards.iter_mut() {
            board.voltage_fault = Some(fault);
            board.temperature_fault = Some(fault);
        }
    }

    pub fn temperature_mc(&self, board: usize, sensor: usize) -> Option<i32> {
        self.temperatures_mc.get(board)?.get(sensor).copied()
    }

    pub fn reading(&self, location: ModuleLocation) -> ModuleReading {
        let board = &self.boards[location.board];
        let sensors = topology::temperature_sensors(location.channel);
        ModuleReading {
            voltage_mv: voltage::decode_cell_code(self.cell_codes[location.board][location.channel]),
            temperatures_mc: sensors.map(|sensor| self.temperatures_mc[location.board][sensor]),
            open_wire: voltage::cell_open_wire(board.open_wire, location.channel),
            voltage_fault: board.voltage_fault,
            temperature_fault: board.temperature_fault,
        }
    }

    /// Owned copy of every module's latest values.
    pub fn readings(&self) -> PackReadings {
        core::array::from_fn(|module| {
            let location = ModuleLocation {
                board: module / MODULES_PER_BOARD,
                channel: module % MODULES_PER_BOARD,
            };
            self.reading(location)
        })
    }
}
