//! Host doubles for the hardware seams.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

use crate::board_link::BoardLink;
use crate::config::{CELL_CHANNELS_PER_BOARD, EEPROM_SIZE, NUM_BOARDS, TEMP_SENSORS_PER_BOARD};
use crate::fault_log::PersistentStore;
use crate::monitor::{Contactor, CurrentSensor, Indication, Indicator, Watchdog};
use crate::registers::{CELLS_PER_GROUP, CLEARED_CODE, Command, REGISTER_BYTES, RegisterGroup};
use crate::safety::CurrentSample;
use crate::soc::TickSource;
use crate::telemetry::mux::{MUX_A_ADDRESS, MUX_B_ADDRESS};
use crate::telemetry::topology;

/// Side effects seen by the doubles that share a [`Journal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    StoreWrite,
    ContactorOpen,
    ContactorClose,
    Pet,
}

/// Shared, ordered record of [`Step`]s.
#[derive(Clone, Debug, Default)]
pub struct Journal(Rc<RefCell<Vec<Step>>>);

impl Journal {
    fn push(&self, step: Step) {
        self.0.borrow_mut().push(step);
    }

    pub fn steps(&self) -> Vec<Step> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Records every write and answers reads from a queue.
#[derive(Debug, Default)]
pub struct RecordingSpi {
    pub written: Vec<Vec<u8>>,
    pub responses: VecDeque<Vec<u8>>,
}

impl RecordingSpi {
    fn answer(&mut self, buf: &mut [u8]) {
        let response = self.responses.pop_front().unwrap_or_default();
        let n = buf.len().min(response.len());
        buf[..n].copy_from_slice(&response[..n]);
    }
}

impl ErrorType for RecordingSpi {
    type Error = ErrorKind;
}

impl SpiDevice for RecordingSpi {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), ErrorKind> {
        for op in operations.iter_mut() {
            match op {
                Operation::Write(data) => self.written.push(data.to_vec()),
                Operation::Read(buf) => self.answer(buf),
                Operation::Transfer(read, write) => {
                    self.written.push(write.to_vec());
                    self.answer(read);
                }
                Operation::TransferInPlace(buf) => {
                    self.written.push(buf.to_vec());
                    self.answer(buf);
                }
                Operation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimulatedFault;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Conversion {
    Idle,
    Cells,
    OpenWire { pull_up: bool },
    Aux,
}

/// A chain of LTC6811 boards with two LTC1380 muxes each, simulated at the
/// register level.
pub struct SimulatedChain {
    pub cell_mv: [[u16; CELL_CHANNELS_PER_BOARD]; NUM_BOARDS],
    pub sensor_mv: [[f32; TEMP_SENSORS_PER_BOARD]; NUM_BOARDS],
    /// Open sense pins per board, bit `k` for pin `Ck`
    pub open_pins: [u16; NUM_BOARDS],
    /// Board whose every readback fails its PEC
    pub corrupt_board: Option<usize>,
    pub conversion_stuck: bool,
    /// Start commands are lost on the wire, the registers keep what they had
    pub drop_conversions: bool,
    /// Times a STCOMM left both muxes of a board enabled
    pub mux_conflicts: usize,
    config: [[u8; REGISTER_BYTES]; NUM_BOARDS],
    comm: [[u8; REGISTER_BYTES]; NUM_BOARDS],
    // enabled local channel of mux A and mux B, per board
    mux: [[Option<u8>; 2]; NUM_BOARDS],
    conversion: Conversion,
    cells_cleared: bool,
    aux_cleared: bool,
}

impl SimulatedChain {
    pub const NOMINAL_MV: u16 = 3600;
    // 30 degC on the thermistor curve
    pub const NOMINAL_SENSOR_MV: f32 = 2230.8;

    pub fn nominal() -> Self {
        Self {
            cell_mv: [[Self::NOMINAL_MV; CELL_CHANNELS_PER_BOARD]; NUM_BOARDS],
            sensor_mv: [[Self::NOMINAL_SENSOR_MV; TEMP_SENSORS_PER_BOARD]; NUM_BOARDS],
            open_pins: [0; NUM_BOARDS],
            corrupt_board: None,
            conversion_stuck: false,
            drop_conversions: false,
            mux_conflicts: 0,
            config: [[0; REGISTER_BYTES]; NUM_BOARDS],
            comm: [[0; REGISTER_BYTES]; NUM_BOARDS],
            mux: [[None; 2]; NUM_BOARDS],
            conversion: Conversion::Idle,
            cells_cleared: false,
            aux_cleared: false,
        }
    }

    pub fn set_cell_mv(&mut self, board: usize, channel: usize, mv: u16) {
        self.cell_mv[board][channel] = mv;
    }

    pub fn set_module_mv(&mut self, module: usize, mv: u16) {
        let location = topology::locate(module).unwrap();
        self.set_cell_mv(location.board, location.channel, mv);
    }

    pub fn set_sensor_mv(&mut self, board: usize, sensor: usize, mv: f32) {
        self.sensor_mv[board][sensor] = mv;
    }

    fn shift_comm(&mut self) {
        for board in 0..NUM_BOARDS {
            let frame = self.comm[board];
            let address = (frame[0] & 0x0f) << 4 | frame[1] >> 4;
            let data = frame[3] >> 4;
            let mux = match address {
                MUX_A_ADDRESS => 0,
                MUX_B_ADDRESS => 1,
                _ => continue,
            };
            self.mux[board][mux] = (data & 0x08 != 0).then_some(data & 0x07);
            if self.mux[board].iter().all(Option::is_some) {
                self.mux_conflicts += 1;
            }
        }
    }

    fn cell_code(&self, board: usize, cell: usize) -> u16 {
        if self.cells_cleared {
            return CLEARED_CODE;
        }
        let code = self.cell_mv[board][cell] * 10;
        let open = self.open_pins[board];
        let populated = topology::modules_on_board(board);
        match self.conversion {
            Conversion::OpenWire { pull_up: true } if cell == 0 && open & 1 != 0 => 0,
            Conversion::OpenWire { pull_up: false } => {
                if cell > 0 && cell < populated && open & 1 << cell != 0 {
                    code + 5000
                } else if cell + 1 == populated && open & 1 << populated != 0 {
                    0
                } else {
                    code
                }
            }
            _ => code,
        }
    }

    fn aux_code(&self, board: usize) -> u16 {
        if self.aux_cleared {
            return CLEARED_CODE;
        }
        let sensor = match self.mux[board] {
            [Some(local), None] => local as usize,
            [None, Some(local)] => local as usize + TEMP_SENSORS_PER_BOARD / 2,
            _ => return 0,
        };
        (self.sensor_mv[board][sensor] * 10.0 + 0.5) as u16
    }

    fn register(&self, register: RegisterGroup, board: usize) -> [u8; REGISTER_BYTES] {
        let mut payload = [0u8; REGISTER_BYTES];
        let group = match register {
            RegisterGroup::Config => return self.config[board],
            RegisterGroup::CellVoltageA => 0,
            RegisterGroup::CellVoltageB => 1,
            RegisterGroup::CellVoltageC => 2,
            RegisterGroup::CellVoltageD => 3,
            RegisterGroup::AuxA => {
                payload[..2].copy_from_slice(&self.aux_code(board).to_le_bytes());
                return payload;
            }
            _ => return payload,
        };
        for i in 0..CELLS_PER_GROUP {
            let code = self.cell_code(board, group * CELLS_PER_GROUP + i);
            payload[2 * i..2 * i + 2].copy_from_slice(&code.to_le_bytes());
        }
        payload
    }
}

impl BoardLink for SimulatedChain {
    type Error = SimulatedFault;

    async fn wake(&mut self, _chain_length: usize) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn command(&mut self, command: Command) -> Result<(), Self::Error> {
        match command {
            Command::StartCellConversion { .. } if !self.drop_conversions => {
                self.conversion = Conversion::Cells;
                self.cells_cleared = false;
            }
            Command::StartOpenWire { pull_up, .. } if !self.drop_conversions => {
                self.conversion = Conversion::OpenWire { pull_up };
                self.cells_cleared = false;
            }
            Command::StartAuxConversion { .. } if !self.drop_conversions => {
                self.conversion = Conversion::Aux;
                self.aux_cleared = false;
            }
            Command::StartComm => self.shift_comm(),
            Command::ClearCells => self.cells_cleared = true,
            Command::ClearAux => self.aux_cleared = true,
            _ => {}
        }
        Ok(())
    }

    async fn write_register(
        &mut self,
        register: RegisterGroup,
        payloads: &[[u8; REGISTER_BYTES]],
    ) -> Result<(), Self::Error> {
        let target = match register {
            RegisterGroup::Config => &mut self.config,
            RegisterGroup::Comm => &mut self.comm,
            _ => return Err(SimulatedFault),
        };
        target[..payloads.len()].copy_from_slice(payloads);
        Ok(())
    }

    async fn read_register(
        &mut self,
        register: RegisterGroup,
        payloads: &mut [[u8; REGISTER_BYTES]],
        integrity_ok: &mut [bool],
    ) -> Result<(), Self::Error> {
        for board in 0..payloads.len() {
            if self.corrupt_board == Some(board) {
                payloads[board] = [0xaa; REGISTER_BYTES];
                integrity_ok[board] = false;
            } else {
                payloads[board] = self.register(register, board);
                integrity_ok[board] = true;
            }
        }
        Ok(())
    }

    async fn conversion_done(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.conversion_stuck)
    }
}

/// RAM image of the EEPROM, erased to 0xff.
pub struct MemoryStore {
    memory: Vec<u8>,
    pub fail_writes: bool,
    pub journal: Option<Journal>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            memory: std::vec![0xff; EEPROM_SIZE],
            fail_writes: false,
            journal: None,
        }
    }

    pub fn bytes(&self, address: u16, len: usize) -> Vec<u8> {
        self.memory[address as usize..address as usize + len].to_vec()
    }

    /// Seeds memory without going through the store interface.
    pub fn load(&mut self, address: u16, data: &[u8]) {
        self.memory[address as usize..address as usize + data.len()].copy_from_slice(data);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStore for MemoryStore {
    type Error = SimulatedFault;

    async fn read_range(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        let start = address as usize;
        let bytes = self.memory.get(start..start + buf.len()).ok_or(SimulatedFault)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    async fn write_range(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error> {
        if let Some(journal) = &self.journal {
            journal.push(Step::StoreWrite);
        }
        if self.fail_writes {
            return Err(SimulatedFault);
        }
        let start = address as usize;
        self.memory
            .get_mut(start..start + data.len())
            .ok_or(SimulatedFault)?
            .copy_from_slice(data);
        Ok(())
    }
}

/// Hands out queued tick counts, zero once the queue is empty.
pub struct ScriptedTicks {
    frequency_hz: u32,
    pending: VecDeque<u32>,
}

impl ScriptedTicks {
    pub fn new(frequency_hz: u32) -> Self {
        Self {
            frequency_hz,
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, ticks: u32) {
        self.pending.push_back(ticks);
    }
}

impl TickSource for ScriptedTicks {
    fn elapsed_ticks(&mut self) -> u32 {
        self.pending.pop_front().unwrap_or(0)
    }

    fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }
}

#[derive(Debug, Default)]
pub struct RecordingContactor {
    pub closed: bool,
    pub closes: usize,
    pub opens: usize,
    pub journal: Option<Journal>,
}

impl Contactor for RecordingContactor {
    fn close(&mut self) {
        self.closed = true;
        self.closes += 1;
        if let Some(journal) = &self.journal {
            journal.push(Step::ContactorClose);
        }
    }

    fn open(&mut self) {
        self.closed = false;
        self.opens += 1;
        if let Some(journal) = &self.journal {
            journal.push(Step::ContactorOpen);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Debug, Default)]
pub struct CountingWatchdog {
    pub pets: usize,
    pub prior_reset: bool,
    pub journal: Option<Journal>,
}

impl Watchdog for CountingWatchdog {
    fn pet(&mut self) {
        self.pets += 1;
        if let Some(journal) = &self.journal {
            journal.push(Step::Pet);
        }
    }

    fn did_prior_reset_occur(&self) -> bool {
        self.prior_reset
    }
}

#[derive(Debug, Default)]
pub struct RecordingIndicator {
    pub shown: Vec<Indication>,
}

impl Indicator for RecordingIndicator {
    fn show(&mut self, indication: Indication) {
        self.shown.push(indication);
    }
}

pub struct FixedCurrent(Option<i32>);

impl FixedCurrent {
    pub fn milliamps(milliamps: i32) -> Self {
        Self(Some(milliamps))
    }

    pub fn failed() -> Self {
        Self(None)
    }
}

impl CurrentSensor for FixedCurrent {
    type Error = SimulatedFault;

    async fn sample(&mut self) -> Result<CurrentSample, Self::Error> {
        self.0
            .map(CurrentSample::from_milliamps)
            .ok_or(SimulatedFault)
    }
}
