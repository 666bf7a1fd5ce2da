//! Persistent, per-category fault logs.
//!
//! Every fault appends its category code to the shared fault-code range, and
//! optional evidence bytes go to the category's own range. Each range is a
//! run of entries ending in [`LOG_TERMINATOR`], and its append pointer is
//! kept in the pointer table so the logs survive a reset. A full range drops
//! further appends instead of spilling into its neighbour.

use crate::config::{
    CAN_LOG_BASE, CAN_LOG_END, CURRENT_LOG_BASE, FAULT_CODE_BASE, LOG_POINTER_TABLE,
    LOG_TERMINATOR, TEMPERATURE_LOG_BASE, VOLTAGE_LOG_BASE, WATCHDOG_LOG_BASE,
};

/// Byte-addressed non-volatile memory.
pub trait PersistentStore {
    type Error: core::fmt::Debug;

    async fn read_range(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Must not return before the data is committed.
    async fn write_range(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error>;

    async fn read_byte(&mut self, address: u16) -> Result<u8, Self::Error> {
        let mut byte = [0u8];
        self.read_range(address, &mut byte).await?;
        Ok(byte[0])
    }

    async fn write_byte(&mut self, address: u16, value: u8) -> Result<(), Self::Error> {
        self.write_range(address, &[value]).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultCategory {
    HighTemperature,
    HighVoltage,
    LowVoltage,
    HighCurrent,
    Watchdog,
    CanBus,
    VoltageMisc,
}

impl FaultCategory {
    pub const ALL: [FaultCategory; 7] = [
        FaultCategory::HighTemperature,
        FaultCategory::HighVoltage,
        FaultCategory::LowVoltage,
        FaultCategory::HighCurrent,
        FaultCategory::Watchdog,
        FaultCategory::CanBus,
        FaultCategory::VoltageMisc,
    ];

    /// Byte written to the fault-code range.
    pub const fn code(self) -> u8 {
        match self {
            FaultCategory::HighTemperature => 0x01,
            FaultCategory::HighVoltage => 0x02,
            FaultCategory::LowVoltage => 0x04,
            FaultCategory::HighCurrent => 0x08,
            FaultCategory::Watchdog => 0x10,
            FaultCategory::CanBus => 0x20,
            FaultCategory::VoltageMisc => 0x40,
        }
    }

    pub fn from_code(code: u8) -> Option<FaultCategory> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Range holding the category's data bytes.
    pub const fn region(self) -> LogRegion {
        match self {
            FaultCategory::HighTemperature => LogRegion::Temperature,
            FaultCategory::HighVoltage | FaultCategory::LowVoltage | FaultCategory::VoltageMisc => {
                LogRegion::Voltage
            }
            FaultCategory::HighCurrent => LogRegion::Current,
            FaultCategory::Watchdog => LogRegion::Watchdog,
            FaultCategory::CanBus => LogRegion::Can,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogRegion {
    FaultCodes,
    Temperature,
    Voltage,
    Current,
    Watchdog,
    Can,
}

const REGION_COUNT: usize = 6;
// Largest range, the voltage log
const MAX_REGION_LEN: usize = (CURRENT_LOG_BASE - VOLTAGE_LOG_BASE) as usize;

impl LogRegion {
    pub const ALL: [LogRegion; REGION_COUNT] = [
        LogRegion::FaultCodes,
        LogRegion::Temperature,
        LogRegion::Voltage,
        LogRegion::Current,
        LogRegion::Watchdog,
        LogRegion::Can,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn base(self) -> u16 {
        match self {
            LogRegion::FaultCodes => FAULT_CODE_BASE,
            LogRegion::Temperature => TEMPERATURE_LOG_BASE,
            LogRegion::Voltage => VOLTAGE_LOG_BASE,
            LogRegion::Current => CURRENT_LOG_BASE,
            LogRegion::Watchdog => WATCHDOG_LOG_BASE,
            LogRegion::Can => CAN_LOG_BASE,
        }
    }

    /// One past the last byte of the range.
    pub const fn end(self) -> u16 {
        match self {
            LogRegion::FaultCodes => TEMPERATURE_LOG_BASE,
            LogRegion::Temperature => VOLTAGE_LOG_BASE,
            LogRegion::Voltage => CURRENT_LOG_BASE,
            LogRegion::Current => WATCHDOG_LOG_BASE,
            LogRegion::Watchdog => CAN_LOG_BASE,
            LogRegion::Can => CAN_LOG_END,
        }
    }

    pub const fn pointer_address(self) -> u16 {
        LOG_POINTER_TABLE + 2 * self.index() as u16
    }

    /// Entries the range can hold; the last byte is kept for the terminator.
    pub const fn capacity(self) -> usize {
        (self.end() - self.base()) as usize - 1
    }

    const fn contains(self, pointer: u16) -> bool {
        pointer >= self.base() && pointer < self.end()
    }
}

const _: () = assert!(LogRegion::Voltage.end() - LogRegion::Voltage.base() == MAX_REGION_LEN as u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultLogError<E> {
    Store(E),
    /// The byte is the terminator and cannot be stored as data.
    ReservedValue,
}

pub struct FaultLog<S> {
    store: S,
    pointers: [u16; REGION_COUNT],
}

impl<S: PersistentStore> FaultLog<S> {
    /// Restores the append pointers from the pointer table.
    pub async fn init(mut store: S) -> Result<Self, S::Error> {
        let mut table = [0u8; REGION_COUNT * 2];
        store.read_range(LOG_POINTER_TABLE, &mut table).await?;

        let mut pointers = [0u16; REGION_COUNT];
        for region in LogRegion::ALL {
            let i = region.index();
            let stored = u16::from_le_bytes([table[2 * i], table[2 * i + 1]]);
            pointers[i] = if region.contains(stored) {
                stored
            } else {
                debug!("log {} has no valid pointer, starting at its base", i);
                region.base()
            };
        }
        Ok(Self { store, pointers })
    }

    pub fn pointer(&self, region: LogRegion) -> u16 {
        self.pointers[region.index()]
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Appends `category` to the fault-code range. Returns `false` when the
    /// range is full and the entry was dropped.
    pub async fn log_error(
        &mut self,
        category: FaultCategory,
    ) -> Result<bool, FaultLogError<S::Error>> {
        self.append(LogRegion::FaultCodes, category.code()).await
    }

    /// Appends one evidence byte to the category's own range.
    pub async fn log_data(
        &mut self,
        category: FaultCategory,
        data: u8,
    ) -> Result<bool, FaultLogError<S::Error>> {
        self.append(category.region(), data).await
    }

    async fn append(
        &mut self,
        region: LogRegion,
        byte: u8,
    ) -> Result<bool, FaultLogError<S::Error>> {
        if byte == LOG_TERMINATOR {
            return Err(FaultLogError::ReservedValue);
        }
        let pointer = self.pointers[region.index()];
        if pointer + 1 >= region.end() {
            return Ok(false);
        }

        self.store
            .write_range(pointer, &[byte, LOG_TERMINATOR])
            .await
            .map_err(FaultLogError::Store)?;
        let next = pointer + 1;
        self.store
            .write_range(region.pointer_address(), &next.to_le_bytes())
            .await
            .map_err(FaultLogError::Store)?;

        self.pointers[region.index()] = next;
        Ok(true)
    }

    /// Empties every log. Operator action only.
    pub async fn reset(&mut self) -> Result<(), S::Error> {
        let mut table = [0u8; REGION_COUNT * 2];
        for region in LogRegion::ALL {
            self.store.write_byte(region.base(), LOG_TERMINATOR).await?;
            let i = region.index();
            table[2 * i..2 * i + 2].copy_from_slice(&region.base().to_le_bytes());
        }
        self.store.write_range(LOG_POINTER_TABLE, &table).await?;

        for region in LogRegion::ALL {
            self.pointers[region.index()] = region.base();
        }
        info!("fault log reset");
        Ok(())
    }

    /// Walks the fault-code range in order and hands each category with the
    /// contents of its data range to `visit`. Returns the number of codes
    /// visited.
    pub async fn replay<F>(&mut self, mut visit: F) -> Result<usize, S::Error>
    where
        F: FnMut(FaultCategory, &[u8]),
    {
        let mut codes = [0u8; MAX_REGION_LEN];
        let codes = self.read_entries(LogRegion::FaultCodes, &mut codes).await?;

        let mut data = [0u8; MAX_REGION_LEN];
        let mut visited = 0;
        for &code in codes.iter() {
            let Some(category) = FaultCategory::from_code(code) else {
                warn!("skipping unknown fault code {=u8:#x}", code);
                continue;
            };
            let entries = self.read_entries(category.region(), &mut data).await?;
            visit(category, entries);
            visited += 1;
        }
        Ok(visited)
    }

    /// Reads a range from its base up to the terminator, never past the
    /// append pointer.
    async fn read_entries<'b>(
        &mut self,
        region: LogRegion,
        buf: &'b mut [u8; MAX_REGION_LEN],
    ) -> Result<&'b [u8], S::Error> {
        let len = (self.pointer(region) - region.base()) as usize;
        let buf = &mut buf[..len];
        self.store.read_range(region.base(), buf).await?;
        let end = buf
            .iter()
            .position(|&b| b == LOG_TERMINATOR)
            .unwrap_or(len);
        Ok(&buf[..end])
    }
}
