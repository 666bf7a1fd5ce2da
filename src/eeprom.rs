//! M24128 (128 Kbit) I2C EEPROM backing the fault log and the SoC record.
//!
//! - 7-bit address 0x50 (E0..E2 strapped to GND).
//! - 16-bit big-endian word address.
//! - Page writes never cross a 64-byte page boundary.

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;

use crate::config::EEPROM_SIZE;
use crate::fault_log::PersistentStore;

pub const M24128_ADDRESS: u8 = 0x50;
pub const PAGE_SIZE: usize = 64;

// tW is 5 ms max
const WRITE_CYCLE_POLLS: u32 = 20;
const WRITE_CYCLE_POLL_INTERVAL_US: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EepromError<E> {
    I2c(E),
    OutOfRange,
    /// The device kept NACKing after a page write.
    WriteTimeout,
}

pub struct M24128<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C, D> M24128<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            address: M24128_ADDRESS,
        }
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn check_range(address: u16, len: usize) -> Result<(), EepromError<I2C::Error>> {
        if address as usize + len > EEPROM_SIZE {
            return Err(EepromError::OutOfRange);
        }
        Ok(())
    }

    async fn write_page(&mut self, address: u16, chunk: &[u8]) -> Result<(), EepromError<I2C::Error>> {
        let mut buf = [0u8; 2 + PAGE_SIZE];
        buf[..2].copy_from_slice(&address.to_be_bytes());
        buf[2..2 + chunk.len()].copy_from_slice(chunk);
        self.i2c
            .write(self.address, &buf[..2 + chunk.len()])
            .await
            .map_err(EepromError::I2c)
    }

    /// Acknowledge polling: the device ignores its address until the
    /// internal write cycle is over.
    async fn wait_ready(&mut self, probe: u16) -> Result<(), EepromError<I2C::Error>> {
        let mut dummy = [0u8; 1];
        for _ in 0..WRITE_CYCLE_POLLS {
            if self
                .i2c
                .write_read(self.address, &probe.to_be_bytes(), &mut dummy)
                .await
                .is_ok()
            {
                return Ok(());
            }
            self.delay.delay_us(WRITE_CYCLE_POLL_INTERVAL_US).await;
        }
        warn!("eeprom write cycle did not finish at {=u16:#x}", probe);
        Err(EepromError::WriteTimeout)
    }
}

impl<I2C, D> PersistentStore for M24128<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    type Error = EepromError<I2C::Error>;

    async fn read_range(&mut self, address: u16, buf: &mut [u8]) -> Result<(), Self::Error> {
        Self::check_range(address, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        self.i2c
            .write_read(self.address, &address.to_be_bytes(), buf)
            .await
            .map_err(EepromError::I2c)
    }

    async fn write_range(&mut self, address: u16, data: &[u8]) -> Result<(), Self::Error> {
        Self::check_range(address, data.len())?;

        let mut cursor = address as usize;
        let mut offset = 0;
        while offset < data.len() {
            let page_remaining = PAGE_SIZE - cursor % PAGE_SIZE;
            let len = (data.len() - offset).min(page_remaining);

            self.write_page(cursor as u16, &data[offset..offset + len])
                .await?;
            self.wait_ready(cursor as u16).await?;

            cursor += len;
            offset += len;
        }
        Ok(())
    }
}
