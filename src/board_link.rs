//! Byte-level link to the daisy chain of LTC6811 boards.

use embedded_hal::spi::Operation;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::config::NUM_BOARDS;
use crate::pec::{self, pec15};
use crate::registers::{Command, FRAME_BYTES, REGISTER_BYTES, RegisterGroup};

/// Broadcast access to an ordered chain of front-end boards.
///
/// Payload slices are indexed by board, nearest board first, and their length
/// is the chain length. A read reports integrity per board instead of failing
/// the whole transaction, so one noisy board does not hide the others.
pub trait BoardLink {
    type Error: core::fmt::Debug;

    async fn wake(&mut self, chain_length: usize) -> Result<(), Self::Error>;

    async fn command(&mut self, command: Command) -> Result<(), Self::Error>;

    async fn write_register(
        &mut self,
        register: RegisterGroup,
        payloads: &[[u8; REGISTER_BYTES]],
    ) -> Result<(), Self::Error>;

    async fn read_register(
        &mut self,
        register: RegisterGroup,
        payloads: &mut [[u8; REGISTER_BYTES]],
        integrity_ok: &mut [bool],
    ) -> Result<(), Self::Error>;

    /// Whether the last broadcast ADC conversion has completed.
    async fn conversion_done(&mut self) -> Result<bool, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError<E> {
    Transport(E),
    ChainTooLong,
    LengthMismatch,
    ReadOnlyRegister,
}

// LTC6811 isoSPI wake-up timing
const WAKE_DELAY_NS: u32 = 300_000;
const READY_DELAY_US: u32 = 10;
// STCOMM needs 3 clocks per transmitted bit of the three COMM bytes
const COMM_CLOCK_BYTES: usize = 9;

fn command_frame(code: u16) -> [u8; 4] {
    let code = code.to_be_bytes();
    let pec = pec15(&code).to_be_bytes();
    [code[0], code[1], pec[0], pec[1]]
}

/// [`BoardLink`] over an SPI device talking to the bottom LTC6811 of the chain.
pub struct Ltc6811Link<SPI, D> {
    spi: SPI,
    delay: D,
}

impl<SPI, D> Ltc6811Link<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        Self { spi, delay }
    }

    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }
}

impl<SPI, D> BoardLink for Ltc6811Link<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    type Error = LinkError<SPI::Error>;

    async fn wake(&mut self, chain_length: usize) -> Result<(), Self::Error> {
        // Each board wakes the next one up the chain
        for _ in 0..chain_length {
            self.spi
                .transaction(&mut [Operation::DelayNs(WAKE_DELAY_NS)])
                .await
                .map_err(LinkError::Transport)?;
            self.delay.delay_us(READY_DELAY_US).await;
        }
        Ok(())
    }

    async fn command(&mut self, command: Command) -> Result<(), Self::Error> {
        let frame = command_frame(command.code());
        let result = match command {
            Command::StartComm => {
                let clocks = [0xff; COMM_CLOCK_BYTES];
                self.spi
                    .transaction(&mut [Operation::Write(&frame), Operation::Write(&clocks)])
                    .await
            }
            _ => self.spi.write(&frame).await,
        };
        result.map_err(LinkError::Transport)
    }

    async fn write_register(
        &mut self,
        register: RegisterGroup,
        payloads: &[[u8; REGISTER_BYTES]],
    ) -> Result<(), Self::Error> {
        let code = register.write_code().ok_or(LinkError::ReadOnlyRegister)?;
        if payloads.len() > NUM_BOARDS {
            return Err(LinkError::ChainTooLong);
        }

        let mut buf = [0u8; 4 + FRAME_BYTES * NUM_BOARDS];
        buf[..4].copy_from_slice(&command_frame(code));
        // Data shifts through the chain, so the farthest board goes first
        for (slot, payload) in payloads.iter().rev().enumerate() {
            let start = 4 + slot * FRAME_BYTES;
            buf[start..start + REGISTER_BYTES].copy_from_slice(payload);
            let pec = pec15(payload).to_be_bytes();
            buf[start + REGISTER_BYTES..start + FRAME_BYTES].copy_from_slice(&pec);
        }

        let len = 4 + payloads.len() * FRAME_BYTES;
        self.spi
            .write(&buf[..len])
            .await
            .map_err(LinkError::Transport)
    }

    async fn read_register(
        &mut self,
        register: RegisterGroup,
        payloads: &mut [[u8; REGISTER_BYTES]],
        integrity_ok: &mut [bool],
    ) -> Result<(), Self::Error> {
        if payloads.len() > NUM_BOARDS {
            return Err(LinkError::ChainTooLong);
        }
        if payloads.len() != integrity_ok.len() {
            return Err(LinkError::LengthMismatch);
        }

        let frame = command_frame(register.read_code());
        let mut buf = [0u8; FRAME_BYTES * NUM_BOARDS];
        let len = payloads.len() * FRAME_BYTES;
        self.spi
            .transaction(&mut [Operation::Write(&frame), Operation::Read(&mut buf[..len])])
            .await
            .map_err(LinkError::Transport)?;

        for (board, block) in buf[..len].chunks_exact(FRAME_BYTES).enumerate() {
            integrity_ok[board] = pec::verify(block);
            payloads[board].copy_from_slice(&block[..REGISTER_BYTES]);
        }
        Ok(())
    }

    async fn conversion_done(&mut self) -> Result<bool, Self::Error> {
        let frame = command_frame(Command::PollConversion.code());
        let mut status = [0u8; 1];
        self.spi
            .transaction(&mut [Operation::Write(&frame), Operation::Read(&mut status)])
            .await
            .map_err(LinkError::Transport)?;
        Ok(status[0] != 0)
    }
}
