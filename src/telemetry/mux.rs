//! Temperature channel selection through the LTC1380 muxes.
//!
//! The muxes sit on the I2C bus driven by each LTC6811's GPIO master, so a
//! selection is two COMM register writes, each shifted out with STCOMM.

use crate::config::{MUX_CHANNELS, TEMP_SENSORS_PER_BOARD};
use crate::registers::{REGISTER_BYTES, fcom, icom};

pub const MUX_A_ADDRESS: u8 = 0x91;
pub const MUX_B_ADDRESS: u8 = 0x93;

const MUX_ENABLE: u8 = 0x08;
const MUX_ALL_OFF: u8 = 0x00;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mux {
    A,
    B,
}

impl Mux {
    pub const fn address(self) -> u8 {
        match self {
            Mux::A => MUX_A_ADDRESS,
            Mux::B => MUX_B_ADDRESS,
        }
    }

    pub const fn other(self) -> Mux {
        match self {
            Mux::A => Mux::B,
            Mux::B => Mux::A,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MuxChannel {
    pub mux: Mux,
    pub local: u8,
}

impl MuxChannel {
    pub const fn from_sensor(sensor: usize) -> Option<MuxChannel> {
        if sensor >= TEMP_SENSORS_PER_BOARD {
            return None;
        }
        let mux = if sensor < MUX_CHANNELS { Mux::A } else { Mux::B };
        Some(MuxChannel {
            mux,
            local: (sensor % MUX_CHANNELS) as u8,
        })
    }
}

/// One COMM register image: address byte, then a data byte whose high nibble
/// is don't-care, then two no-transmit bytes.
pub const fn comm_frame(address: u8, data: u8) -> [u8; REGISTER_BYTES] {
    [
        icom::START << 4 | address >> 4,
        address << 4 | fcom::NACK,
        icom::BLANK << 4 | 0x0f,
        (data & 0x0f) << 4 | fcom::NACK_STOP,
        icom::NO_TRANSMIT << 4 | 0x0f,
        0xf0 | fcom::NACK_STOP,
    ]
}

/// The two frames that route `sensor` to GPIO1: first switch the other mux
/// off, then enable the target channel.
pub const fn mux_frames(sensor: MuxChannel) -> [[u8; REGISTER_BYTES]; 2] {
    [
        comm_frame(sensor.mux.other().address(), MUX_ALL_OFF),
        comm_frame(sensor.mux.address(), MUX_ENABLE | sensor.local),
    ]
}
