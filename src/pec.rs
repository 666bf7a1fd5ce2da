//! Packet error code used on every LTC6811 command and register block.

use crc::{Algorithm, Crc};

/// CRC-15 of the LTC681x family. The transmitted PEC is this value shifted
/// left by one, with a zero in the least significant bit.
pub const CRC_15_LTC681X: Algorithm<u16> = Algorithm {
    width: 15,
    poly: 0x4599,
    init: 0x0010,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x535f,
    residue: 0x0000,
};

const PEC: Crc<u16> = Crc::<u16>::new(&CRC_15_LTC681X);

pub fn pec15(data: &[u8]) -> u16 {
    PEC.checksum(data) << 1
}

/// Checks a block whose last two bytes are the big-endian PEC of the rest.
pub fn verify(block: &[u8]) -> bool {
    if block.len() < 2 {
        return false;
    }
    let (data, pec) = block.split_at(block.len() - 2);
    pec15(data).to_be_bytes() == [pec[0], pec[1]]
}
