//! Mapping between pack-wide module indices and board channels.
//!
//! Modules are numbered board by board: module `m` sits on board
//! `m / MODULES_PER_BOARD` at cell channel `m % MODULES_PER_BOARD`. Its two
//! temperature sensors hang off the same channel number on mux A and mux B.

use crate::config::{MODULES_PER_BOARD, MUX_CHANNELS, NUM_BOARDS, NUM_MODULES, SENSORS_PER_MODULE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleLocation {
    pub board: usize,
    pub channel: usize,
}

pub const fn locate(module: usize) -> Option<ModuleLocation> {
    if module >= NUM_MODULES {
        return None;
    }
    Some(ModuleLocation {
        board: module / MODULES_PER_BOARD,
        channel: module % MODULES_PER_BOARD,
    })
}

pub const fn module_at(board: usize, channel: usize) -> Option<usize> {
    if board >= NUM_BOARDS || channel >= MODULES_PER_BOARD {
        return None;
    }
    let module = board * MODULES_PER_BOARD + channel;
    if module < NUM_MODULES { Some(module) } else { None }
}

/// Cell channels wired on a board.
pub const fn modules_on_board(board: usize) -> usize {
    let first = board * MODULES_PER_BOARD;
    if first >= NUM_MODULES {
        0
    } else if NUM_MODULES - first < MODULES_PER_BOARD {
        NUM_MODULES - first
    } else {
        MODULES_PER_BOARD
    }
}

/// Board-local temperature sensor indices of the module at `channel`.
pub const fn temperature_sensors(channel: usize) -> [usize; SENSORS_PER_MODULE] {
    [channel, channel + MUX_CHANNELS]
}

/// Inverse of [`temperature_sensors`]: the module and sensor slot a board
/// sensor belongs to.
pub const fn sensor_owner(board: usize, sensor: usize) -> Option<(usize, usize)> {
    let slot = sensor / MUX_CHANNELS;
    if slot >= SENSORS_PER_MODULE {
        return None;
    }
    match module_at(board, sensor % MUX_CHANNELS) {
        Some(module) => Some((module, slot)),
        None => None,
    }
}
