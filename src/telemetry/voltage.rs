//! Cell voltage decoding and open-wire detection.

use crate::config::{CELL_CHANNELS_PER_BOARD, OPEN_WIRE_THRESHOLD};

/// Cell codes are in units of 100 uV.
pub const fn decode_cell_code(code: u16) -> u16 {
    code / 10
}

/// Returns the open pins of one board as a bitmap, bit `k` for pin `Ck`.
///
/// Only the lowest `cells` inputs are wired, so pin `C{cells}` is the top of
/// the stack. Pin 0 is open when the pull-up pass of cell 0 reads zero, the
/// top pin when the pull-down pass of the last cell reads zero, and every pin
/// in between when the pull-up reading of the cell above it drops by more
/// than 400 mV against the pull-down reading.
pub fn detect_open_wires(
    pull_up: &[u16; CELL_CHANNELS_PER_BOARD],
    pull_down: &[u16; CELL_CHANNELS_PER_BOARD],
    cells: usize,
) -> u16 {
    if cells == 0 {
        return 0;
    }
    let cells = cells.min(CELL_CHANNELS_PER_BOARD);
    let mut open = 0u16;

    if pull_up[0] == 0 {
        open |= 1;
    }
    for pin in 1..cells {
        let delta = pull_up[pin] as i32 - pull_down[pin] as i32;
        if delta < OPEN_WIRE_THRESHOLD {
            open |= 1 << pin;
        }
    }
    if pull_down[cells - 1] == 0 {
        open |= 1 << cells;
    }
    open
}

/// A cell is affected when either of its two sense pins is open.
pub const fn cell_open_wire(open_pins: u16, channel: usize) -> bool {
    open_pins & (0b11 << channel) != 0
}
