use bevolt_bps::Indication;
use bevolt_bps::safety::Violations;
use smart_leds::RGB8;
use smart_leds::colors::*;

pub const NUM_LEDS: usize = 5;

const BOOT_CYCLE_MS: u64 = 1280;
const FAULT_BLINK_MS: u64 = 250;
const LOCKOUT_BLINK_MS: u64 = 500;

/// Input a value 0 to 255 to get a color value
/// The colours are a transition r - g - b - back to r.
fn wheel(mut wheel_pos: u8) -> RGB8 {
    wheel_pos = 255 - wheel_pos;
    if wheel_pos < 85 {
        return (255 - wheel_pos * 3, 0, wheel_pos * 3).into();
    }
    if wheel_pos < 170 {
        wheel_pos -= 85;
        return (0, wheel_pos * 3, 255 - wheel_pos * 3).into();
    }
    wheel_pos -= 170;
    (wheel_pos * 3, 255 - wheel_pos * 3, 0).into()
}

/// One marker LED per fault category. Unmarked LEDs stay dim red.
const FAULT_MARKERS: [(Violations, usize); NUM_LEDS] = [
    (Violations::OVERVOLTAGE, 0),
    (Violations::UNDERVOLTAGE, 1),
    (Violations::OVER_TEMPERATURE, 2),
    (Violations::OVER_CURRENT, 3),
    (Violations::DANGER, 4),
];

fn blink_on(t_ms: u64, half_period_ms: u64) -> bool {
    (t_ms / half_period_ms) % 2 == 0
}

/// Renders one frame. `None` is the boot pattern shown until the monitor
/// reports its first indication.
pub fn render(indication: Option<Indication>, t_ms: u64, leds: &mut [RGB8; NUM_LEDS]) {
    match indication {
        None => {
            let j = ((t_ms % BOOT_CYCLE_MS) / 5) as usize;
            for (i, led) in leds.iter_mut().enumerate() {
                *led = wheel(((i * 256 / NUM_LEDS + j) & 255) as u8);
            }
        }
        Some(Indication::Run) => leds.fill(GREEN),
        Some(Indication::Fault { violations, .. }) => {
            leds.fill(DARK_RED);
            let marker = if blink_on(t_ms, FAULT_BLINK_MS) { RED } else { BLACK };
            for (flag, led) in FAULT_MARKERS {
                if violations.contains(flag) {
                    leds[led] = marker;
                }
            }
        }
        Some(Indication::WatchdogLockout) => {
            let (even, odd) = if blink_on(t_ms, LOCKOUT_BLINK_MS) {
                (RED, BLUE)
            } else {
                (BLUE, RED)
            };
            for (i, led) in leds.iter_mut().enumerate() {
                *led = if i % 2 == 0 { even } else { odd };
            }
        }
    }
}
