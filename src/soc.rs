//! Coulomb-counting state of charge.
//!
//! Charge is integrated exactly as milliamp-ticks. Once enough has
//! accumulated to make up a whole 0.01 % unit it moves into the fraction;
//! the remainder carries over to the next update, so nothing is lost to
//! rounding however short the control period is.

use crate::config::{MAX_CHARGE_MAH, SOC_ADDR, SOC_DEFAULT, SOC_FULL};
use crate::fault_log::PersistentStore;
use crate::safety::Verdict;

/// A monotonic source of elapsed time in ticks of a fixed frequency.
pub trait TickSource {
    /// Ticks since the previous call.
    fn elapsed_ticks(&mut self) -> u32;

    fn frequency_hz(&self) -> u32;
}

/// A hardware timer that counts down from its period and is reloaded by
/// software.
pub trait CountdownTimer {
    fn count(&self) -> u32;

    fn period(&self) -> u32;

    fn reload(&mut self);

    fn frequency_hz(&self) -> u32;
}

/// Turns a [`CountdownTimer`] into a [`TickSource`]. The timer is reloaded
/// after every read, so a read never sees a wrapped count.
pub struct DownCounter<T> {
    timer: T,
}

impl<T: CountdownTimer> DownCounter<T> {
    pub fn new(mut timer: T) -> Self {
        timer.reload();
        Self { timer }
    }
}

impl<T: CountdownTimer> TickSource for DownCounter<T> {
    fn elapsed_ticks(&mut self) -> u32 {
        let elapsed = self.timer.period().saturating_sub(self.timer.count());
        self.timer.reload();
        elapsed
    }

    fn frequency_hz(&self) -> u32 {
        self.timer.frequency_hz()
    }
}

pub struct SocEstimator<T> {
    ticks: T,
    fraction: u16,
    // mA * ticks not yet moved into the fraction
    accumulator: i64,
}

impl<T: TickSource> SocEstimator<T> {
    pub fn new(ticks: T, initial: u16) -> Self {
        Self {
            ticks,
            fraction: initial.min(SOC_FULL),
            accumulator: 0,
        }
    }

    /// mA * ticks that make up one 0.01 % unit.
    fn unit(&self) -> i64 {
        // MAX_CHARGE_MAH mA * 1 h at `f` Hz is MAX_CHARGE_MAH * 3600 * f
        // mA * ticks for SOC_FULL units.
        (MAX_CHARGE_MAH * 3600 * self.ticks.frequency_hz() as i64 / SOC_FULL as i64).max(1)
    }

    /// Integrates `current_ma` over the time since the previous update and
    /// returns the new fraction. Positive current charges the pack.
    pub fn update(&mut self, current_ma: i32) -> u16 {
        let elapsed = self.ticks.elapsed_ticks() as i64;
        self.accumulator += current_ma as i64 * elapsed;

        let unit = self.unit();
        let whole = self.accumulator / unit;
        if whole != 0 {
            self.accumulator -= whole * unit;
            let fraction = (self.fraction as i64 + whole).clamp(0, SOC_FULL as i64);
            self.fraction = fraction as u16;
            trace!("soc {=u16} after {=i64} units", self.fraction, whole);
        }
        self.fraction
    }

    /// Pins the estimate on a voltage fault: empty on undervoltage, full on
    /// overvoltage. Other verdicts leave it alone.
    pub fn calibrate(&mut self, trigger: Verdict) {
        let fraction = match trigger {
            Verdict::Undervoltage => 0,
            Verdict::Overvoltage => SOC_FULL,
            _ => return,
        };
        self.fraction = fraction;
        self.accumulator = 0;
        info!("soc calibrated to {=u16}", fraction);
    }

    /// Operator override in 0.01 % units.
    pub fn set_accum(&mut self, value: u16) {
        self.fraction = value.min(SOC_FULL);
        self.accumulator = 0;
    }

    /// State of charge in 0.01 % units.
    pub fn percent(&self) -> u16 {
        self.fraction
    }

    #[cfg(test)]
    pub(crate) fn ticks_mut(&mut self) -> &mut T {
        &mut self.ticks
    }
}

/// Reads the persisted fraction, falling back to the default when the
/// record is missing or out of range.
pub async fn load_persisted<S: PersistentStore>(store: &mut S) -> Result<u16, S::Error> {
    let mut raw = [0u8; 2];
    store.read_range(SOC_ADDR, &mut raw).await?;
    let value = u16::from_le_bytes(raw);
    if value > SOC_FULL {
        debug!("no persisted soc, using {=u16}", SOC_DEFAULT);
        Ok(SOC_DEFAULT)
    } else {
        Ok(value)
    }
}

pub async fn persist<S: PersistentStore>(store: &mut S, value: u16) -> Result<(), S::Error> {
    store
        .write_range(SOC_ADDR, &value.min(SOC_FULL).to_le_bytes())
        .await
}
