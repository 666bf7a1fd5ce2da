use bevolt_bps::{CurrentSample, CurrentSensor};
use defmt::*;
use embassy_executor::task;
use embassy_rp::{
    adc::{Adc, Channel, Config, InterruptHandler},
    bind_interrupts,
    gpio::Pull,
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::{Duration, Instant, Ticker};

use crate::config::{
    CURRENT_AVERAGE_SAMPLES, CURRENT_MA_PER_COUNT, CURRENT_SAMPLE_PERIOD_MS, CURRENT_STALE_MS,
    CURRENT_ZERO_COUNTS,
};
use crate::config_resources::CurrentSenseResources;

/// Averaged pack current and when it was taken.
#[derive(Clone, Copy, Format)]
pub struct CurrentReading {
    pub milliamps: i32,
    pub taken: Instant,
}

/// Written by the current sense task, read by the monitor cycle. `None`
/// until the first sample.
pub static CURRENT: Mutex<CriticalSectionRawMutex, Option<CurrentReading>> = Mutex::new(None);

#[derive(Clone, Copy, Debug, Format, PartialEq, Eq)]
pub enum CurrentSenseError {
    NoSample,
    /// The sense task stopped publishing, usually on ADC errors.
    Stale,
}

/// [`CurrentSensor`] view of the published reading.
pub struct PublishedCurrent;

impl CurrentSensor for PublishedCurrent {
    type Error = CurrentSenseError;

    async fn sample(&mut self) -> Result<CurrentSample, Self::Error> {
        let reading = (*CURRENT.lock().await).ok_or(CurrentSenseError::NoSample)?;
        if reading.taken.elapsed() > Duration::from_millis(CURRENT_STALE_MS) {
            return Err(CurrentSenseError::Stale);
        }
        Ok(CurrentSample::from_milliamps(reading.milliamps))
    }
}

struct AveragedInput {
    samples: [f32; CURRENT_AVERAGE_SAMPLES],
    index: usize,
    sum: f32,
    count: usize,
}

impl AveragedInput {
    fn new() -> Self {
        Self {
            samples: [0.0; CURRENT_AVERAGE_SAMPLES],
            index: 0,
            sum: 0.0,
            count: 0,
        }
    }

    fn add_sample(&mut self, value: f32) {
        if self.count < CURRENT_AVERAGE_SAMPLES {
            self.count += 1;
        } else {
            self.sum -= self.samples[self.index];
        }
        self.samples[self.index] = value;
        self.sum += value;
        self.index = (self.index + 1) % CURRENT_AVERAGE_SAMPLES;
    }

    fn average(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f32
        }
    }
}

fn counts_to_milliamps(counts: f32) -> i32 {
    ((counts - CURRENT_ZERO_COUNTS) * CURRENT_MA_PER_COUNT) as i32
}

bind_interrupts!(struct Irqs {
    ADC_IRQ_FIFO => InterruptHandler;
});

#[task]
pub async fn current_sense_task(r: CurrentSenseResources) {
    info!("Starting current sense task");
    let mut adc = Adc::new(r.adc, Irqs, Config::default());
    let mut isense = Channel::new_pin(r.pin, Pull::None);

    let mut ticker = Ticker::every(Duration::from_millis(CURRENT_SAMPLE_PERIOD_MS));
    let mut average = AveragedInput::new();

    info!("Current sense task initialized");

    loop {
        ticker.next().await;

        let counts = match adc.read(&mut isense).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Current sense ADC read failed: {}", e);
                continue;
            }
        };
        average.add_sample(counts as f32);

        let reading = CurrentReading {
            milliamps: counts_to_milliamps(average.average()),
            taken: Instant::now(),
        };
        *CURRENT.lock().await = Some(reading);
        trace!("Pack current: {} mA", reading.milliamps);
    }
}
