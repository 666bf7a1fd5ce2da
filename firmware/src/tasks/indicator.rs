use bevolt_bps::{Indication, Indicator};
use defmt::{debug, info};
use embassy_executor::task;
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::PIO0;
use embassy_rp::pio::{Instance, InterruptHandler, Pio};
use embassy_rp::pio_programs::ws2812::{PioWs2812, PioWs2812Program};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Ticker};
use smart_leds::{RGB8, brightness, gamma};

use crate::config::{DEFAULT_LED_BRIGHTNESS, LED_FRAME_PERIOD_MS};
use crate::config_resources::RGBLEDResources;
use crate::led_patterns::{NUM_LEDS, render};

/// Latest indication from the monitor. Only the newest one matters.
pub static INDICATION: Signal<CriticalSectionRawMutex, Indication> = Signal::new();

/// [`Indicator`] that hands the indication to the LED task.
pub struct SignalIndicator;

impl Indicator for SignalIndicator {
    fn show(&mut self, indication: Indication) {
        INDICATION.signal(indication);
    }
}

struct StatusLeds<'d, P: Instance, const S: usize> {
    ws2812: PioWs2812<'d, P, S, NUM_LEDS>,
    data: [RGB8; NUM_LEDS],
    indication: Option<Indication>,
    since: Instant,
    brightness: u8,
}

impl<'d, P: Instance, const S: usize> StatusLeds<'d, P, S> {
    fn new(ws2812: PioWs2812<'d, P, S, NUM_LEDS>, brightness: u8) -> Self {
        Self {
            ws2812,
            data: [RGB8::default(); NUM_LEDS],
            indication: None,
            since: Instant::now(),
            brightness,
        }
    }

    fn set_indication(&mut self, indication: Indication) {
        if self.indication != Some(indication) {
            debug!("Indication changed to {}", indication);
            self.indication = Some(indication);
            self.since = Instant::now();
        }
    }

    async fn update(&mut self) {
        render(self.indication, self.since.elapsed().as_millis(), &mut self.data);

        let mut output_data = [RGB8::default(); NUM_LEDS];
        let corrected = brightness(gamma(self.data.iter().cloned()), self.brightness);
        for (out, color) in output_data.iter_mut().zip(corrected) {
            *out = color;
        }

        self.ws2812.write(&output_data).await;
    }
}

#[task]
pub async fn indicator_task(r: RGBLEDResources) {
    info!("Initializing indicator task");
    let Pio {
        mut common, sm0, ..
    } = Pio::new(r.pio, Irqs);

    bind_interrupts!(struct Irqs {
        PIO0_IRQ_0 => InterruptHandler<PIO0>;
    });

    let program = PioWs2812Program::new(&mut common);
    let ws2812 = PioWs2812::new(&mut common, sm0, r.dma_ch, r.pin, &program);

    let mut leds = StatusLeds::new(ws2812, DEFAULT_LED_BRIGHTNESS);

    let mut ticker = Ticker::every(Duration::from_millis(LED_FRAME_PERIOD_MS));

    info!("Indicator task initialized");

    loop {
        if let Some(indication) = INDICATION.try_take() {
            leds.set_indication(indication);
        }

        ticker.next().await;
        leds.update().await;
    }
}
