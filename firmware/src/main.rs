#![no_std]
#![no_main]

use bevolt_bps::{Limits, Ltc6811Link, Monitor, eeprom::M24128};
use defmt::{error, info};
use embassy_embedded_hal::shared_bus::asynch::spi::SpiDevice;
use embassy_executor::Spawner;
use embassy_rp::{
    bind_interrupts,
    gpio::{Level, Output},
    i2c,
    peripherals::{I2C0, SPI0},
    spi::{self, Spi},
    watchdog::Watchdog,
};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use embassy_time::Delay;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

mod config;
mod config_resources;
mod led_patterns;
mod tasks;

use crate::config_resources::{AfeResources, AssignedResources, EepromResources};
use crate::tasks::state_machine::{BpsMonitor, ContactorOutput, HardwareWatchdog, UptimeTicks};

bind_interrupts!(struct Irqs {
    I2C0_IRQ => i2c::InterruptHandler<I2C0>;
});

pub type AfeBus = Mutex<NoopRawMutex, Spi<'static, SPI0, spi::Async>>;
pub type AfeSpi = SpiDevice<'static, NoopRawMutex, Spi<'static, SPI0, spi::Async>, Output<'static>>;
pub type EepromI2c = i2c::I2c<'static, I2C0, i2c::Async>;

static AFE_BUS: StaticCell<AfeBus> = StaticCell::new();

fn afe_spi(r: AfeResources) -> AfeSpi {
    // LTC6820 bridge: SPI mode 3
    let mut config = spi::Config::default();
    config.frequency = config::AFE_SPI_FREQUENCY;
    config.phase = spi::Phase::CaptureOnSecondTransition;
    config.polarity = spi::Polarity::IdleHigh;

    let bus = Spi::new(r.spi, r.sck, r.mosi, r.miso, r.tx_dma, r.rx_dma, config);
    let bus = AFE_BUS.init(Mutex::new(bus));
    SpiDevice::new(bus, Output::new(r.cs, Level::High))
}

fn eeprom(r: EepromResources) -> M24128<EepromI2c, Delay> {
    let i2c = i2c::I2c::new_async(r.i2c, r.scl, r.sda, Irqs, i2c::Config::default());
    M24128::new(i2c, Delay)
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    let r = split_resources!(p);

    info!("Starting BeVolt BPS {}", config::FW_VERSION_STR);

    // Open before anything else so a boot failure leaves the pack isolated
    let contactor = ContactorOutput::new(r.contactor);
    let watchdog = HardwareWatchdog::new(Watchdog::new(r.watchdog.watchdog));

    info!("Bringing up the monitor...");

    let link = Ltc6811Link::new(afe_spi(r.afe), Delay);
    let monitor: BpsMonitor = match Monitor::new(
        link,
        Delay,
        eeprom(r.eeprom),
        UptimeTicks::new(),
        Limits::DEFAULT,
    )
    .await
    {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("Monitor bring-up failed: {}", defmt::Debug2Format(&e));
            return;
        }
    };

    info!("Monitor up.");

    // Spawn the async tasks
    spawner
        .spawn(tasks::current_sense::current_sense_task(r.current_sense))
        .unwrap();

    spawner
        .spawn(tasks::indicator::indicator_task(r.rgb_led))
        .unwrap();

    spawner
        .spawn(tasks::i2c_secondary::i2c_secondary_task(r.i2cs))
        .unwrap();

    spawner
        .spawn(tasks::state_machine::state_machine_task(
            monitor, contactor, watchdog,
        ))
        .unwrap();
}
