// Provide a mapping for the controller GPIO pins

//
//| GPIO # | Name        | Description                                                    |
//| ------ | ----------- | -------------------------------------------------------------- |
//| 0      | RGBLED      | Data output for the five WS2812 status LEDs.                   |
//| 1      | CONTACTOR   | Contactor coil driver. Active high closes the pack contactor.  |
//| 2      | AFE_SCK     | SPI0 clock to the LTC6820 isoSPI bridge.                       |
//| 3      | AFE_MOSI    | SPI0 data out to the isoSPI bridge.                            |
//| 4      | AFE_MISO    | SPI0 data in from the isoSPI bridge.                           |
//| 5      | AFE_CS      | isoSPI bridge chip select. Active low.                         |
//| 12     | I2C0_SDA    | I2C0 data line to the M24128 EEPROM. Controller is primary.    |
//| 13     | I2C0_SCL    | I2C0 clock line to the M24128 EEPROM.                          |
//| 14     | I2C1_SDA    | I2C1 data line. Diagnostics host is primary.                   |
//| 15     | I2C1_SCL    | I2C1 clock line. Diagnostics host is primary.                  |
//| 26     | ISENSE      | Analog: hall-effect pack current sensor output.                |

use assign_resources::assign_resources;
use embassy_rp::peripherals;

assign_resources! {
  rgb_led: RGBLEDResources {
    dma_ch: DMA_CH0,
    pin: PIN_0,
    pio: PIO0,
  },
  contactor: ContactorResources {
    pin: PIN_1,
  },
  afe: AfeResources {
    spi: SPI0,
    sck: PIN_2,
    mosi: PIN_3,
    miso: PIN_4,
    cs: PIN_5,
    tx_dma: DMA_CH1,
    rx_dma: DMA_CH2,
  },
  eeprom: EepromResources {
    sda: PIN_12,
    scl: PIN_13,
    i2c: I2C0,
  },
  i2cs: I2CSecondaryResources {
    sda: PIN_14,
    scl: PIN_15,
    i2c: I2C1,
  },
  current_sense: CurrentSenseResources {
    adc: ADC,
    pin: PIN_26,
  },
  watchdog: WatchdogResources {
    watchdog: WATCHDOG,
  },
}
