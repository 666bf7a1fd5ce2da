pub const I2C_ADDR: u8 = 0x6d; // I2C address of the diagnostics secondary interface

pub const CONTROL_PERIOD_MS: u64 = 100; // ms; one monitor cycle per tick
pub const WATCHDOG_TIMEOUT_MS: u64 = 1_000; // ms; hardware watchdog, started after the startup gate

pub const AFE_SPI_FREQUENCY: u32 = 1_000_000; // Hz; LTC6811 isoSPI master side

// Hall-effect current sensor on ADC0, bidirectional around mid-rail.
// Positive readings are charging current.
pub const CURRENT_ZERO_COUNTS: f32 = 2048.0; // ADC counts at 0 A
pub const CURRENT_MA_PER_COUNT: f32 = 244.14; // mA per ADC count, +-500 A over the 12-bit range
pub const CURRENT_SAMPLE_PERIOD_MS: u64 = 10; // ms
pub const CURRENT_AVERAGE_SAMPLES: usize = 8;
// A published reading older than this is treated as a sensor failure
pub const CURRENT_STALE_MS: u64 = 50; // ms

pub const DEFAULT_LED_BRIGHTNESS: u8 = 0x30;
pub const LED_FRAME_PERIOD_MS: u64 = 10; // ms

pub const FW_VERSION_STR: &str = "0.1.0-a1";
