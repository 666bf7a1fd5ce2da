//! Thermistor front-end transfer function.

// Quadratic fit of the sensor output voltage around 30 degC
const LINEAR: f32 = 13.582;
const QUADRATIC: f32 = 0.00433;
const OFFSET_MV: f32 = 2230.8;
const OFFSET_C: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TemperatureDomainError {
    NegativeDiscriminant,
    NonFinite,
}

/// Auxiliary codes are in units of 100 uV.
pub fn decode_aux_code(code: u16) -> f32 {
    code as f32 * 0.1
}

/// Converts a sensor voltage to milli-degrees Celsius, truncated toward zero.
pub fn millivolts_to_millicelsius(millivolts: f32) -> Result<i32, TemperatureDomainError> {
    if !millivolts.is_finite() {
        return Err(TemperatureDomainError::NonFinite);
    }
    let discriminant = LINEAR * LINEAR + 4.0 * QUADRATIC * (OFFSET_MV - millivolts);
    if discriminant < 0.0 {
        return Err(TemperatureDomainError::NegativeDiscriminant);
    }
    let celsius = (LINEAR - libm::sqrtf(discriminant)) / (2.0 * -QUADRATIC) + OFFSET_C;
    Ok((celsius * 1000.0) as i32)
}
