//! Sensor drivers, modelled uniformly as a request/wait/read transaction
//! over the shared I2C bus. The decoding math for any particular sensor is
//! out of scope here; each driver below does just enough register-level
//! protocol to produce a scaled integer reading.

pub mod bme280;
pub mod conductivity;

/// One sample's worth of scaled sensor fields, as stored in a pipeline
/// record. Units and scale match the CSV layout: thousandths of a degree
/// C, thousandths of a millibar, thousandths of a microsiemens/cm.
#[derive(Clone, Copy, Default)]
pub struct SensorFields {
    pub temperature_m_degc: i32,
    pub pressure_m_mbar: i32,
    pub conductivity_m_us_cm: i32,
}
