//! BME280 temperature/pressure/humidity sensor, I2C address 0x76.
//!
//! Decoding math (the Bosch compensation formulas) is out of scope; this
//! driver does just enough to trigger a forced-mode measurement, wait out
//! the conversion time, and hand back the two raw ADC codes this core
//! actually reports (temperature, pressure). Calibration-coefficient
//! compensation is left to a caller that cares about absolute accuracy;
//! the console's `bme280` command reports raw codes for diagnostics.

use crate::i2c_bus::I2cBus;
use crate::kernel;

const ADDR: u8 = 0x76;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_PRESS_MSB: u8 = 0xF7;

/// Ask for one forced-mode measurement (temperature + pressure
/// oversampling x1), let other tasks run across the ~10 ms conversion
/// time, then read back the raw ADC codes.
pub fn request_and_read(bus: &I2cBus) -> Result<(i32, i32), ()> {
    bus.request();

    let result = (|| {
        // oversampling x1 on both temperature and pressure, forced mode
        bus.write(ADDR, &[REG_CTRL_MEAS, 0b001_001_01], true).map_err(|_| ())?;

        bus.unlocked_during(|| {
            for _ in 0..10 {
                kernel::yield_now();
            }
        });

        let mut raw = [0u8; 6];
        bus.write_then_read(ADDR, &[REG_PRESS_MSB], &mut raw).map_err(|_| ())?;

        let press_raw = (raw[0] as i32) << 12 | (raw[1] as i32) << 4 | (raw[2] as i32) >> 4;
        let temp_raw = (raw[3] as i32) << 12 | (raw[4] as i32) << 4 | (raw[5] as i32) >> 4;
        Ok((temp_raw, press_raw))
    })();

    bus.release();
    result
}
