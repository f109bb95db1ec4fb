//! Shared I2C bus arbitration.
//!
//! A single resource handle guards the sensor bus. The first `request()`
//! enables the peripheral clock and configures the SDA/SCL pins; the last
//! matching `release()` deconfigures them. Every sensor driver (RTC,
//! BME280, conductivity probe) follows the same `request` /
//! write-read-transact / optional unlock-sleep-lock across a settle delay /
//! `release` pattern.

use logger_bsp::gpio::{Function, Gpio};
use logger_bsp::i2c::{I2c0, I2cError};

use crate::sync::{Mutex, ResourceHandle};

const PIN_SDA: u8 = 16;
const PIN_SCL: u8 = 17;
const BAUD_HZ: u32 = 400_000;

pub static BUS: ResourceHandle = ResourceHandle::new();

pub struct I2cBus {
    i2c: I2c0,
    gpio: Gpio,
    peri_clock_hz: u32,
    traffic_lock: Mutex,
}

impl I2cBus {
    pub const fn new(i2c: I2c0, gpio: Gpio, peri_clock_hz: u32) -> Self {
        I2cBus {
            i2c,
            gpio,
            peri_clock_hz,
            traffic_lock: Mutex::new(),
        }
    }

    /// Power the bus up if this is the first concurrent user.
    pub fn request(&self) {
        BUS.request(|| {
            self.i2c.init(self.peri_clock_hz, BAUD_HZ);
            self.gpio.set_function(PIN_SDA, Function::I2c);
            self.gpio.set_function(PIN_SCL, Function::I2c);
            self.gpio.set_pull_up(PIN_SDA, true);
            self.gpio.set_pull_up(PIN_SCL, true);
        });
    }

    /// Tear the bus down if this was the last concurrent user.
    pub fn release(&self) {
        BUS.release(|| {
            self.i2c.deinit();
            self.gpio.set_function(PIN_SDA, Function::Null);
            self.gpio.set_function(PIN_SCL, Function::Null);
        });
    }

    /// Let another task interleave work across a sensor's settle delay:
    /// drop the traffic lock, run `during`, reacquire it.
    pub fn unlocked_during<R>(&self, during: impl FnOnce() -> R) -> R {
        self.traffic_lock.unlock();
        let result = during();
        self.traffic_lock.lock();
        result
    }

    pub fn write(&self, addr: u8, bytes: &[u8], send_stop: bool) -> Result<(), I2cError> {
        self.traffic_lock.lock();
        let result = self.i2c.write_blocking(addr, bytes, send_stop);
        self.traffic_lock.unlock();
        result
    }

    pub fn read(&self, addr: u8, dst: &mut [u8]) -> Result<(), I2cError> {
        self.traffic_lock.lock();
        let result = self.i2c.read_blocking(addr, dst);
        self.traffic_lock.unlock();
        result
    }

    pub fn write_then_read(&self, addr: u8, out: &[u8], dst: &mut [u8]) -> Result<(), I2cError> {
        self.traffic_lock.lock();
        let result = self
            .i2c
            .write_blocking(addr, out, false)
            .and_then(|_| self.i2c.read_blocking(addr, dst));
        self.traffic_lock.unlock();
        result
    }
}
