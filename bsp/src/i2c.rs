//! I2C0 raw register driver (DesignWare IC core), used by the shared sensor
//! bus. Deliberately implements only what the sensor drivers need: addressed
//! byte writes, byte reads, and a combined write-then-repeated-start-read
//! transaction. Initialisation and teardown are exposed separately so the
//! bus resource handle in the firmware crate (`i2c_bus.rs`) can power the
//! peripheral on the 0->1 user transition and off on the 1->0 transition.

use rp2040_pac as pac;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum I2cError {
    NoAcknowledge,
    Timeout,
    ArbitrationLost,
}

pub struct I2c0 {
    i2c: *const pac::i2c0::RegisterBlock,
}

unsafe impl Sync for I2c0 {}

impl I2c0 {
    pub const fn new(i2c: *const pac::i2c0::RegisterBlock) -> Self {
        I2c0 { i2c }
    }

    fn regs(&self) -> &pac::i2c0::RegisterBlock {
        unsafe { &*self.i2c }
    }

    /// Bring the bus up at `baud_hz` (400 kHz for the sensor bus). Must be
    /// called with the peripheral held in reset and its clock already
    /// enabled by the caller.
    pub fn init(&self, peri_clock_hz: u32, baud_hz: u32) {
        self.regs().ic_enable().write(|w| w.enable().bit(false));

        self.regs().ic_con().write(|w| {
            w.master_mode().bit(true);
            w.ic_slave_disable().bit(true);
            w.ic_restart_en().bit(true);
            w.speed().fast()
        });

        self.regs().ic_rx_tl().write(|w| unsafe { w.bits(0) });
        self.regs().ic_tx_tl().write(|w| unsafe { w.bits(0) });

        // Fast mode timing, matching the pico-sdk's i2c_init division scheme.
        let period = (peri_clock_hz + baud_hz / 2) / baud_hz;
        let lcnt = period * 6 / 10;
        let hcnt = period - lcnt;
        unsafe {
            self.regs().ic_fs_scl_hcnt().write(|w| w.ic_fs_scl_hcnt().bits(hcnt as u16));
            self.regs().ic_fs_scl_lcnt().write(|w| w.ic_fs_scl_lcnt().bits(lcnt as u16));
            self.regs().ic_fs_spklen().write(|w| w.bits(((lcnt / 16).max(1)) as u8 as u32));
        }

        self.regs().ic_enable().write(|w| w.enable().bit(true));
    }

    pub fn deinit(&self) {
        self.regs().ic_enable().write(|w| w.enable().bit(false));
    }

    fn set_target(&self, addr: u8) {
        self.regs().ic_tar().write(|w| unsafe { w.ic_tar().bits(addr as u16) });
    }

    /// Write `bytes` to `addr`. `send_stop` controls whether a STOP is
    /// issued after the last byte (false when a repeated start into a read
    /// will follow).
    pub fn write_blocking(&self, addr: u8, bytes: &[u8], send_stop: bool) -> Result<(), I2cError> {
        self.set_target(addr);

        for (i, &byte) in bytes.iter().enumerate() {
            let last = i + 1 == bytes.len();
            while self.regs().ic_status().read().tfnf().bit_is_clear() {}
            unsafe {
                self.regs().ic_data_cmd().write(|w| {
                    w.dat().bits(byte);
                    w.stop().bit(last && send_stop);
                    w.restart().bit(false)
                });
            }
        }

        self.wait_tx_empty_checking_nack()
    }

    /// Read `dst.len()` bytes from `addr`, issuing a repeated start.
    pub fn read_blocking(&self, addr: u8, dst: &mut [u8]) -> Result<(), I2cError> {
        self.set_target(addr);

        for (i, _) in dst.iter().enumerate() {
            let last = i + 1 == dst.len();
            while self.regs().ic_status().read().tfnf().bit_is_clear() {}
            unsafe {
                self.regs().ic_data_cmd().write(|w| {
                    w.cmd().bit(true);
                    w.stop().bit(last);
                    w.restart().bit(i == 0)
                });
            }
        }

        for slot in dst.iter_mut() {
            while self.regs().ic_rxflr().read().bits() == 0 {
                self.check_nack()?;
            }
            *slot = self.regs().ic_data_cmd().read().dat().bits();
        }

        Ok(())
    }

    fn wait_tx_empty_checking_nack(&self) -> Result<(), I2cError> {
        while self.regs().ic_status().read().tfe().bit_is_clear() {
            self.check_nack()?;
        }
        self.check_nack()
    }

    fn check_nack(&self) -> Result<(), I2cError> {
        let raw = self.regs().ic_raw_intr_stat().read();
        if raw.tx_abrt().bit_is_set() {
            self.regs().ic_clr_tx_abrt().read();
            return Err(I2cError::NoAcknowledge);
        }
        Ok(())
    }
}
