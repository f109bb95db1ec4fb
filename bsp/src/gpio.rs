//! Minimal direct-register GPIO control.
//!
//! The core drives individual pins at a very high rate (chip-select toggles
//! around every SD command, PIO takeover of the SPI pins) so this wraps the
//! raw SIO/IO_BANK0/PADS_BANK0 registers directly rather than going through
//! the HAL's typestate pin API, the same way the SPI and DMA modules do.

use rp2040_hal::pac;

/// GPIO function select values, as encoded in IO_BANK0 GPIOx_CTRL.FUNCSEL.
#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub enum Function {
    Spi = 1,
    Uart = 2,
    I2c = 3,
    Pio0 = 6,
    Pio1 = 7,
    Sio = 5,
    Null = 0x1f,
}

#[derive(Clone, Copy)]
pub struct Gpio {
    sio: *const pac::sio::RegisterBlock,
    io_bank0: *const pac::io_bank0::RegisterBlock,
    pads_bank0: *const pac::pads_bank0::RegisterBlock,
}

// Safety: this wraps raw peripheral base addresses, which are valid for the
// lifetime of the program and are never aliased mutably from interrupt
// context (GPIO state changes only happen from task context).
unsafe impl Sync for Gpio {}

impl Gpio {
    /// Construct from the three peripherals' fixed register addresses
    /// (e.g. `pac::SIO::ptr()`), not by casting a reference to the PAC's
    /// zero-sized ownership token — the token's own address has nothing to
    /// do with where its registers live.
    pub fn new(
        sio: *const pac::sio::RegisterBlock,
        io_bank0: *const pac::io_bank0::RegisterBlock,
        pads_bank0: *const pac::pads_bank0::RegisterBlock,
    ) -> Self {
        Gpio { sio, io_bank0, pads_bank0 }
    }

    fn sio(&self) -> &pac::sio::RegisterBlock {
        unsafe { &*self.sio }
    }

    fn io_bank0(&self) -> &pac::io_bank0::RegisterBlock {
        unsafe { &*self.io_bank0 }
    }

    fn pads_bank0(&self) -> &pac::pads_bank0::RegisterBlock {
        unsafe { &*self.pads_bank0 }
    }

    pub fn set_high(&self, pin: u8) {
        unsafe { self.sio().gpio_out_set().write(|w| w.bits(1 << pin)) };
    }

    pub fn set_low(&self, pin: u8) {
        unsafe { self.sio().gpio_out_clr().write(|w| w.bits(1 << pin)) };
    }

    pub fn is_high(&self, pin: u8) -> bool {
        (self.sio().gpio_in().read().bits() >> pin) & 1 != 0
    }

    pub fn set_dir_out(&self, pin: u8) {
        unsafe { self.sio().gpio_oe_set().write(|w| w.bits(1 << pin)) };
    }

    pub fn set_dir_in(&self, pin: u8) {
        unsafe { self.sio().gpio_oe_clr().write(|w| w.bits(1 << pin)) };
    }

    pub fn set_function(&self, pin: u8, function: Function) {
        self.io_bank0().gpio(pin as usize).gpio_ctrl().write(|w| unsafe {
            w.funcsel().bits(function as u8)
        });
    }

    pub fn set_pull_up(&self, pin: u8, enabled: bool) {
        self.pads_bank0().gpio(pin as usize).modify(|_, w| w.pue().bit(enabled));
    }

    pub fn set_input_enabled(&self, pin: u8, enabled: bool) {
        self.pads_bank0().gpio(pin as usize).modify(|_, w| w.ie().bit(enabled));
    }
}
