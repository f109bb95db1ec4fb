//! Clock tree bring-up.
//!
//! Mirrors the shape of a typical RCC wrapper: take ownership of the clock
//! peripherals once at boot, run the crystal/PLL bring-up sequence, and hand
//! back a small `Clocks` value the rest of the board support code can read
//! frequencies from without re-deriving them.

use rp2040_hal::clocks::{ClocksManager, InitError};
use rp2040_hal::pac;
use rp2040_hal::Watchdog;

/// Crystal frequency on the reference board, in Hz.
pub const XOSC_CRYSTAL_FREQ: u32 = 12_000_000;

#[derive(Copy, Clone, Debug)]
pub struct Clocks {
    sys_hz: u32,
    peri_hz: u32,
}

impl Clocks {
    /// System clock frequency. Exposed alongside `peri_hz` for any future
    /// consumer that needs to derive a divisor from it (the PIO busy-wait's
    /// clock divisor is presently a fixed `1.0`, not derived from this).
    pub fn sys_hz(&self) -> u32 {
        self.sys_hz
    }

    /// Peripheral clock frequency, used for SPI/UART/I2C baud rate division.
    pub fn peri_hz(&self) -> u32 {
        self.peri_hz
    }
}

pub struct Rcc {
    clocks: pac::CLOCKS,
    pll_sys: pac::PLL_SYS,
    pll_usb: pac::PLL_USB,
    xosc: pac::XOSC,
}

impl Rcc {
    pub fn new(
        clocks: pac::CLOCKS,
        pll_sys: pac::PLL_SYS,
        pll_usb: pac::PLL_USB,
        xosc: pac::XOSC,
    ) -> Self {
        Rcc {
            clocks,
            pll_sys,
            pll_usb,
            xosc,
        }
    }

    /// Bring up the crystal oscillator and both PLLs, then derive the
    /// peripheral and system clocks from them.
    ///
    /// Unsafety: this function must be called exactly once from the main
    /// context, before any other task has started.
    pub unsafe fn setup(
        self,
        watchdog: &mut Watchdog,
        resets: &mut pac::RESETS,
    ) -> Result<(ClocksManager, Clocks), InitError> {
        let clocks_mgr = rp2040_hal::clocks::init_clocks_and_plls(
            XOSC_CRYSTAL_FREQ,
            self.xosc,
            self.clocks,
            self.pll_sys,
            self.pll_usb,
            resets,
            watchdog,
        )?;

        let clocks = Clocks {
            sys_hz: clocks_mgr.system_clock.freq().to_Hz(),
            peri_hz: clocks_mgr.peripheral_clock.freq().to_Hz(),
        };

        Ok((clocks_mgr, clocks))
    }
}
