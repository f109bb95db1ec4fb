//! SPI1 raw register driver, used exclusively for the SD card bus.
//!
//! This is deliberately low-level: it knows how to enable the peripheral at
//! a given baud rate, flip between 8-bit and 16-bit frame size (the SD block
//! transfer path uses 16-bit frames so a single DMA transfer moves a whole
//! 512-byte block in 256 words), and push/pull bytes by hand for the command
//! phase. DMA-driven block transfers are set up by `sdcard.rs` using the
//! `dma` module directly against this peripheral's data register.

use rp2040_pac as pac;

pub struct Spi1 {
    spi: *const pac::spi0::RegisterBlock,
}

unsafe impl Sync for Spi1 {}

impl Spi1 {
    pub fn new(spi1: *const pac::spi0::RegisterBlock) -> Self {
        Spi1 { spi: spi1 }
    }

    fn regs(&self) -> &pac::spi0::RegisterBlock {
        unsafe { &*self.spi }
    }

    /// Enable the bus at `baud_hz`, SPI mode 0, 8-bit frames.
    pub fn enable(&self, peri_clock_hz: u32, baud_hz: u32) {
        let cpsdvsr = Self::clock_divisor(peri_clock_hz, baud_hz);

        self.regs().sspcr1().write(|w| w.sse().bit(false));
        self.regs().sspcpsr().write(|w| unsafe { w.cpsdvsr().bits(cpsdvsr) });
        self.regs().sspcr0().write(|w| unsafe {
            w.dss().bits(0b0111); // 8 bit
            w.spo().bit(false);
            w.sph().bit(false);
            w.scr().bits(0)
        });
        self.regs().sspcr1().write(|w| w.sse().bit(true).ms().bit(true));
    }

    pub fn disable(&self) {
        self.regs().sspcr1().write(|w| w.sse().bit(false));
    }

    /// Smallest even divisor such that `peri_clock_hz / cpsdvsr <= baud_hz`.
    fn clock_divisor(peri_clock_hz: u32, baud_hz: u32) -> u8 {
        let mut div = 2u32;
        while peri_clock_hz / div > baud_hz && div < 254 {
            div += 2;
        }
        div as u8
    }

    /// Switch the frame size between 8 and 16 bits without touching the
    /// clock configuration, used around DMA block transfers.
    pub fn set_frame_size_16(&self, sixteen: bool) {
        self.regs().sspcr0().modify(|_, w| unsafe {
            w.dss().bits(if sixteen { 0b1111 } else { 0b0111 })
        });
    }

    pub fn is_busy(&self) -> bool {
        self.regs().sspsr().read().bsy().bit_is_set()
    }

    pub fn tx_fifo_not_full(&self) -> bool {
        self.regs().sspsr().read().tnf().bit_is_set()
    }

    pub fn rx_fifo_not_empty(&self) -> bool {
        self.regs().sspsr().read().rne().bit_is_set()
    }

    /// Blocking single byte exchange: write one byte, wait for and return
    /// the byte clocked back in. Used for the command/response phase and for
    /// the busy-wait fast path (`wait_for_card_ready`'s first 16 bytes).
    pub fn exchange_byte(&self, out: u8) -> u8 {
        while !self.tx_fifo_not_full() {}
        unsafe { self.regs().sspdr().write(|w| w.bits(out as u32)) };
        while !self.rx_fifo_not_empty() {}
        self.regs().sspdr().read().bits() as u8
    }

    pub fn write_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            self.exchange_byte(b);
        }
    }

    pub fn read_bytes(&self, dst: &mut [u8]) {
        for slot in dst.iter_mut() {
            *slot = self.exchange_byte(0xff);
        }
    }
}
