//! DMA channel configuration for the SPI1 (SD card) data path, including the
//! hardware CRC sniffer used to compute the SD card's CRC-16-CCITT trailer
//! for free while a block streams through DMA.
//!
//! Two channels are reserved: one drives words out to SPI1.DR, the other
//! drains words in from SPI1.DR. Only one direction is attached to the
//! sniffer at a time (RX on read, TX on write, matching which direction
//! actually carries the card's payload bytes).

use rp2040_pac as pac;

/// Sniffer CALC mode selecting CRC-16/CCITT (polynomial 0x1021), per the
/// RP2040 datasheet's DMA sniffer section.
const SNIFF_CALC_CRC16: u8 = 0x2;

const SPI1_DR_OFFSET: u32 = 0x008;

pub struct Dma {
    dma: *const pac::dma::RegisterBlock,
}

unsafe impl Sync for Dma {}

impl Dma {
    pub fn new(dma: *const pac::dma::RegisterBlock) -> Self {
        Dma { dma }
    }

    fn regs(&self) -> &pac::dma::RegisterBlock {
        unsafe { &*self.dma }
    }

    /// Start a channel moving `count` 16-bit words from `src` (or, if `src`
    /// is `None`, a single constant zero word with the read pointer held
    /// fixed) out to the SPI1 data register.
    pub fn spi1_tx_start(&self, channel: usize, src: Option<&[u16]>, count: u32, dreq: u8) {
        static ZERO_WORD: u16 = 0;
        let (addr, incr) = match src {
            Some(buf) => (buf.as_ptr() as u32, true),
            None => (&ZERO_WORD as *const u16 as u32, false),
        };

        let ch = self.regs().ch(channel);
        unsafe {
            ch.ch_read_addr().write(|w| w.bits(addr));
            ch.ch_write_addr()
                .write(|w| w.bits(pac::SPI1::ptr() as u32 + SPI1_DR_OFFSET));
            ch.ch_trans_count().write(|w| w.bits(count));
            ch.ch_ctrl_trig().write(|w| {
                w.data_size().size_halfword();
                w.incr_read().bit(incr);
                w.incr_write().bit(false);
                w.treq_sel().bits(dreq);
                w.chain_to().bits(channel as u8);
                w.en().bit(true)
            });
        }
    }

    /// Start a channel moving `count` 16-bit words in from the SPI1 data
    /// register into `dst`.
    pub fn spi1_rx_start(&self, channel: usize, dst: &mut [u16], dreq: u8) {
        let ch = self.regs().ch(channel);
        unsafe {
            ch.ch_read_addr()
                .write(|w| w.bits(pac::SPI1::ptr() as u32 + SPI1_DR_OFFSET));
            ch.ch_write_addr().write(|w| w.bits(dst.as_mut_ptr() as u32));
            ch.ch_trans_count().write(|w| w.bits(dst.len() as u32));
            ch.ch_ctrl_trig().write(|w| {
                w.data_size().size_halfword();
                w.incr_read().bit(false);
                w.incr_write().bit(true);
                w.treq_sel().bits(dreq);
                w.chain_to().bits(channel as u8);
                w.en().bit(true)
            });
        }
    }

    pub fn busy(&self, channel: usize) -> bool {
        self.regs().ch(channel).ch_ctrl_trig().read().busy().bit_is_set()
    }

    pub fn abort(&self, channel: usize) {
        unsafe { self.regs().chan_abort().write(|w| w.bits(1 << channel)) };
        while self.regs().chan_abort().read().bits() != 0 {}
    }

    /// Attach the CRC-16-CCITT sniffer to `channel`. `byte_swap` should be
    /// set when the channel's data leaves/arrives byte-swapped relative to
    /// wire order (true for writes, since 16-bit SPI words are transmitted
    /// MSB-first but DMA reads them little-endian from memory).
    pub fn sniffer_enable(&self, channel: usize, byte_swap: bool) {
        unsafe {
            self.regs().sniff_data().write(|w| w.bits(0));
            self.regs().sniff_ctrl().write(|w| {
                w.dmach().bits(channel as u8);
                w.calc().bits(SNIFF_CALC_CRC16);
                w.bswap().bit(byte_swap);
                w.en().bit(true)
            });
        }
    }

    pub fn sniffer_result(&self) -> u16 {
        (self.regs().sniff_data().read().bits() & 0xffff) as u16
    }

    pub fn sniffer_disable(&self) {
        unsafe { self.regs().sniff_ctrl().write(|w| w.en().bit(false)) };
    }
}
