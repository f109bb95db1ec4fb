//! SD card block driver, SPI mode.
//!
//! Reproduces the SD Association's SPI-mode command protocol: the CMD0 /
//! CMD8 / CMD59 / CMD55+ACMD41 / CMD58 / CMD16 bring-up handshake, block
//! reads via CMD17/CMD18 (+CMD12 to stop a multi-block read), and
//! multi-block writes via CMD25 with per-block CRC16 framing. Command
//! framing uses CRC7; data framing uses CRC16-CCITT computed by the DMA
//! sniffer as the block streams past, so the CRC costs nothing beyond the
//! transfer itself.
//!
//! Card pinout: SCK=GPIO10, MOSI=GPIO11, MISO=GPIO12, CS=GPIO15 — chosen,
//! per the original board notes, so the same four pins could later carry a
//! 4-bit SDIO mode without rewiring.

use rp2040_hal::pio::PIOExt;

use logger_bsp::dma::Dma;
use logger_bsp::gpio::{Function, Gpio};
use logger_bsp::pio_ready::PioReady;
use logger_bsp::spi::Spi1;

use crate::error::{CoreError, CoreResult};
use crate::kernel;

const PIN_SCK: u8 = 10;
const PIN_MOSI: u8 = 11;
const PIN_MISO: u8 = 12;
const PIN_CS: u8 = 15;

// RP2040 DREQ table (datasheet §2.5.3): SPI1 TX/RX data requests.
const DREQ_SPI1_TX: u8 = 18;
const DREQ_SPI1_RX: u8 = 19;

const DMA_CHANNEL_DATA: usize = 0;
const DMA_CHANNEL_FILLER: usize = 1;

/// View a 512-byte block buffer as 256 16-bit words, matching the SPI
/// peripheral's 16-bit frame mode used for the DMA-driven data phase.
fn as_word_buf(block: &mut [u8]) -> &mut [u16] {
    debug_assert_eq!(block.len(), 512);
    unsafe { core::slice::from_raw_parts_mut(block.as_mut_ptr().cast::<u16>(), 256) }
}

const TOKEN_DATA: u8 = 0xFE;
const TOKEN_START_BLOCK: u8 = 0xFC;
const TOKEN_STOP_TRAN: u8 = 0xFD;

const DATA_RESPONSE_ACCEPTED: u8 = 0b00101;
const DATA_RESPONSE_CRC_ERROR: u8 = 0b01011;

pub struct Card {
    spi: Spi1,
    dma: Dma,
    gpio: Gpio,
    baud_rate_reduction: u32,
    requested_baud_hz: u32,
}

impl Card {
    pub const fn new(spi: Spi1, dma: Dma, gpio: Gpio) -> Self {
        Card {
            spi,
            dma,
            gpio,
            baud_rate_reduction: 0,
            requested_baud_hz: 0,
        }
    }

    fn cs_low(&self) {
        self.gpio.set_low(PIN_CS);
    }

    fn cs_high(&self) {
        self.gpio.set_high(PIN_CS);
    }

    fn spi_exchange_byte(&self, out: u8) -> u8 {
        self.spi.exchange_byte(out)
    }

    fn r1_response(&self) -> u8 {
        let mut result = 0xFFu8;
        let mut attempts = 0;
        while result == 0xFF && attempts < 8 {
            result = self.spi_exchange_byte(0xFF);
            attempts += 1;
        }
        result
    }

    fn send_command(&self, cmd: u8, arg: u32) {
        let mut msg = [
            cmd | 0x40,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            0x01,
        ];
        msg[5] |= crc7_left_shifted(&msg[..5]);
        for byte in msg {
            self.spi_exchange_byte(byte);
        }
    }

    fn command_and_r1(&self, cmd: u8, arg: u32) -> u8 {
        self.send_command(cmd, arg);
        self.r1_response()
    }

    /// Wait for the card to release MISO. Tries a short SPI poll first;
    /// falls back to the PIO-assisted interrupt wait for the long internal
    /// programming delays that show up after writes.
    fn wait_for_card_ready<P: PIOExt>(&mut self, pio: &mut PioReady<P>) {
        for _ in 0..16 {
            if self.spi_exchange_byte(0xFF) == 0xFF {
                return;
            }
        }

        self.gpio.set_function(PIN_SCK, Function::Pio0);
        self.gpio.set_function(PIN_MOSI, Function::Pio0);
        self.gpio.set_function(PIN_MISO, Function::Pio0);

        let sm = pio.start(PIN_SCK, PIN_MOSI, PIN_MISO, 1, 0);

        cortex_m::asm::sev();
        while !pio.interrupt_fired() {
            kernel::yield_now();
        }
        pio.finish(sm);

        self.gpio.set_function(PIN_SCK, Function::Spi);
        self.gpio.set_function(PIN_MOSI, Function::Spi);
        self.gpio.set_function(PIN_MISO, Function::Spi);
    }

    /// Card bring-up: power the bus at 100-400 kbit/s and walk the full
    /// CMD0/CMD8/CMD59/CMD55+ACMD41/CMD58/CMD16 handshake, raising the
    /// clock to the requested baud partway through. Runs once, on the
    /// resource handle's 0->1 transition.
    pub fn init(&mut self, peri_clock_hz: u32) -> CoreResult<()> {
        self.spi.enable(peri_clock_hz, 400_000);
        self.gpio.set_function(PIN_SCK, Function::Spi);
        self.gpio.set_function(PIN_MOSI, Function::Spi);
        self.gpio.set_function(PIN_MISO, Function::Spi);
        self.gpio.set_dir_out(PIN_CS);
        self.cs_high();

        self.cs_low();
        self.spi_exchange_byte(0xFF);
        self.cs_high();
        for _ in 0..10 {
            self.spi_exchange_byte(0xFF);
        }

        let mut ipass = 0;
        loop {
            if ipass > 1024 {
                self.spi.disable();
                return Err(CoreError::TransientBus);
            }
            self.cs_low();
            let r1 = self.command_and_r1(0, 0);
            self.cs_high();
            if r1 == 0x01 {
                break;
            }
            cortex_m::asm::sev();
            kernel::yield_now();
            ipass += 1;
        }

        let mut ipass = 0;
        loop {
            if ipass > 3 {
                self.spi.disable();
                return Err(CoreError::TransientBus);
            }
            self.cs_low();
            let r1 = self.command_and_r1(8, 0x1AA);
            if r1 != 0x01 {
                self.cs_high();
                ipass += 1;
                continue;
            }
            let echo = self.receive_u32_be();
            self.cs_high();
            if echo == 0x1AA {
                break;
            }
            ipass += 1;
        }

        self.cs_low();
        let r1 = self.command_and_r1(59, 1);
        self.cs_high();
        if r1 > 1 {
            self.spi.disable();
            return Err(CoreError::TransientBus);
        }

        let mut ipass = 0;
        loop {
            if ipass > 2500 {
                self.spi.disable();
                return Err(CoreError::TransientBus);
            }
            self.cs_low();
            let cmd55 = self.command_and_r1(55, 0);
            self.cs_high();
            if cmd55 > 1 {
                ipass += 1;
                continue;
            }
            self.cs_low();
            let acmd41 = self.command_and_r1(41, 1 << 30);
            self.cs_high();
            if acmd41 == 0 {
                break;
            }
            ipass += 1;
        }

        self.spi.disable();
        self.requested_baud_hz = peri_clock_hz / (2 + self.baud_rate_reduction);
        self.spi.enable(peri_clock_hz, self.requested_baud_hz);

        self.cs_low();
        let r1 = self.command_and_r1(58, 0);
        if r1 > 1 {
            self.cs_high();
            self.spi.disable();
            return Err(CoreError::TransientBus);
        }
        let _ocr = self.receive_u32_be();
        self.cs_high();

        self.cs_low();
        let r1 = self.command_and_r1(16, 512);
        self.cs_high();
        if r1 > 1 {
            self.spi.disable();
            return Err(CoreError::TransientBus);
        }

        Ok(())
    }

    /// Raise `baud_rate_reduction` (peripheral clock / (2 + reduction) is
    /// the resulting baud) and re-run [`Self::init`]. Used when repeated
    /// transient failures suggest the bus is running faster than this card
    /// or this wiring can sustain.
    pub fn retry_at_lower_baud(&mut self, peri_clock_hz: u32) -> CoreResult<()> {
        self.baud_rate_reduction += 1;
        self.init(peri_clock_hz)
    }

    pub fn teardown(&mut self) {
        self.spi.disable();
    }

    fn receive_u32_be(&self) -> u32 {
        let mut bytes = [0u8; 4];
        for b in &mut bytes {
            *b = self.spi_exchange_byte(0xFF);
        }
        u32::from_be_bytes(bytes)
    }

    pub fn read_blocks<P: PIOExt>(
        &mut self,
        pio: &mut PioReady<P>,
        dst: &mut [u8],
        sector: u64,
        blocks: u32,
    ) -> CoreResult<()> {
        debug_assert_eq!(dst.len(), 512 * blocks as usize);

        self.cs_low();
        self.wait_for_card_ready(pio);

        let cmd = if blocks > 1 { 18 } else { 17 };
        if self.command_and_r1(cmd, sector as u32) != 0 {
            self.cs_high();
            return Err(CoreError::TransientBus);
        }

        for iblock in 0..blocks as usize {
            let block = &mut dst[iblock * 512..(iblock + 1) * 512];

            let mut result = 0xFFu8;
            while result == 0xFF {
                result = self.spi_exchange_byte(0xFF);
            }
            if result != TOKEN_DATA {
                self.cs_high();
                return Err(CoreError::TransientBus);
            }

            self.spi.set_frame_size_16(true);

            // The master must keep clocking to receive anything, so a
            // filler channel drives a constant 0xFFFF out while the data
            // channel captures the card's reply; the sniffer rides the
            // capture channel, unswapped (wire order already matches).
            self.dma.spi1_tx_start(DMA_CHANNEL_FILLER, None, 256, DREQ_SPI1_TX);
            self.dma.sniffer_enable(DMA_CHANNEL_DATA, false);
            self.dma
                .spi1_rx_start(DMA_CHANNEL_DATA, as_word_buf(block), DREQ_SPI1_RX);
            while self.dma.busy(DMA_CHANNEL_DATA) {
                kernel::yield_now();
            }
            let crc_computed = self.dma.sniffer_result();
            self.dma.sniffer_disable();

            let mut crc_bytes = [0u8; 2];
            self.spi.read_bytes(&mut crc_bytes);
            let crc_received = u16::from_be_bytes(crc_bytes);

            self.spi.set_frame_size_16(false);

            if crc_received != crc_computed {
                self.cs_high();
                return Err(CoreError::TransientBus);
            }
        }

        if blocks > 1 {
            self.send_command(12, 0);
            self.spi_exchange_byte(0xFF);
            let _ = self.r1_response();
            self.wait_for_card_ready(pio);
        }

        self.cs_high();
        Ok(())
    }

    pub fn write_blocks_start<P: PIOExt>(
        &mut self,
        pio: &mut PioReady<P>,
        sector: u64,
    ) -> CoreResult<()> {
        self.cs_low();
        self.wait_for_card_ready(pio);
        if self.command_and_r1(25, sector as u32) != 0 {
            self.cs_high();
            return Err(CoreError::TransientBus);
        }
        self.spi_exchange_byte(0xFF);
        Ok(())
    }

    /// `src == None` writes `count` all-zero blocks: the DMA source is a
    /// single zero word with its read-address increment disabled, so no
    /// 512-byte zero buffer ever needs to exist.
    pub fn write_some_blocks<P: PIOExt>(
        &mut self,
        pio: &mut PioReady<P>,
        src: Option<&[u8]>,
        count: u32,
    ) -> CoreResult<()> {
        for iblock in 0..count as usize {
            let block: Option<&[u16]> = src.map(|s| {
                let bytes = &s[iblock * 512..(iblock + 1) * 512];
                unsafe { core::slice::from_raw_parts(bytes.as_ptr().cast::<u16>(), 256) }
            });

            while self.spi.is_busy() {}
            self.spi_exchange_byte(TOKEN_START_BLOCK);
            while self.spi.is_busy() {}

            self.spi.set_frame_size_16(true);
            self.dma.sniffer_enable(DMA_CHANNEL_DATA, true);
            self.dma
                .spi1_tx_start(DMA_CHANNEL_DATA, block, 256, DREQ_SPI1_TX);
            while self.dma.busy(DMA_CHANNEL_DATA) {
                kernel::yield_now();
            }
            let crc = self.dma.sniffer_result();
            self.dma.sniffer_disable();

            while self.spi.is_busy() {
                cortex_m::asm::sev();
                kernel::yield_now();
            }

            self.spi.write_bytes(&crc.to_be_bytes());

            while self.spi.is_busy() {}
            self.spi.set_frame_size_16(false);

            let response = self.spi_exchange_byte(0xFF) & 0b11111;

            self.wait_for_card_ready(pio);

            if response == DATA_RESPONSE_CRC_ERROR {
                return Err(CoreError::TransientBus);
            }
            if response != DATA_RESPONSE_ACCEPTED {
                return Err(CoreError::TransientBus);
            }
        }
        Ok(())
    }

    pub fn write_blocks_end<P: PIOExt>(&mut self, pio: &mut PioReady<P>) {
        self.spi_exchange_byte(TOKEN_STOP_TRAN);
        self.spi_exchange_byte(0xFF);
        self.wait_for_card_ready(pio);
        self.cs_high();
    }

    /// ACMD23, a hint that the next `count` blocks will be written as one
    /// extent so the card can pre-erase them.
    pub fn pre_erase<P: PIOExt>(&mut self, pio: &mut PioReady<P>, blocks: u32) -> CoreResult<()> {
        self.cs_low();
        self.wait_for_card_ready(pio);
        let cmd55 = self.command_and_r1(55, 0);
        self.cs_high();
        if cmd55 > 1 {
            return Err(CoreError::TransientBus);
        }

        self.cs_low();
        self.wait_for_card_ready(pio);
        let acmd23 = self.command_and_r1(23, blocks);
        self.cs_high();
        if acmd23 != 0 {
            return Err(CoreError::TransientBus);
        }
        Ok(())
    }
}

/// Command CRC7: polynomial 0x89, MSB-first, left-shifted so the low bit
/// lands as the (always 1) stop bit expected on the wire.
pub fn crc7_left_shifted(message: &[u8]) -> u8 {
    const POLYNOMIAL: u8 = 0b1000_1001;
    let mut crc = 0u8;
    for &byte in message {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ (POLYNOMIAL << 1)
            } else {
                crc << 1
            };
        }
    }
    crc & 0xFE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc7_of_cmd0_matches_known_value() {
        // CMD0 with argument 0, as sent to every card at power-up.
        let msg = [0x40, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc7_left_shifted(&msg[..5]) | 0x01, 0x95);
    }

    #[test]
    fn crc7_of_cmd8_matches_known_value() {
        let msg = [0x48, 0x00, 0x00, 0x01, 0xAA, 0x01];
        assert_eq!(crc7_left_shifted(&msg[..5]) | 0x01, 0x87);
    }
}
