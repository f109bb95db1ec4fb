//! Interrupt-driven UART0 TX/RX ring buffers.
//!
//! Mirrors the data model in the sample ring (`pipeline.rs` in the firmware
//! crate): two independent byte rings, each with a pair of free-running
//! `filled`/`drained` counters indexed modulo a power-of-two capacity. The
//! ISR is the sole writer of `rx_filled` and the sole reader of `tx_drained`;
//! task context is the sole writer of `tx_filled` and the sole reader of
//! `rx_drained`. No lock is needed because each counter has exactly one
//! writer.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};
use rp2040_pac as pac;

const RING_SIZE: usize = 128;

struct Ring {
    buf: UnsafeCell<[u8; RING_SIZE]>,
    filled: AtomicUsize,
    drained: AtomicUsize,
}

// Safety: `buf` is only ever written at index `filled % RING_SIZE` by the
// single writer of `filled`, and only ever read at index `drained % RING_SIZE`
// by the single writer of `drained`, and a writer never catches up to its own
// unread data because `filled - drained` is capped at RING_SIZE.
unsafe impl Sync for Ring {}

impl Ring {
    const fn new() -> Self {
        Ring {
            buf: UnsafeCell::new([0; RING_SIZE]),
            filled: AtomicUsize::new(0),
            drained: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.filled.load(Ordering::Acquire) - self.drained.load(Ordering::Acquire)
    }
}

pub struct Uart0 {
    uart: *const pac::uart0::RegisterBlock,
    tx: Ring,
    rx: Ring,
    rx_overruns: AtomicUsize,
}

unsafe impl Sync for Uart0 {}

impl Uart0 {
    pub const fn new(uart: *const pac::uart0::RegisterBlock) -> Self {
        Uart0 {
            uart,
            tx: Ring::new(),
            rx: Ring::new(),
            rx_overruns: AtomicUsize::new(0),
        }
    }

    fn regs(&self) -> &pac::uart0::RegisterBlock {
        unsafe { &*self.uart }
    }

    /// One-time peripheral bring-up: 115200 8N1, RX/RTS interrupts enabled.
    /// The TX interrupt is enabled only while there is data queued.
    pub fn setup(&self, peri_clock_hz: u32) {
        let baud = 115_200u32;
        let baud_rate_div = (8 * peri_clock_hz) / baud;
        let mut ibrd = baud_rate_div >> 7;
        let fbrd = ((baud_rate_div & 0x7f) + 1) / 2;
        if ibrd == 0 {
            ibrd = 1;
        }

        unsafe {
            self.regs().uartibrd().write(|w| w.bits(ibrd));
            self.regs().uartfbrd().write(|w| w.bits(fbrd));
        }
        self.regs().uartlcr_h().write(|w| unsafe {
            w.wlen().bits(0b11); // 8 bits
            w.fen().bit(true)
        });
        self.regs().uartcr().write(|w| {
            w.uarten().bit(true);
            w.txe().bit(true);
            w.rxe().bit(true)
        });
        unsafe {
            self.regs().uartimsc().write(|w| w.rxim().bit(true).rtim().bit(true));
        }
    }

    pub fn enable_tx_interrupt(&self) {
        self.regs().uartimsc().modify(|_, w| w.txim().bit(true));
    }

    fn disable_tx_interrupt(&self) {
        self.regs().uartimsc().modify(|_, w| w.txim().bit(false));
    }

    /// Interrupt handler body. Drains as many bytes as possible from the TX
    /// ring into the hardware FIFO, then drains the hardware RX FIFO into the
    /// RX ring, overwriting the newest byte and counting an overrun if the RX
    /// ring is full.
    pub fn isr(&self) {
        while self.regs().uartfr().read().txff().bit_is_clear() {
            let drained = self.tx.drained.load(Ordering::Relaxed);
            if drained == self.tx.filled.load(Ordering::Acquire) {
                break;
            }
            let byte = unsafe { (*self.tx.buf.get())[drained % RING_SIZE] };
            unsafe { self.regs().uartdr().write(|w| w.bits(byte as u32)) };
            self.tx.drained.store(drained + 1, Ordering::Release);
        }

        if self.tx.len() == 0 {
            self.disable_tx_interrupt();
        }

        while self.regs().uartfr().read().rxfe().bit_is_clear() {
            let byte = self.regs().uartdr().read().bits() as u8;
            let filled = self.rx.filled.load(Ordering::Relaxed);
            let drained = self.rx.drained.load(Ordering::Relaxed);
            if filled - drained >= RING_SIZE {
                // Ring full: overwrite the newest byte already queued rather
                // than drop the oldest one `pop_rx` (the other writer of
                // `drained`) is about to read next.
                unsafe { (*self.rx.buf.get())[(filled - 1) % RING_SIZE] = byte };
                self.rx_overruns.fetch_add(1, Ordering::Relaxed);
            } else {
                unsafe { (*self.rx.buf.get())[filled % RING_SIZE] = byte };
                self.rx.filled.store(filled + 1, Ordering::Release);
            }
        }
    }

    /// Copy as many bytes from `bytes` into the TX ring as there is room for,
    /// returning the count actually copied. Kicks the ISR by enabling the TX
    /// interrupt, which will fire immediately if the hardware FIFO has room.
    pub fn push_tx(&self, bytes: &[u8]) -> usize {
        let filled = self.tx.filled.load(Ordering::Relaxed);
        let drained = self.tx.drained.load(Ordering::Acquire);
        let free = RING_SIZE - (filled - drained);
        let n = free.min(bytes.len());

        for (i, &b) in bytes[..n].iter().enumerate() {
            unsafe { (*self.tx.buf.get())[(filled + i) % RING_SIZE] = b };
        }
        self.tx.filled.store(filled + n, Ordering::Release);
        self.enable_tx_interrupt();
        n
    }

    pub fn tx_empty(&self) -> bool {
        self.tx.len() == 0
    }

    pub fn tx_busy(&self) -> bool {
        self.regs().uartfr().read().busy().bit_is_set()
    }

    pub fn rx_available(&self) -> usize {
        self.rx.len()
    }

    /// Pop one byte from the RX ring, if any is available.
    pub fn pop_rx(&self) -> Option<u8> {
        let drained = self.rx.drained.load(Ordering::Relaxed);
        if drained == self.rx.filled.load(Ordering::Acquire) {
            return None;
        }
        let byte = unsafe { (*self.rx.buf.get())[drained % RING_SIZE] };
        self.rx.drained.store(drained + 1, Ordering::Release);
        Some(byte)
    }

    pub fn rx_overrun_count(&self) -> usize {
        self.rx_overruns.load(Ordering::Relaxed)
    }
}
