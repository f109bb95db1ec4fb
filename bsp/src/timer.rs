//! Free-running 64-bit microsecond timer plus a small pool of four hardware
//! alarms, claimed and released on demand.
//!
//! Mirrors the pattern the original firmware uses for
//! `timer_hardware_alarm_claim_unused`: any task that needs to wait out a
//! future instant claims one of the four RP2040 alarms, arms it, enables its
//! bit in `INTE` so the raw interrupt-pending flag in `INTR` latches, but
//! deliberately leaves it disabled in the NVIC. Callers spin on
//! [`Timer::alarm_fired`] inside a cooperative yield loop rather than taking
//! a real interrupt for it; the flag still wakes a `wfe`-based idle wait
//! whenever some other, genuinely-enabled interrupt (UART RX, for instance)
//! happens to fire in the meantime. Four alarms are enough for every
//! concurrent waiter this core has (the idle/RTC cooperative sleep and the
//! sample pipeline's one-second tick are the only two that overlap in
//! practice), so claiming is a simple bitmask rather than a queue.
//!
//! This is a known rough edge inherited from the source firmware, not an
//! oversight here.

use core::sync::atomic::{AtomicU8, Ordering};
use rp2040_pac as pac;

static CLAIMED: AtomicU8 = AtomicU8::new(0);

pub struct Timer {
    timer: *const pac::timer::RegisterBlock,
}

unsafe impl Sync for Timer {}

impl Timer {
    pub const fn new(timer: *const pac::timer::RegisterBlock) -> Self {
        Timer { timer }
    }

    fn regs(&self) -> &pac::timer::RegisterBlock {
        unsafe { &*self.timer }
    }

    /// Microseconds since boot. Reading `TIMELR` first latches a matching
    /// snapshot of the upper half into `TIMEHR`, so the pair never tears.
    pub fn now_us(&self) -> u64 {
        let lo = self.regs().timelr().read().bits();
        let hi = self.regs().timehr().read().bits();
        ((hi as u64) << 32) | lo as u64
    }

    /// Claim an unused alarm (0..=3). Returns `None` if all four are
    /// presently held by other waiters; every claimant must match a claim
    /// with [`Self::release_alarm`] once it is done waiting.
    pub fn claim_alarm(&self) -> Option<u8> {
        let mut claimed = CLAIMED.load(Ordering::Relaxed);
        loop {
            let free = (0..4u8).find(|i| claimed & (1 << i) == 0)?;
            match CLAIMED.compare_exchange_weak(
                claimed,
                claimed | (1 << free),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(free),
                Err(now) => claimed = now,
            }
        }
    }

    pub fn release_alarm(&self, alarm: u8) {
        CLAIMED.fetch_and(!(1 << alarm), Ordering::Release);
    }

    /// Arm `alarm` for `target_us_lo` (the low 32 bits of a future
    /// `now_us()` value) and enable its raw interrupt bit. NVIC enable is
    /// left untouched; alarms claimed through this pool are meant to be
    /// polled, not vectored.
    pub fn arm_alarm_at(&self, alarm: u8, target_us_lo: u32) {
        unsafe {
            match alarm {
                0 => {
                    self.regs().inte().modify(|_, w| w.alarm_0().bit(true));
                    self.regs().alarm0().write(|w| w.bits(target_us_lo));
                }
                1 => {
                    self.regs().inte().modify(|_, w| w.alarm_1().bit(true));
                    self.regs().alarm1().write(|w| w.bits(target_us_lo));
                }
                2 => {
                    self.regs().inte().modify(|_, w| w.alarm_2().bit(true));
                    self.regs().alarm2().write(|w| w.bits(target_us_lo));
                }
                3 => {
                    self.regs().inte().modify(|_, w| w.alarm_3().bit(true));
                    self.regs().alarm3().write(|w| w.bits(target_us_lo));
                }
                _ => unreachable!("only four hardware alarms exist"),
            }
        }
    }

    pub fn alarm_fired(&self, alarm: u8) -> bool {
        let ints = self.regs().ints().read();
        match alarm {
            0 => ints.alarm_0().bit_is_set(),
            1 => ints.alarm_1().bit_is_set(),
            2 => ints.alarm_2().bit_is_set(),
            3 => ints.alarm_3().bit_is_set(),
            _ => unreachable!("only four hardware alarms exist"),
        }
    }

    /// Clear the raw interrupt flag and disable the alarm bit so a stale
    /// match cannot re-latch it. Does not release the claim; call
    /// [`Self::release_alarm`] separately once the waiter no longer needs
    /// this alarm at all.
    pub fn ack_and_disarm_alarm(&self, alarm: u8) {
        unsafe {
            match alarm {
                0 => {
                    self.regs().intr().write(|w| w.alarm_0().bit(true));
                    self.regs().inte().modify(|_, w| w.alarm_0().bit(false));
                }
                1 => {
                    self.regs().intr().write(|w| w.alarm_1().bit(true));
                    self.regs().inte().modify(|_, w| w.alarm_1().bit(false));
                }
                2 => {
                    self.regs().intr().write(|w| w.alarm_2().bit(true));
                    self.regs().inte().modify(|_, w| w.alarm_2().bit(false));
                }
                3 => {
                    self.regs().intr().write(|w| w.alarm_3().bit(true));
                    self.regs().inte().modify(|_, w| w.alarm_3().bit(false));
                }
                _ => unreachable!("only four hardware alarms exist"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn now_us_combines_halves_big_endian_of_value() {
        let hi: u64 = 0x0000_0002;
        let lo: u64 = 0xFFFF_FFF0;
        assert_eq!((hi << 32) | lo, 0x0002_FFFF_FFF0);
    }
}
