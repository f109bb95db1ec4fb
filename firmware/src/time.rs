//! Reference epoch: the pair of numbers that converts the free-running
//! uptime counter into Unix time, plus the cooperative sleep and
//! one-second-boundary wait built on top of it.
//!
//! `wall_clock_us_now = uptime_us_now - uptime_us_at_ref + unix_us_at_ref`.
//! Both halves of the pair are written together, with no `yield` between the
//! two stores, so under cooperative scheduling no reader ever observes one
//! half updated and not the other.

use core::cell::Cell;

use logger_bsp::timer::Timer;

use crate::kernel;

struct Epoch {
    uptime_us_at_ref: Cell<u64>,
    unix_us_at_ref: Cell<u64>,
}

unsafe impl Sync for Epoch {}

static EPOCH: Epoch = Epoch {
    uptime_us_at_ref: Cell::new(0),
    unix_us_at_ref: Cell::new(0),
};

/// Prime the reference epoch. Called by the RTC and NMEA sync paths; until
/// the first call, [`unix_us_now`] returns plain uptime (Unix epoch zero).
pub fn set_reference(uptime_us_at_ref: u64, unix_us_at_ref: u64) {
    EPOCH.uptime_us_at_ref.set(uptime_us_at_ref);
    EPOCH.unix_us_at_ref.set(unix_us_at_ref);
}

#[cfg(test)]
pub fn reference() -> (u64, u64) {
    (EPOCH.uptime_us_at_ref.get(), EPOCH.unix_us_at_ref.get())
}

/// Convert a previously-taken `timer.now_us()` snapshot to Unix
/// microseconds, without touching the hardware again. Lets a caller that
/// already snapshotted uptime (to pin a record's timestamp to the instant
/// its fields were sampled, say) convert that exact instant rather than a
/// freshly re-read one.
pub fn unix_us_from_uptime(uptime_us: u64) -> u64 {
    uptime_us
        .wrapping_sub(EPOCH.uptime_us_at_ref.get())
        .wrapping_add(EPOCH.unix_us_at_ref.get())
}

pub fn unix_us_now(timer: &Timer) -> u64 {
    unix_us_from_uptime(timer.now_us())
}

/// Cooperative sleep: claim a hardware alarm, arm it for `delay_us` from
/// now, then yield until it has fired. Other tasks run in the meantime; the
/// parent's own yield sleeps the processor between passes.
pub fn sleep_us(timer: &Timer, delay_us: u32) {
    let alarm = timer.claim_alarm().expect("no free hardware alarm for sleep_us");
    let target = timer.now_us().wrapping_add(delay_us as u64) as u32;
    timer.arm_alarm_at(alarm, target);

    while !timer.alarm_fired(alarm) {
        kernel::yield_now();
    }
    timer.ack_and_disarm_alarm(alarm);
    timer.release_alarm(alarm);
}

pub fn sleep_ms(timer: &Timer, delay_ms: u32) {
    sleep_us(timer, delay_ms.saturating_mul(1000));
}

/// Arm for, and wait out, the next one-second boundary of wall-clock time,
/// returning the Unix microseconds at that boundary. Used both by the
/// sample producer's per-tick cadence and by [`crate::rtc::sys_to_rtc`],
/// which needs to start its register write right at a boundary.
pub fn wait_until_next_second_boundary(timer: &Timer) -> u64 {
    let now = unix_us_now(timer);
    let next_boundary_unix_us = next_second_boundary(now);
    let uptime_at_boundary =
        next_boundary_unix_us - EPOCH.unix_us_at_ref.get() + EPOCH.uptime_us_at_ref.get();

    let alarm = timer.claim_alarm().expect("no free hardware alarm for boundary wait");
    timer.arm_alarm_at(alarm, uptime_at_boundary as u32);
    while !timer.alarm_fired(alarm) {
        kernel::yield_now();
    }
    timer.ack_and_disarm_alarm(alarm);
    timer.release_alarm(alarm);

    next_boundary_unix_us
}

/// The next one-second boundary at least 100ms out from `now_us`, so a
/// caller timing a transaction to land exactly on the boundary (the RTC's
/// one-shot register write, in practice) always has a full ~1-1.1s of lead
/// rather than risking well under 100ms if `now_us` already sits just shy of
/// a boundary.
fn next_second_boundary(now_us: u64) -> u64 {
    ((now_us + 1_100_000) / 1_000_000) * 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_second_boundary_keeps_at_least_a_tenth_second_of_lead() {
        assert_eq!(next_second_boundary(1_000_000_000), 1_001_000_000);
        assert_eq!(next_second_boundary(1_000_000_001), 1_001_000_000);
        // Within the last 100ms before a boundary, the nearest one no longer
        // offers enough lead, so this skips ahead to the one after.
        assert_eq!(next_second_boundary(1_000_900_000), 1_002_000_000);
        assert_eq!(next_second_boundary(1_000_999_999), 1_002_000_000);
    }
}
