//! The sample pipeline: a producer task that polls the sensors once a
//! second and a consumer task that drains the resulting records to a CSV
//! file on the SD card, joined by a small fixed-size ring and a subscriber
//! count that starts and stops the producer on demand.
//!
//! The producer is the sole writer of the ring's `written` index and the
//! sole reader of the subscriber count; the consumer is the sole writer of
//! its own local read cursor. Neither ever blocks on the other directly:
//! the producer publishes a slot by storing `written` with `Release`
//! ordering only after every field of that slot has been written, and the
//! consumer's `Acquire` load of `written` is the only synchronisation this
//! pipeline needs. A consumer slow enough to fall more than a ring's worth
//! of records behind notices the gap and fast-forwards, logging how many
//! it skipped, rather than reading a slot the producer has already
//! overwritten.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use logger_bsp::gpio::Gpio;
use logger_bsp::timer::Timer;

use crate::card;
use crate::console::Console;
use crate::csv;
use crate::fatfs::FatEngine;
use crate::i2c_bus::I2cBus;
use crate::kernel;
use crate::sensors::{bme280, conductivity, SensorFields};
use crate::time;

/// Ring capacity. Must be a power of two. Four matches the reference
/// firmware: enough in-flight slack for one slow consumer pass without
/// growing the static footprint.
const RING_LEN: usize = 4;
const RING_MASK: usize = RING_LEN - 1;

#[derive(Clone, Copy)]
struct Record {
    timestamp_us: u64,
    fields: SensorFields,
}

const EMPTY_RECORD: Record = Record {
    timestamp_us: 0,
    fields: SensorFields {
        temperature_m_degc: 0,
        pressure_m_mbar: 0,
        conductivity_m_us_cm: 0,
    },
};

struct Ring {
    slots: UnsafeCell<[Record; RING_LEN]>,
    written: AtomicU64,
}

unsafe impl Sync for Ring {}

impl Ring {
    const fn new() -> Self {
        Ring {
            slots: UnsafeCell::new([EMPTY_RECORD; RING_LEN]),
            written: AtomicU64::new(0),
        }
    }

    /// Producer-only: write the next slot, then publish it.
    fn publish(&self, record: Record) {
        let index = self.written.load(Ordering::Relaxed) as usize & RING_MASK;
        unsafe { (*self.slots.get())[index] = record };
        self.written.fetch_add(1, Ordering::Release);
    }

    fn written_index(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Consumer-only. Caller must already know `index < written_index()`.
    fn read(&self, index: u64) -> Record {
        let slot = index as usize & RING_MASK;
        unsafe { (*self.slots.get())[slot] }
    }
}

static RING: Ring = Ring::new();
static SUBSCRIBERS: AtomicU8 = AtomicU8::new(0);

const SAMPLE_STACK_WORDS: usize = 512;
const RECORD_STACK_WORDS: usize = 512;

pub static SAMPLE_TASK: kernel::Task<SAMPLE_STACK_WORDS> = kernel::Task::new();
pub static RECORD_TASK: kernel::Task<RECORD_STACK_WORDS> = kernel::Task::new();

/// Present subscriber count, for the console's `tasks` diagnostic.
pub fn subscriber_count() -> u8 {
    SUBSCRIBERS.load(Ordering::Relaxed)
}

/// Register interest in sample data flowing. If this is the transition
/// from zero to one, the caller (the main task; children may not start
/// other tasks in this kernel) must also `kernel::start` [`SAMPLE_TASK`]
/// and [`RECORD_TASK`].
pub fn subscribe() -> u8 {
    SUBSCRIBERS.fetch_add(1, Ordering::Relaxed) + 1
}

/// The producer checks this count on its next one-second tick and exits
/// once it reaches zero; there is no need to wake it specially.
pub fn unsubscribe() -> u8 {
    SUBSCRIBERS.fetch_sub(1, Ordering::Relaxed) - 1
}

/// The producer's body: poll the sensors once a second and publish a
/// record, until the subscriber count drops to zero. `bus` is the shared
/// I2C bus the sensor drivers transact over.
pub fn run_producer(timer: &Timer, bus: &I2cBus) {
    let alarm = match timer.claim_alarm() {
        Some(a) => a,
        None => return,
    };

    let mut next_tick_us = timer.now_us().wrapping_add(1_000_000);
    timer.arm_alarm_at(alarm, next_tick_us as u32);
    let mut conductivity_pending = false;

    loop {
        while !timer.alarm_fired(alarm) {
            kernel::yield_now();
        }
        let uptime_at_tick = timer.now_us();
        timer.ack_and_disarm_alarm(alarm);

        if subscriber_count() == 0 {
            break;
        }

        next_tick_us = next_tick_us.wrapping_add(1_000_000);
        timer.arm_alarm_at(alarm, next_tick_us as u32);

        let mut fields = SensorFields::default();
        if let Ok((temp_raw, press_raw)) = bme280::request_and_read(bus) {
            // Compensating the raw ADC codes into calibrated engineering
            // units is sensor-specific math this core does not implement
            // (see sensors::bme280); a deployment that needs calibrated
            // values substitutes that compensation in here.
            fields.temperature_m_degc = temp_raw;
            fields.pressure_m_mbar = press_raw;
        }

        // The conductivity read is pipelined one tick behind: collect the
        // result requested last tick, then fire this tick's request so it
        // is ready by the time the next tick comes around.
        if conductivity_pending {
            if let Ok(value) = conductivity::collect(bus) {
                fields.conductivity_m_us_cm = value;
            }
        }
        conductivity_pending = conductivity::request_read(bus).is_ok();

        RING.publish(Record {
            timestamp_us: time::unix_us_from_uptime(uptime_at_tick),
            fields,
        });
        cortex_m::asm::sev();
    }

    timer.release_alarm(alarm);
}

/// The consumer's body: allocate the next `NNNNNN.csv` file and drain
/// published records to it as CSV lines until the subscriber count has
/// gone to zero and every published record has been drained.
pub fn run_consumer<E: FatEngine>(engine: &mut E, gpio: &Gpio, timer: &Timer, console: &Console) {
    if card::request(engine, gpio, timer).is_err() {
        console.write(b"record: card not ready\n");
        return;
    }

    let opened = card::allocate_next_file(engine);
    let mut file = match opened {
        Ok((_, file)) => file,
        Err(_) => {
            console.write(b"record: could not allocate a file name\n");
            card::release(engine, gpio);
            return;
        }
    };
    card::LOCK.unlock();

    let mut read = RING.written_index();

    loop {
        while RING.written_index() == read {
            if subscriber_count() == 0 {
                break;
            }
            kernel::yield_now();
        }
        if RING.written_index() == read {
            break;
        }

        let written = RING.written_index();
        let behind = written - read;
        if behind > (RING_LEN - 1) as u64 {
            let missed = behind - (RING_LEN - 1) as u64;
            announce_missed(console, missed);
            read = written - (RING_LEN - 1) as u64;
        }

        let record = RING.read(read);
        read += 1;

        let mut line = [0u8; csv::RECORD_LEN];
        csv::format_record(record.timestamp_us, &record.fields, &mut line);

        card::LOCK.lock();
        let _ = engine.write(&mut file, &line);
        card::LOCK.unlock();
    }

    card::LOCK.lock();
    let _ = engine.close(file);
    card::release(engine, gpio);
}

fn announce_missed(console: &Console, missed: u64) {
    let mut digits = [0u8; 20];
    let len = csv::format_u64_decimal(missed, &mut digits);

    let mut msg = [0u8; 40];
    msg[0..7].copy_from_slice(b"missed ");
    msg[7..7 + len].copy_from_slice(&digits[..len]);
    msg[7 + len..7 + len + 9].copy_from_slice(b" records\n");

    console.write(&msg[..7 + len + 9]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_publishes_and_reads_back_in_order() {
        let ring = Ring::new();
        for i in 0..3u64 {
            ring.publish(Record {
                timestamp_us: i,
                fields: SensorFields::default(),
            });
        }
        assert_eq!(ring.written_index(), 3);
        assert_eq!(ring.read(0).timestamp_us, 0);
        assert_eq!(ring.read(1).timestamp_us, 1);
        assert_eq!(ring.read(2).timestamp_us, 2);
    }

    #[test]
    fn ring_wraps_past_its_capacity() {
        let ring = Ring::new();
        for i in 0..(RING_LEN as u64 * 2 + 1) {
            ring.publish(Record {
                timestamp_us: i,
                fields: SensorFields::default(),
            });
        }
        let last = RING_LEN as u64 * 2;
        assert_eq!(ring.read(last).timestamp_us, last);
    }

    #[test]
    fn subscribe_and_unsubscribe_track_a_plain_count() {
        assert_eq!(subscribe(), subscriber_count());
        let before = subscriber_count();
        assert_eq!(unsubscribe(), before - 1);
    }
}
