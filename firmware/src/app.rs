//! Board wiring: owns every peripheral singleton and the console command
//! dispatch that ties the core's pieces into one running device.
//!
//! None of this is part of the core's testable surface — the interactive
//! command parser is explicitly "trivial glue" per the core's own scope —
//! but a firmware image needs it to exist. Each branch below calls straight
//! into an operation the core already specifies; this module adds no policy
//! of its own.

use core::sync::atomic::{AtomicU8, Ordering};

use rp2040_hal::pac;
use rp2040_hal::pac::interrupt;
use rp2040_hal::pio::PIOExt;
use rtt_target::rprintln;

use logger_bsp::clocks::Rcc;
use logger_bsp::dma::Dma;
use logger_bsp::gpio::Gpio;
use logger_bsp::i2c::I2c0;
use logger_bsp::pio_ready::PioReady;
use logger_bsp::spi::Spi1;
use logger_bsp::timer::Timer;
use logger_bsp::uart::Uart0;

use crate::blockdev::Shim;
use crate::card;
use crate::console::Console;
use crate::csv;
use crate::fatfs::Unimplemented;
use crate::i2c_bus::I2cBus;
use crate::kernel;
use crate::pipeline;
use crate::rtc;
use crate::sdcard::Card;
use crate::sensors::{bme280, conductivity};
use crate::time;

/// The console's UART lives at a fixed register address known at link
/// time, so it can be a genuine `'static` the way [`Console::new`] needs —
/// no `Peripherals::take()` required for a raw register pointer. `Console`
/// itself still goes through the singleton lifecycle below: its
/// line-assembly state is plain, non-`Cell` fields, so reading a line
/// genuinely needs `&mut Console`, which a shared `static` cannot give out.
static UART0: Uart0 = Uart0::new(pac::UART0::PTR);

/// Board singletons a zero-argument task entry point cannot capture by
/// closure (see [`kernel::start`]'s `fn()` signature): written once during
/// [`setup`], read thereafter through the accessors below. Mirrors the
/// "set of singletons with an explicit initialise-at-boot lifecycle" the
/// core's own design notes call for in place of a C firmware's weak-symbol
/// globals.
static mut CONSOLE: Option<Console> = None;
static mut I2C_BUS: Option<I2cBus> = None;
static mut CARD: Option<Shim<pac::PIO0>> = None;
static mut ENGINE: Option<Unimplemented> = None;

static VERBOSITY: AtomicU8 = AtomicU8::new(0);

fn console() -> &'static Console {
    unsafe { CONSOLE.as_ref().expect("setup() must run before any task starts") }
}

fn console_mut() -> &'static mut Console {
    unsafe { CONSOLE.as_mut().expect("setup() must run before any task starts") }
}

fn i2c_bus() -> &'static I2cBus {
    unsafe { I2C_BUS.as_ref().expect("setup() must run before any task starts") }
}

fn engine() -> &'static mut Unimplemented {
    unsafe { ENGINE.as_mut().expect("setup() must run before any task starts") }
}

/// Recreate a cheap `Copy` handle to the shared GPIO registers from their
/// fixed addresses. Sound because `Gpio` holds nothing but raw register
/// pointers (see `logger_bsp::gpio`) and every method it exposes is safe
/// for any number of outstanding handles under cooperative (non-preemptive)
/// scheduling.
fn gpio_handle() -> Gpio {
    Gpio::new(pac::SIO::ptr(), pac::IO_BANK0::ptr(), pac::PADS_BANK0::ptr())
}

/// One-time board bring-up: clock tree, peripheral ownership, singleton
/// construction, NVIC wiring. Must run exactly once, from `main`, before
/// [`kernel::start`] is called for anything.
///
/// # Safety
/// Must run before any interrupt is unmasked and before any task is
/// started; writes the singletons above without synchronisation, which is
/// sound only because nothing else can be reading them yet.
pub unsafe fn setup(mut pac: pac::Peripherals) {
    let mut watchdog = rp2040_hal::Watchdog::new(pac.WATCHDOG);
    let rcc = Rcc::new(pac.CLOCKS, pac.PLL_SYS, pac.PLL_USB, pac.XOSC);
    let (_clocks_mgr, clocks) = rcc
        .setup(&mut watchdog, &mut pac.RESETS)
        .expect("clock tree bring-up failed");

    let gpio = gpio_handle();

    UART0.setup(clocks.peri_hz());
    cortex_m::peripheral::NVIC::unmask(pac::Interrupt::UART0_IRQ);
    CONSOLE = Some(Console::new(&UART0));

    let i2c = I2c0::new(pac::I2C0::PTR);
    I2C_BUS = Some(I2cBus::new(i2c, gpio, clocks.peri_hz()));

    let spi1 = Spi1::new(pac::SPI1::ptr());
    let dma = Dma::new(pac::DMA::ptr());
    let sd_card = Card::new(spi1, dma, gpio);

    let (pio0, sm0, _, _, _) = pac.PIO0.split(&mut pac.RESETS);
    let pio_ready = PioReady::new(pio0, sm0);

    CARD = Some(Shim::new(sd_card, pio_ready, clocks.peri_hz()));
    ENGINE = Some(Unimplemented);

    kernel::set_sleep_hook(|| {
        cortex_m::asm::dsb();
        cortex_m::asm::wfe();
    });

    rprintln!("logger firmware: board bring-up complete");
}

fn producer_entry() {
    let timer = Timer::new(pac::TIMER::PTR);
    pipeline::run_producer(&timer, i2c_bus());
}

fn consumer_entry() {
    let gpio = gpio_handle();
    let timer = Timer::new(pac::TIMER::PTR);
    pipeline::run_consumer(engine(), &gpio, &timer, console());
}

/// Read and dispatch one console line, if one is ready. Unrecognised lines
/// are echoed back prefixed `% `, per spec.
pub fn poll_console() {
    let line = {
        // Safety: `poll_console` only ever runs from the main task, which
        // is the sole owner of `CONSOLE`'s mutable line-assembly state;
        // concurrent writers use `Console::write`, a `&self` method.
        console_mut().read_line().map(|line| {
            let mut buf = [0u8; 128];
            let len = line.len().min(buf.len());
            buf[..len].copy_from_slice(&line[..len]);
            (buf, len)
        })
    };

    let Some((buf, len)) = line else { return };
    dispatch(&buf[..len]);
}

fn dispatch(line: &[u8]) {
    let timer = Timer::new(pac::TIMER::PTR);
    let gpio = gpio_handle();

    if line.first() == Some(&b'$') {
        let now = timer.now_us();
        if rtc::nmea_to_sys(line, 115_200, now).is_err() {
            // Silently ignored on the hot path, per spec's protocol-parse
            // error kind.
        }
        return;
    }

    let mut words = line.split(|&b| b == b' ').filter(|w| !w.is_empty());
    let cmd = words.next().unwrap_or(b"");
    let rest = words.next();

    match cmd {
        b"start" => {
            if pipeline::subscribe() == 1 {
                kernel::start(&pipeline::SAMPLE_TASK, producer_entry);
                kernel::start(&pipeline::RECORD_TASK, consumer_entry);
            }
        }
        b"stop" => {
            pipeline::unsubscribe();
        }
        b"ls" => {
            let path = rest.and_then(|p| core::str::from_utf8(p).ok()).unwrap_or("");
            let _ = card::ls(engine(), &gpio, &timer, console(), path);
        }
        b"cat" => {
            if let Some(path) = rest.and_then(|p| core::str::from_utf8(p).ok()) {
                if card::cat(engine(), &gpio, &timer, console(), path).is_err() {
                    console().write(b"error: card not ready\n");
                }
            }
        }
        b"touch" => {
            if let Some(path) = rest.and_then(|p| core::str::from_utf8(p).ok()) {
                if card::touch(engine(), &gpio, &timer, path).is_err() {
                    console().write(b"error: card not ready\n");
                }
            }
        }
        b"ecezo" => {
            let bus = i2c_bus();
            if let Some(sub) = rest {
                if conductivity::send_raw(bus, sub).is_ok() {
                    time::sleep_ms(&timer, 300);
                    if let Ok(response) = conductivity::read_raw_response(bus) {
                        console().write(response.as_bytes());
                        console().write(b"\n");
                    }
                }
            }
        }
        b"flash" => {
            rp2040_hal::rom_data::reset_to_usb_boot(0, 0);
        }
        b"hctosys" => {
            if rtc::rtc_to_sys(i2c_bus(), &timer).is_err() {
                console().write(b"error: rtc not ready\n");
            }
        }
        b"systohc" => {
            if rtc::sys_to_rtc(i2c_bus(), &timer).is_err() {
                console().write(b"error: rtc not ready\n");
            }
        }
        b"bme280" => match bme280::request_and_read(i2c_bus()) {
            Ok((temp_raw, press_raw)) => {
                print_two_i32(b"bme280: temp_raw=", temp_raw, b" press_raw=", press_raw);
            }
            Err(()) => console().write(b"error: bme280 not ready\n"),
        },
        b"uptime" => {
            let mut digits = [0u8; 20];
            let len = csv::format_u64_decimal(timer.now_us() / 1_000_000, &mut digits);
            console().write(b"uptime: ");
            console().write(&digits[..len]);
            console().write(b"\n");
        }
        b"verbose" => {
            if let Some(level) = rest.and_then(parse_u8) {
                VERBOSITY.store(level, Ordering::Relaxed);
            }
        }
        b"tasks" => {
            console().write(b"sample: ");
            console().write(if kernel::is_running(&pipeline::SAMPLE_TASK) { b"running\n" } else { b"stopped\n" });
            console().write(b"record: ");
            console().write(if kernel::is_running(&pipeline::RECORD_TASK) { b"running\n" } else { b"stopped\n" });
        }
        b"mem" => {
            print_one_u64(b"sample high water words: ", kernel::high_water_words(&pipeline::SAMPLE_TASK) as u64);
            print_one_u64(b"record high water words: ", kernel::high_water_words(&pipeline::RECORD_TASK) as u64);
        }
        _ => {
            console().write(b"% ");
            console().write(line);
            console().write(b"\n");
        }
    }
}

fn parse_u8(bytes: &[u8]) -> Option<u8> {
    let mut value: u32 = 0;
    if bytes.is_empty() {
        return None;
    }
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + (b - b'0') as u32;
    }
    u8::try_from(value).ok()
}

fn print_one_u64(prefix: &[u8], value: u64) {
    let mut digits = [0u8; 20];
    let len = csv::format_u64_decimal(value, &mut digits);
    console().write(prefix);
    console().write(&digits[..len]);
    console().write(b"\n");
}

fn print_two_i32(prefix_a: &[u8], a: i32, prefix_b: &[u8], b: i32) {
    let mut digits = [0u8; 20];
    console().write(prefix_a);
    let len = csv::format_u64_decimal(a.unsigned_abs() as u64, &mut digits);
    if a < 0 {
        console().write(b"-");
    }
    console().write(&digits[..len]);
    console().write(prefix_b);
    let len = csv::format_u64_decimal(b.unsigned_abs() as u64, &mut digits);
    if b < 0 {
        console().write(b"-");
    }
    console().write(&digits[..len]);
    console().write(b"\n");
}

#[interrupt]
fn UART0_IRQ() {
    UART0.isr();
}
