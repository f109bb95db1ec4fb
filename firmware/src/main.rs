#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_rtt_target as _;
use rtt_target::{rprintln, rtt_init_print};

use logger_firmware::{app, kernel};

#[link_section = ".boot2"]
#[used]
pub static BOOT2_FIRMWARE: [u8; 256] = rp2040_boot2::CONFIG_W25Q080;

#[entry]
fn main() -> ! {
    rtt_init_print!();
    rprintln!("logger firmware: starting");

    let pac = rp2040_hal::pac::Peripherals::take().expect("peripherals already taken");

    unsafe { app::setup(pac) };

    loop {
        app::poll_console();
        kernel::yield_now();
    }
}
