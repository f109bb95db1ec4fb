//! Register-level board support for the logger hardware: clock tree bring-up,
//! GPIO muxing, DMA channel configuration (including the CRC sniffer), the SPI1
//! bus used for the SD card, the I2C0 bus used for sensors and the RTC, the
//! interrupt-driven UART0 console, a free-running microsecond timer backed by
//! a small pool of four hardware alarms, and a PIO helper that waits for the
//! SD card to release the bus without hot-polling.
//!
//! This crate is deliberately thin: it exposes the registers the core needs
//! and nothing else. Anything resembling scheduling, locking, or file-level
//! policy lives in the `firmware` crate. All waits longer than a few bus
//! cycles go through the firmware crate's cooperative `yield`-based sleep
//! rather than a busy-wait owned here, so there is no SysTick delay wrapper
//! in this crate.
#![cfg_attr(not(test), no_std)]

pub mod clocks;
pub mod dma;
pub mod gpio;
pub mod i2c;
pub mod pio_ready;
pub mod spi;
pub mod timer;
pub mod uart;
