//! Filing-cabinet glue: power-gates the card, mounts/unmounts the FAT
//! engine, and implements the three file-inspection console commands
//! (`ls`, `cat`, `touch`) plus the `NNNNNN.csv` filename allocator the
//! sample pipeline's consumer task uses.
//!
//! `request`/`release` are a stricter pair than [`crate::sync::ResourceHandle`]:
//! the lock they take is held for the caller's entire session between a
//! successful `request` and its matching `release`, exactly as the shared
//! SD/I2C/UART buses require holders to do (see the resource discipline in
//! the concurrency model). `ls`/`cat` drop it only around the individual
//! console writes of each entry, the way the original firmware's `card_lock`/
//! `card_unlock` pair does around each line of output, so another task
//! waiting on the card is never starved for an entire directory listing.

use core::sync::atomic::{AtomicU32, Ordering};

use logger_bsp::gpio::{Function, Gpio};
use logger_bsp::timer::Timer;

use crate::console::Console;
use crate::error::{CoreError, CoreResult};
use crate::fatfs::{FatEngine, OpenMode};
use crate::kernel;
use crate::sync::Mutex;
use crate::time;

const PIN_CARD_ENABLE: u8 = 22;

pub static LOCK: Mutex = Mutex::new();
static USERS: AtomicU32 = AtomicU32::new(0);

/// Power up and mount on the first concurrent caller; every caller past the
/// first just joins the session. On success the caller holds [`LOCK`] and
/// must eventually call [`release`] exactly once.
pub fn request<E: FatEngine>(engine: &mut E, gpio: &Gpio, timer: &Timer) -> CoreResult<()> {
    LOCK.lock();

    if USERS.load(Ordering::Relaxed) == 0 {
        gpio.set_function(PIN_CARD_ENABLE, Function::Sio);
        gpio.set_dir_out(PIN_CARD_ENABLE);
        gpio.set_high(PIN_CARD_ENABLE);
        // Guarantee at least 1 ms of settle time since power was applied
        // before the card sees a clock edge.
        time::sleep_ms(timer, 10);

        if let Err(e) = engine.mount() {
            LOCK.unlock();
            return Err(e);
        }
    }

    USERS.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Caller must still hold [`LOCK`] (as `request` leaves it held on success).
/// Unmounts and powers down on the last concurrent caller.
pub fn release<E: FatEngine>(engine: &mut E, gpio: &Gpio) {
    let users = USERS.load(Ordering::Relaxed) - 1;
    USERS.store(users, Ordering::Relaxed);

    if users == 0 {
        engine.unmount();
        gpio.set_low(PIN_CARD_ENABLE);
        gpio.set_function(PIN_CARD_ENABLE, Function::Null);
    }

    LOCK.unlock();
}

/// Lists entries of `path` (root if empty) to the console, one per line.
/// Entries whose name starts with `.` are skipped.
pub fn ls<E: FatEngine>(
    engine: &mut E,
    gpio: &Gpio,
    timer: &Timer,
    console: &Console,
    path: &str,
) -> CoreResult<()> {
    request(engine, gpio, timer)?;

    let outcome = run_ls(engine, console, path);

    release(engine, gpio);
    outcome
}

fn run_ls<E: FatEngine>(engine: &mut E, console: &Console, path: &str) -> CoreResult<()> {
    let mut dir = engine.opendir(path)?;

    loop {
        let entry = engine.readdir(&mut dir);
        match entry {
            Ok(Some(name)) => {
                if name.as_bytes().first() == Some(&b'.') {
                    continue;
                }
                LOCK.unlock();
                console.write(name.as_bytes());
                console.write(b"\n");
                LOCK.lock();
                cortex_m::asm::sev();
                kernel::yield_now();
            }
            Ok(None) => break,
            Err(e) => {
                engine.closedir(dir);
                return Err(e);
            }
        }
    }

    engine.closedir(dir);
    Ok(())
}

/// Streams an existing file's contents to the console in chunks, dropping
/// the card lock around each chunk's write.
pub fn cat<E: FatEngine>(
    engine: &mut E,
    gpio: &Gpio,
    timer: &Timer,
    console: &Console,
    path: &str,
) -> CoreResult<()> {
    request(engine, gpio, timer)?;

    let outcome = run_cat(engine, console, path);

    release(engine, gpio);
    outcome
}

fn run_cat<E: FatEngine>(engine: &mut E, console: &Console, path: &str) -> CoreResult<()> {
    let mut file = engine.open(path, OpenMode::ReadExisting)?;

    let mut buf = [0u8; 128];
    loop {
        let read_result = engine.read(&mut file, &mut buf);
        let n = match read_result {
            Ok(n) => n,
            Err(e) => {
                let _ = engine.close(file);
                return Err(e);
            }
        };
        if n == 0 {
            break;
        }

        LOCK.unlock();
        console.write(&buf[..n]);
        LOCK.lock();
        cortex_m::asm::sev();
        kernel::yield_now();
    }

    engine.close(file)?;
    Ok(())
}

/// Creates (or truncates) `path` and writes a short greeting, exercising the
/// write path from the console for manual testing.
pub fn touch<E: FatEngine>(
    engine: &mut E,
    gpio: &Gpio,
    timer: &Timer,
    path: &str,
) -> CoreResult<()> {
    request(engine, gpio, timer)?;

    let outcome = (|| -> CoreResult<()> {
        let mut file = engine.open(path, OpenMode::CreateAlways)?;
        let written = engine.write(&mut file, b"hello\n");
        match written {
            Ok(n) if n == 6 => {}
            Ok(_) => {
                let _ = engine.close(file);
                return Err(CoreError::TransientBus);
            }
            Err(e) => {
                let _ = engine.close(file);
                return Err(e);
            }
        }
        engine.close(file)
    })();

    release(engine, gpio);
    outcome
}

/// Formats `NNNNNN.csv` for `index` (always exactly 6 digits, values above
/// 999999 wrap per the fixed-width field).
fn format_filename(index: u32, out: &mut [u8; 10]) {
    let index = index % 1_000_000;
    out[0] = b'0' + (index / 100_000 % 10) as u8;
    out[1] = b'0' + (index / 10_000 % 10) as u8;
    out[2] = b'0' + (index / 1_000 % 10) as u8;
    out[3] = b'0' + (index / 100 % 10) as u8;
    out[4] = b'0' + (index / 10 % 10) as u8;
    out[5] = b'0' + (index % 10) as u8;
    out[6..10].copy_from_slice(b".csv");
}

/// Probes `000000.csv`, `000001.csv`, ... with create-new semantics and
/// returns the first index whose name did not already exist, with the file
/// left open for the caller to write through. Assumes the caller already
/// holds the card session (see [`request`]).
pub fn allocate_next_file<E: FatEngine>(engine: &mut E) -> CoreResult<(u32, E::File)> {
    let mut index = 0u32;
    loop {
        let mut name_buf = [0u8; 10];
        format_filename(index, &mut name_buf);
        let name = core::str::from_utf8(&name_buf).unwrap_or("000000.csv");

        match engine.open(name, OpenMode::CreateNew) {
            Ok(file) => return Ok((index, file)),
            Err(CoreError::FilesystemExists) => {
                index += 1;
                kernel::yield_now();
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_filename_is_zero_padded_six_digits() {
        let mut buf = [0u8; 10];
        format_filename(5, &mut buf);
        assert_eq!(&buf, b"000005.csv");

        format_filename(123456, &mut buf);
        assert_eq!(&buf, b"123456.csv");
    }
}
