//! Conductivity probe (EZO-style ASCII-over-I2C sensor, address 0x64).
//!
//! The read command ('R') takes up to 600 ms to produce a result, far too
//! long to block a task for, so the pipeline producer pipelines it:
//! `request_read` fires the command and returns immediately; the *next*
//! tick's call to `collect` retrieves the string the sensor queued up in
//! the meantime. The producer always collects before it requests again,
//! so there is at most one outstanding request.

use crate::i2c_bus::I2cBus;

const ADDR: u8 = 0x64;

/// Fire the 'R' (read) command. Does not wait for the result.
pub fn request_read(bus: &I2cBus) -> Result<(), ()> {
    bus.request();
    let result = bus.write(ADDR, b"R", true).map_err(|_| ());
    bus.release();
    result
}

/// Retrieve the ASCII response to a previously issued `request_read`,
/// scaled to thousandths of a microsiemens/cm. The response is a
/// NUL-terminated decimal string; a leading status byte is skipped.
pub fn collect(bus: &I2cBus) -> Result<i32, ()> {
    bus.request();

    let result = (|| {
        let mut raw = [0u8; 32];
        let mut len = 0;
        for byte in raw.iter_mut() {
            bus.read(ADDR, core::slice::from_mut(byte)).map_err(|_| ())?;
            if *byte == 0 {
                break;
            }
            len += 1;
        }
        parse_scaled_decimal(&raw[1..len]).ok_or(())
    })();

    bus.release();
    result
}

/// Send an arbitrary ASCII command verbatim, bypassing the `request_read`/
/// `collect` pipelining. Backs the console's `ecezo` diagnostic, which talks
/// to the sensor directly and is never active at the same time as the
/// sample pipeline's own traffic (the console owns the bus for the whole
/// exchange).
pub fn send_raw(bus: &I2cBus, cmd: &[u8]) -> Result<(), ()> {
    bus.request();
    let result = bus.write(ADDR, cmd, true).map_err(|_| ());
    bus.release();
    result
}

/// Retrieve whatever ASCII response is presently queued, verbatim, for
/// `ecezo` to print back. Unlike [`collect`] this does not try to parse the
/// response as a number.
pub fn read_raw_response(bus: &I2cBus) -> Result<heapless::String<48>, ()> {
    bus.request();

    let result = (|| {
        let mut raw = [0u8; 48];
        let mut len = 0;
        for byte in raw.iter_mut() {
            bus.read(ADDR, core::slice::from_mut(byte)).map_err(|_| ())?;
            if *byte == 0 {
                break;
            }
            len += 1;
        }
        let mut out: heapless::String<48> = heapless::String::new();
        for &b in &raw[1..len] {
            out.push(b as char).map_err(|_| ())?;
        }
        Ok(out)
    })();

    bus.release();
    result
}

/// Parse an ASCII decimal like `"1500.000"` into thousandths (`1500000`).
/// Returns `None` on anything that is not a plain, optionally-signed
/// decimal number.
fn parse_scaled_decimal(ascii: &[u8]) -> Option<i32> {
    let mut negative = false;
    let mut rest = ascii;
    if let Some((&sign, tail)) = rest.split_first() {
        if sign == b'-' {
            negative = true;
            rest = tail;
        } else if sign == b'+' {
            rest = tail;
        }
    }

    let mut whole = 0i64;
    let mut frac = 0i64;
    let mut frac_digits = 0u32;
    let mut seen_dot = false;
    let mut any_digit = false;

    for &byte in rest {
        match byte {
            b'0'..=b'9' => {
                any_digit = true;
                let digit = (byte - b'0') as i64;
                if seen_dot {
                    if frac_digits < 3 {
                        frac = frac * 10 + digit;
                        frac_digits += 1;
                    }
                } else {
                    whole = whole * 10 + digit;
                }
            }
            b'.' if !seen_dot => seen_dot = true,
            _ => return None,
        }
    }
    if !any_digit {
        return None;
    }
    while frac_digits < 3 {
        frac *= 10;
        frac_digits += 1;
    }

    let magnitude = whole * 1000 + frac;
    Some(if negative { -magnitude } else { magnitude } as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_decimal() {
        assert_eq!(parse_scaled_decimal(b"1500.000"), Some(1_500_000));
    }

    #[test]
    fn parses_negative_short_fraction() {
        assert_eq!(parse_scaled_decimal(b"-3.5"), Some(-3_500));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_scaled_decimal(b"ERR"), None);
        assert_eq!(parse_scaled_decimal(b""), None);
    }
}
