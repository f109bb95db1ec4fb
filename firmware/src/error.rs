//! Error kinds at component boundaries.
//!
//! Every fallible operation in this core collapses its failure into one of
//! these a small number of kinds. Nothing downstream needs more detail than
//! this: a task either retries, tears down and re-initialises, or logs a
//! line to the console and moves on. There are no panics on a recoverable
//! path.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// CRC mismatch, unexpected token, or a command timeout on the SD bus.
    /// Tear down the current session and let the caller re-initialise.
    TransientBus,
    /// The FAT engine's "not ready" status; distinguished from
    /// [`Self::TransientBus`] because it is surfaced to the console
    /// verbatim rather than retried silently.
    CardAbsent,
    /// A file create-new collided with an existing name.
    FilesystemExists,
    /// An NMEA sentence failed its checksum, or a numeric field did not
    /// parse. Always ignored silently on the hot path.
    ProtocolParse,
    /// An unrecognised `ioctl` command.
    Configuration,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CoreError::TransientBus => "transient bus error",
            CoreError::CardAbsent => "card not ready",
            CoreError::FilesystemExists => "file exists",
            CoreError::ProtocolParse => "parse error",
            CoreError::Configuration => "parameter error",
        };
        f.write_str(text)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
