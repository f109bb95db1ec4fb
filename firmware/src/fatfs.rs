//! The boundary to an external FAT filesystem engine.
//!
//! The engine itself (directory tables, cluster chains, the FAT itself) is a
//! third party sitting on top of [`crate::blockdev::BlockDevice`]; this core
//! only names the nine operations it calls into the engine with. Nothing
//! downstream of [`FatEngine`] belongs to this crate.

use heapless::String;

use crate::error::CoreResult;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `FA_OPEN_EXISTING | FA_READ`.
    ReadExisting,
    /// `FA_CREATE_NEW | FA_WRITE`: fails with [`crate::error::CoreError::FilesystemExists`]
    /// if the path already exists.
    CreateNew,
    /// `FA_CREATE_ALWAYS | FA_WRITE`, used by the console's `touch`.
    CreateAlways,
}

pub const MAX_NAME: usize = 12;

/// The nine operations this core drives an external FAT engine through,
/// plus the `get_fattime` callback the engine calls back into this core
/// with. An implementor owns its own file/dir handle types.
pub trait FatEngine {
    type File;
    type Dir;

    fn mount(&mut self) -> CoreResult<()>;
    fn unmount(&mut self);

    fn open(&mut self, path: &str, mode: OpenMode) -> CoreResult<Self::File>;
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> CoreResult<usize>;
    fn write(&mut self, file: &mut Self::File, buf: &[u8]) -> CoreResult<usize>;
    fn close(&mut self, file: Self::File) -> CoreResult<()>;

    fn opendir(&mut self, path: &str) -> CoreResult<Self::Dir>;
    /// `None` once the directory is exhausted. Entries beginning with `.`
    /// are never yielded (mirrors ignoring `.`/`..` during `ls`).
    fn readdir(&mut self, dir: &mut Self::Dir) -> CoreResult<Option<String<MAX_NAME>>>;
    fn closedir(&mut self, dir: Self::Dir);
}

/// Placeholder [`FatEngine`] that compiles the pipeline's consumer task and
/// the console's file commands against a concrete type, without vendoring a
/// real FAT implementation into this core (that engine is explicitly out of
/// scope here, the same way ChaN FatFs's own sources are not part of the
/// original firmware's repository either — only the shim around it is).
/// A deployment links a real engine crate and substitutes its own type in
/// [`crate::app`] in place of this one.
pub struct Unimplemented;

impl FatEngine for Unimplemented {
    type File = ();
    type Dir = ();

    fn mount(&mut self) -> CoreResult<()> {
        Err(crate::error::CoreError::CardAbsent)
    }
    fn unmount(&mut self) {}

    fn open(&mut self, _path: &str, _mode: OpenMode) -> CoreResult<Self::File> {
        Err(crate::error::CoreError::CardAbsent)
    }
    fn read(&mut self, _file: &mut Self::File, _buf: &mut [u8]) -> CoreResult<usize> {
        Err(crate::error::CoreError::CardAbsent)
    }
    fn write(&mut self, _file: &mut Self::File, _buf: &[u8]) -> CoreResult<usize> {
        Err(crate::error::CoreError::CardAbsent)
    }
    fn close(&mut self, _file: Self::File) -> CoreResult<()> {
        Ok(())
    }

    fn opendir(&mut self, _path: &str) -> CoreResult<Self::Dir> {
        Err(crate::error::CoreError::CardAbsent)
    }
    fn readdir(&mut self, _dir: &mut Self::Dir) -> CoreResult<Option<String<MAX_NAME>>> {
        Ok(None)
    }
    fn closedir(&mut self, _dir: Self::Dir) {}
}
