//! Block-device shim between the SD driver and an external FAT engine.
//!
//! This is the boundary the filesystem engine sees: `status`, `initialise`,
//! `read`, `write`, `ioctl`, shaped after ChaN FatFs's `diskio.h` contract
//! so that any engine written against that interface can sit on top of it
//! unmodified. Underneath, it adds a small round-robin sector cache and a
//! "deferred zeros" write coalescer that never touches the card for a
//! contiguous run of all-zero sector writes until something forces a flush.

use rp2040_hal::pio::PIOExt;

use logger_bsp::pio_ready::PioReady;

use crate::error::{CoreError, CoreResult};
use crate::sdcard::Card;

const CACHE_SLOTS: usize = 64;
pub const BLOCK_SIZE: usize = 512;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotInitialised,
}

#[derive(Clone, Copy)]
pub enum IoctlCmd {
    Sync,
    GetBlockSize,
    GetSectorCount,
}

pub enum IoctlResult {
    Sync,
    BlockSize(u32),
    SectorCount(u64),
}

/// The five operations an external FAT engine drives a block device
/// through. This core never calls into the engine; the engine calls into
/// this.
pub trait BlockDevice {
    fn status(&self) -> Status;
    fn initialise(&mut self) -> CoreResult<()>;
    fn read(&mut self, buf: &mut [u8], sector: u64, count: u32) -> CoreResult<()>;
    fn write(&mut self, buf: &[u8], sector: u64, count: u32) -> CoreResult<()>;
    fn ioctl(&mut self, cmd: IoctlCmd) -> CoreResult<IoctlResult>;
}

struct CacheSlot {
    sector: u64,
    payload: [u8; BLOCK_SIZE],
}

struct SectorCache {
    slots: [CacheSlot; CACHE_SLOTS],
    next_victim: usize,
}

impl SectorCache {
    const fn new() -> Self {
        const EMPTY: CacheSlot = CacheSlot {
            sector: 0,
            payload: [0; BLOCK_SIZE],
        };
        SectorCache {
            slots: [EMPTY; CACHE_SLOTS],
            next_victim: 0,
        }
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.sector = 0;
        }
    }

    fn find(&self, sector: u64) -> Option<&[u8; BLOCK_SIZE]> {
        if sector == 0 {
            return None;
        }
        self.slots
            .iter()
            .find(|slot| slot.sector == sector)
            .map(|slot| &slot.payload)
    }

    /// Insert or update the slot for `sector`. Sector 0 is never cached
    /// (the FAT engine uses 0 as its own "invalid" marker). An existing
    /// slot for the same sector is updated in place; otherwise the next
    /// round-robin slot is replaced.
    fn store(&mut self, sector: u64, payload: &[u8]) {
        if sector == 0 {
            return;
        }
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.sector == sector) {
            slot.payload.copy_from_slice(payload);
            return;
        }
        let victim = self.next_victim;
        self.slots[victim].sector = sector;
        self.slots[victim].payload.copy_from_slice(payload);
        self.next_victim = (victim + 1) % CACHE_SLOTS;
    }
}

struct DeferredZeroRun {
    start: u64,
    count: u32,
}

impl DeferredZeroRun {
    const fn new() -> Self {
        DeferredZeroRun { start: 0, count: 0 }
    }

    fn extends(&self, sector: u64) -> bool {
        self.count == 0 || sector == self.start + self.count as u64
    }
}

fn all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

pub struct Shim<P: PIOExt> {
    card: Card,
    pio: PioReady<P>,
    peri_clock_hz: u32,
    initialised: bool,
    cache: SectorCache,
    deferred: DeferredZeroRun,
}

impl<P: PIOExt> Shim<P> {
    pub const fn new(card: Card, pio: PioReady<P>, peri_clock_hz: u32) -> Self {
        Shim {
            card,
            pio,
            peri_clock_hz,
            initialised: false,
            cache: SectorCache::new(),
            deferred: DeferredZeroRun::new(),
        }
    }

    fn flush_deferred(&mut self) -> CoreResult<()> {
        let count = self.deferred.count;
        if count == 0 {
            return Ok(());
        }
        self.deferred.count = 0;
        self.card.write_blocks_start(&mut self.pio, self.deferred.start)?;
        self.card.write_some_blocks(&mut self.pio, None, count)?;
        self.card.write_blocks_end(&mut self.pio);
        Ok(())
    }
}

impl<P: PIOExt> BlockDevice for Shim<P> {
    fn status(&self) -> Status {
        if self.initialised {
            Status::Ok
        } else {
            Status::NotInitialised
        }
    }

    fn initialise(&mut self) -> CoreResult<()> {
        if !self.initialised {
            self.card.init(self.peri_clock_hz)?;
        }
        self.cache.clear();
        self.initialised = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], sector: u64, count: u32) -> CoreResult<()> {
        self.flush_deferred()?;

        if count == 1 {
            if let Some(cached) = self.cache.find(sector) {
                buf[..BLOCK_SIZE].copy_from_slice(cached);
                return Ok(());
            }
        }

        self.card.read_blocks(&mut self.pio, buf, sector, count)?;

        if count == 1 {
            self.cache.store(sector, &buf[..BLOCK_SIZE]);
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8], sector: u64, count: u32) -> CoreResult<()> {
        if self.deferred.extends(sector) && all_zero(buf) {
            if self.deferred.count == 0 {
                self.deferred.start = sector;
            }
            self.deferred.count += count;
            return Ok(());
        }
        if self.deferred.count != 0 {
            self.flush_deferred()?;
        }

        self.card.write_blocks_start(&mut self.pio, sector)?;
        self.card.write_some_blocks(&mut self.pio, Some(buf), count)?;
        self.card.write_blocks_end(&mut self.pio);

        if count == 1 {
            self.cache.store(sector, &buf[..BLOCK_SIZE]);
        }
        Ok(())
    }

    fn ioctl(&mut self, cmd: IoctlCmd) -> CoreResult<IoctlResult> {
        match cmd {
            IoctlCmd::Sync => {
                self.flush_deferred()?;
                Ok(IoctlResult::Sync)
            }
            IoctlCmd::GetBlockSize => Ok(IoctlResult::BlockSize(1)),
            // SDXC tops out at 2 TiB; this is a generous fixed ceiling
            // rather than a value read from the card's CSD register (see
            // the open question on the exact figure in the design notes).
            IoctlCmd::GetSectorCount => Ok(IoctlResult::SectorCount(0xFFFF_FFFF)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_serves_last_write_until_sector_zero_never_cached() {
        let mut cache = SectorCache::new();
        assert!(cache.find(5).is_none());

        let mut payload = [0u8; BLOCK_SIZE];
        payload[0] = 0xAA;
        cache.store(5, &payload);
        assert_eq!(cache.find(5).unwrap()[0], 0xAA);

        payload[0] = 0xBB;
        cache.store(5, &payload);
        assert_eq!(cache.find(5).unwrap()[0], 0xBB);

        cache.store(0, &payload);
        assert!(cache.find(0).is_none());
    }

    #[test]
    fn cache_replacement_is_round_robin() {
        let mut cache = SectorCache::new();
        for i in 0..CACHE_SLOTS as u64 + 1 {
            let payload = [i as u8; BLOCK_SIZE];
            cache.store(i + 1, &payload);
        }
        // The first sector stored should have been evicted by the (B+1)th.
        assert!(cache.find(1).is_none());
        assert!(cache.find(CACHE_SLOTS as u64 + 1).is_some());
    }

    #[test]
    fn deferred_zero_run_extends_contiguous_sectors_only() {
        let mut run = DeferredZeroRun::new();
        assert!(run.extends(100));
        run.start = 100;
        run.count = 50;
        assert!(run.extends(150));
        assert!(!run.extends(151));
        assert!(!run.extends(99));
    }
}
