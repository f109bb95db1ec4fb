//! Cooperative locking primitives.
//!
//! These are intentionally not real (interrupt- or multi-core-) safe
//! mutexes. The only contention they arbitrate is between cooperative
//! tasks that voluntarily [`crate::kernel::yield_now`] while waiting, so a
//! plain flag checked and set between yields is enough. Anything shared
//! with an ISR needs `critical_section` instead; these are for the SD
//! card / I2C / console buses that multiple *tasks* take turns on.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::kernel;

/// A spin-on-yield mutex. `lock()` busy-waits by yielding, not spinning the
/// core, so other tasks keep making progress while one waits for a bus.
pub struct Mutex {
    locked: AtomicBool,
}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            kernel::yield_now();
        }
    }

    /// Non-blocking variant: take the lock if free, otherwise report
    /// failure instead of waiting.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
        // Another task may be sitting in `lock()`'s yield loop waiting on
        // this; make sure a subsequent WFE in the parent's idle wait does
        // not oversleep past the event that should wake it back up to
        // retry.
        cortex_m::asm::sev();
    }
}

/// A reference-counted, lazily powered peripheral. The first `request()`
/// powers the bus up and runs `on_first_user`; the last matching
/// `release()` tears it back down via `on_last_user`. Concurrent
/// requesters between those two calls just bump the count.
///
/// Mirrors the request/release convention every shared bus driver in this
/// crate uses (SD card, I2C, the sector cache's flush-on-idle path): the
/// mutex guards the power-state transition itself, not the bus traffic
/// that happens while powered, which callers serialize with their own
/// higher-level lock if needed.
pub struct ResourceHandle {
    mutex: Mutex,
    users: Cell<u32>,
}

unsafe impl Sync for ResourceHandle {}

impl ResourceHandle {
    pub const fn new() -> Self {
        ResourceHandle {
            mutex: Mutex::new(),
            users: Cell::new(0),
        }
    }

    pub fn request(&self, on_first_user: impl FnOnce()) {
        self.mutex.lock();
        let users = self.users.get();
        self.users.set(users + 1);
        if users == 0 {
            on_first_user();
        }
        self.mutex.unlock();
    }

    pub fn release(&self, on_last_user: impl FnOnce()) {
        self.mutex.lock();
        let users = self.users.get() - 1;
        self.users.set(users);
        if users == 0 {
            on_last_user();
        }
        self.mutex.unlock();
    }

    pub fn user_count(&self) -> u32 {
        self.users.get()
    }
}
