use parking_lot::Mutex;

use crate::{
    arena::{ArenaStats, PageArena},
    config::ArenaConfig,
    error::ArenaResult,
    kernel::{PageSource, SystemPages},
    region::PageRange,
};

/// A [`PageArena`] that can be shared between threads.
///
/// One lock covers the whole arena and is held for the full duration of every
/// call, so each acquire or release sees the free list exactly as the previous one
/// left it. Nothing inside the lock blocks or calls back out.
#[derive(Debug)]
pub struct SyncPageArena<S: PageSource = SystemPages> {
    inner: Mutex<PageArena<S>>,
}

impl SyncPageArena<SystemPages> {
    pub fn system() -> ArenaResult<Self> {
        Ok(Self::new(PageArena::system()?))
    }
}

impl<S: PageSource> SyncPageArena<S> {
    pub fn new(arena: PageArena<S>) -> Self {
        Self {
            inner: Mutex::new(arena),
        }
    }

    pub fn initialize(config: ArenaConfig, source: S) -> ArenaResult<Self> {
        Ok(Self::new(PageArena::initialize(config, source)?))
    }

    /// See [`PageArena::acquire`].
    pub fn acquire(&self, minimum: usize, maximum: usize) -> (usize, *mut u8) {
        self.inner.lock().acquire(minimum, maximum)
    }

    pub fn try_acquire(&self, minimum: usize, maximum: usize) -> ArenaResult<PageRange> {
        self.inner.lock().try_acquire(minimum, maximum)
    }

    /// See [`PageArena::release`].
    pub fn release(&self, start: *mut u8, pages: usize) {
        self.inner.lock().release(start, pages)
    }

    pub fn try_release(&self, start: usize, pages: usize) -> ArenaResult<()> {
        self.inner.lock().try_release(start, pages)
    }

    pub fn stats(&self) -> ArenaStats {
        self.inner.lock().stats()
    }

    /// Runs `f` with the lock held, for sequences that must not interleave with
    /// other threads.
    pub fn with_arena<R>(&self, f: impl FnOnce(&mut PageArena<S>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> PageArena<S> {
        self.inner.into_inner()
    }
}
