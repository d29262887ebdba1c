use std::collections::BTreeMap;

use log::{debug, error, warn};

use crate::{
    config::ArenaConfig,
    diagnostics::fatal,
    error::{ArenaError, ArenaResult, ReleaseFault},
    freelist::FreeList,
    kernel::{PageSource, SystemPages},
    ledger::Ledger,
    region::PageRange,
    utils::{is_aligned, log2_exact},
};

/// Counters describing what the arena holds right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    pub page_size: usize,
    /// Pages currently mapped from the source, granted or free.
    pub mapped_pages: usize,
    /// Highest `mapped_pages` ever reached.
    pub peak_mapped_pages: usize,
    pub granted_pages: usize,
    pub free_pages: usize,
    /// Number of separate runs on the free list.
    pub free_ranges: usize,
    /// Number of live grants.
    pub grants: usize,
    pub os_maps: usize,
    pub os_unmaps: usize,
}

/// The page arena: owns every page the heap lives in.
///
/// Pages come from a [`PageSource`] in big mappings and are handed to the collector
/// as [`PageRange`]s. Whatever the collector gives back goes on an address-ordered
/// [`FreeList`] where it is merged with its free neighbours, so later requests can
/// be served without asking the OS again.
///
/// ```text
///    PageSource mappings  |<------------ chunk ------------>|   |<--- chunk --->|
///    pages                [ grant ][ free ][  grant  ][free ]   [    free       ]
///                                  ^^^^^^            ^^^^^^      ^^^^^^^^^^^^^^^
///                                            free list entries
/// ```
///
/// Every range handed out is recorded in a [`Ledger`]; a release that doesn't match
/// a grant exactly is refused before it can corrupt the free list.
///
/// Creating the arena is the initialization step, there is no arena value before
/// it. All methods take `&mut self`: the arena does no locking of its own, see
/// [`crate::SyncPageArena`] for that.
#[derive(Debug)]
pub struct PageArena<S: PageSource = SystemPages> {
    /// As given to `initialize`, with the page size filled in.
    config: ArenaConfig,
    log_page_size: u32,
    source: S,
    free_list: FreeList,
    ledger: Ledger,
    /// Mappings obtained from `source`: start -> pages
    chunks: BTreeMap<usize, usize>,
    mapped_pages: usize,
    peak_mapped_pages: usize,
    os_maps: usize,
    os_unmaps: usize,
}

impl PageArena<SystemPages> {
    /// An arena with the default configuration on top of the OS.
    pub fn system() -> ArenaResult<Self> {
        Self::initialize(ArenaConfig::default(), SystemPages)
    }
}

impl<S: PageSource> PageArena<S> {
    /// Sets the arena up: works out the page size from the configuration and the
    /// source's page size, then starts with nothing mapped and an empty free list.
    /// Nothing is mapped until the first request.
    ///
    /// Without an explicit page size the arena uses 4 KiB pages, or the OS page
    /// if that is bigger. An explicit page size smaller than the OS page is an
    /// error.
    pub fn initialize(mut config: ArenaConfig, source: S) -> ArenaResult<Self> {
        config.validate()?;

        let os_page_size = source.os_page_size();
        let Some(log_os_page_size) = log2_exact(os_page_size) else {
            return Err(ArenaError::InvalidConfig(format!(
                "OS page size {os_page_size} is not a power of two"
            )));
        };

        let log_page_size = config.resolve_log_page_size(log_os_page_size);
        if log_page_size < log_os_page_size {
            return Err(ArenaError::InvalidConfig(format!(
                "page size {} is smaller than the OS page size {os_page_size}",
                1usize << log_page_size
            )));
        }
        config.validate_with(log_page_size)?;
        config.log_page_size = Some(log_page_size);

        debug!(
            "page arena ready: {} byte pages, OS quantum {} pages, return threshold {:?}",
            1usize << log_page_size,
            config.os_quantum_pages,
            config.return_threshold
        );

        Ok(Self {
            free_list: FreeList::new(log_page_size),
            ledger: Ledger::new(log_page_size),
            chunks: BTreeMap::new(),
            mapped_pages: 0,
            peak_mapped_pages: 0,
            os_maps: 0,
            os_unmaps: 0,
            config,
            log_page_size,
            source,
        })
    }

    #[inline]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        1 << self.log_page_size
    }

    #[inline]
    pub fn log_page_size(&self) -> u32 {
        self.log_page_size
    }

    /// Borrows the page source, mostly useful to inspect a simulated one.
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Elastic request for between `minimum` and `maximum` pages.
    ///
    /// Returns the granted size and its start address. Running out of memory, or
    /// a malformed request, ends the process with a `gc:` message on stderr: a heap
    /// that can't grow can't make progress. See [`PageArena::try_acquire`] for the
    /// version that returns the error.
    pub fn acquire(&mut self, minimum: usize, maximum: usize) -> (usize, *mut u8) {
        match self.try_acquire(minimum, maximum) {
            Ok(range) => (range.pages(), range.as_ptr()),
            Err(err) => {
                error!("{err}");
                fatal(format_args!("{err}"))
            }
        }
    }

    /// Grants between `minimum` and `maximum` pages, as many as possible.
    ///
    /// The search goes, stopping at the first step that works:
    ///
    /// 1. The smallest free run that holds `maximum` pages.
    /// 2. A fresh mapping of `maximum` pages (at least one OS quantum), merged into
    ///    the free list and then step 1 again.
    /// 3. The biggest free run holding at least `minimum` pages, cut to `maximum`.
    /// 4. Smaller and smaller mappings, halving from `maximum` down to `minimum`.
    ///
    /// Pages always come from the low end of the run they are cut from.
    pub fn try_acquire(&mut self, minimum: usize, maximum: usize) -> ArenaResult<PageRange> {
        if minimum == 0 || minimum > maximum || maximum > self.max_pages() {
            return Err(ArenaError::InvalidRequest { minimum, maximum });
        }

        let range = match self.free_list.take_best_fit(maximum) {
            Some(range) => range,
            None => self.refill(minimum, maximum)?,
        };

        debug_assert!(is_aligned(range.start(), self.page_size()));
        debug_assert!((minimum..=maximum).contains(&range.pages()));

        self.ledger.grant(range);

        debug!("granted {range:?} for [{minimum}, {maximum}]");

        Ok(range)
    }

    /// Steps 2 to 4 of [`PageArena::try_acquire`].
    fn refill(&mut self, minimum: usize, maximum: usize) -> ArenaResult<PageRange> {
        let padded = maximum.max(self.config.os_quantum_pages);

        if self.map_pages(padded) || (padded > maximum && self.map_pages(maximum)) {
            if let Some(range) = self.free_list.take_best_fit(maximum) {
                return Ok(range);
            }
        }

        if let Some(range) = self.free_list.take_largest(minimum, maximum) {
            return Ok(range);
        }

        let mut pages = maximum;
        while pages > minimum {
            pages = (pages / 2).max(minimum);

            if self.map_pages(pages) {
                if let Some(range) = self.free_list.take_largest(minimum, maximum) {
                    return Ok(range);
                }
            }
        }

        Err(ArenaError::Exhausted {
            minimum,
            maximum,
            mapped_pages: self.mapped_pages,
        })
    }

    /// Maps `pages` new pages and puts them on the free list. `false` if the
    /// source refused.
    fn map_pages(&mut self, pages: usize) -> bool {
        let Some(len) = pages.checked_mul(self.page_size()) else {
            return false;
        };

        let Some(start) = self.source.map(len, self.page_size()) else {
            warn!("page source refused to map {pages} pages");
            return false;
        };

        let chunk = PageRange::new(start, pages, self.log_page_size());

        if !is_aligned(start, self.page_size())
            || self.chunks.range(..chunk.end()).next_back().is_some_and(|(&s, &p)| {
                PageRange::new(s, p, self.log_page_size()).overlaps(&chunk)
            })
        {
            warn!("page source returned a bad mapping {chunk:?}, dropping it");
            unsafe { self.source.unmap(start, len) };
            return false;
        }

        self.chunks.insert(start, pages);
        self.os_maps += 1;
        self.mapped_pages += pages;
        self.peak_mapped_pages = self.peak_mapped_pages.max(self.mapped_pages);

        let merged = self.free_list.insert(chunk);

        debug!("mapped {chunk:?}, free run is now {merged:?}");

        true
    }

    /// Returns `pages` pages starting at `start` to the arena. Ends the process if
    /// they don't match a grant, see [`PageArena::try_release`].
    pub fn release(&mut self, start: *mut u8, pages: usize) {
        if let Err(err) = self.try_release(start as usize, pages) {
            error!("{err}");
            fatal(format_args!("{err}"))
        }
    }

    /// Takes back a grant. `(start, pages)` must be exactly what
    /// [`PageArena::try_acquire`] returned; anything else is refused and leaves
    /// the arena untouched.
    ///
    /// The pages are merged with the free runs around them. If the resulting run
    /// reaches the configured return threshold, the OS mappings lying entirely
    /// inside it are unmapped.
    pub fn try_release(&mut self, start: usize, pages: usize) -> ArenaResult<()> {
        let refuse = |reason| ArenaError::InvalidRelease {
            start,
            pages,
            reason,
        };

        if pages == 0 {
            return Err(refuse(ReleaseFault::Empty));
        }
        if !is_aligned(start, self.page_size()) {
            return Err(refuse(ReleaseFault::Misaligned));
        }

        let range = PageRange::new(start, pages, self.log_page_size());

        self.ledger.revoke(range).map_err(|fault| match fault {
            ReleaseFault::NotGranted if self.free_list.find_containing(start).is_some() => {
                refuse(ReleaseFault::AlreadyFree)
            }
            fault => refuse(fault),
        })?;

        let merged = self.free_list.insert(range);

        debug!("released {range:?}, free run is now {merged:?}");

        if self
            .config
            .return_threshold
            .is_some_and(|threshold| merged.pages() >= threshold)
        {
            self.return_chunks(merged);
        }

        Ok(())
    }

    /// Unmaps every chunk lying entirely inside the free run `run`.
    fn return_chunks(&mut self, run: PageRange) {
        let inside: Vec<PageRange> = self
            .chunks
            .range(run.start()..run.end())
            .map(|(&start, &pages)| PageRange::new(start, pages, self.log_page_size()))
            .filter(|chunk| run.covers(chunk))
            .collect();

        for chunk in inside {
            self.free_list.carve(chunk);
            self.chunks.remove(&chunk.start());

            // The chunk was mapped by us and no page of it is granted.
            unsafe { self.source.unmap(chunk.start(), chunk.byte_len()) };

            self.os_unmaps += 1;
            self.mapped_pages -= chunk.pages();

            debug!("returned {chunk:?} to the OS");
        }
    }

    /// The grant holding `addr`, if any.
    pub fn granted_range(&self, addr: usize) -> Option<PageRange> {
        self.ledger.find(addr)
    }

    #[inline]
    pub fn is_granted(&self, addr: usize) -> bool {
        self.granted_range(addr).is_some()
    }

    /// Free runs in address order.
    pub fn free_ranges(&self) -> impl Iterator<Item = PageRange> + '_ {
        self.free_list.iter()
    }

    /// Live grants in address order.
    pub fn granted_ranges(&self) -> impl Iterator<Item = PageRange> + '_ {
        self.ledger.iter()
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            page_size: self.page_size(),
            mapped_pages: self.mapped_pages,
            peak_mapped_pages: self.peak_mapped_pages,
            granted_pages: self.ledger.total_pages(),
            free_pages: self.free_list.total_pages(),
            free_ranges: self.free_list.len(),
            grants: self.ledger.len(),
            os_maps: self.os_maps,
            os_unmaps: self.os_unmaps,
        }
    }

    /// Largest page count whose byte length fits in the address space.
    #[inline]
    fn max_pages(&self) -> usize {
        usize::MAX >> self.log_page_size()
    }
}
