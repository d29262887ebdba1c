use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use crate::region::PageRange;

/// Keeps track of every page range the arena owns but nobody is using.
///
/// Entries are indexed twice: by start address, so that a returned range can find
/// its neighbours and be merged with them, and by `(pages, start)`, so that the
/// best fit for a request is a single ordered lookup.
///
/// ```text
///                          by_start (address order)
///
///    +----------+        +------------------+             +------+
///    | 3 pages  |  used  |     7 pages      |    used     |  1   |
///    +----------+        +------------------+             +------+
///
///                          by_size ((pages, start) order)
///
///    (1, 0x..)  ->  (3, 0x..)  ->  (7, 0x..)
/// ```
///
/// Two entries are never adjacent: [`FreeList::insert`] always merges a range with the
/// free range right before it and the free range right after it, so the list holds
/// the fewest, largest runs possible.
#[derive(Debug)]
pub(crate) struct FreeList {
    /// start -> pages
    by_start: BTreeMap<usize, usize>,
    /// (pages, start)
    by_size: BTreeSet<(usize, usize)>,
    /// Pages summed over every entry
    total_pages: usize,
    log_page_size: u32,
}

impl FreeList {
    /// Creates a new empty free list for pages of `1 << log_page_size` bytes.
    pub fn new(log_page_size: u32) -> Self {
        Self {
            by_start: BTreeMap::new(),
            by_size: BTreeSet::new(),
            total_pages: 0,
            log_page_size,
        }
    }

    /// Number of separate free runs.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    #[inline]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Free ranges in address order.
    pub fn iter(&self) -> impl Iterator<Item = PageRange> + '_ {
        self.by_start
            .iter()
            .map(|(&start, &pages)| PageRange::new(start, pages, self.log_page_size))
    }

    /// The free range holding `addr`, if any.
    pub fn find_containing(&self, addr: usize) -> Option<PageRange> {
        let (&start, &pages) = self.by_start.range(..=addr).next_back()?;
        let range = PageRange::new(start, pages, self.log_page_size);

        range.contains(addr).then_some(range)
    }

    /// Whether any free page overlaps `range`.
    pub fn overlaps(&self, range: &PageRange) -> bool {
        // The only candidates are the last entry starting before `range.end()`.
        self.by_start
            .range(..range.end())
            .next_back()
            .is_some_and(|(&start, &pages)| {
                PageRange::new(start, pages, self.log_page_size).overlaps(range)
            })
    }

    /// Adds `range` to the list, merging it with its free neighbours.
    ///
    /// Returns the range as it ended up in the list, which is bigger than `range`
    /// whenever a merge happened. `range` must not overlap anything already free.
    pub fn insert(&mut self, range: PageRange) -> PageRange {
        debug_assert!(range.pages() > 0);
        debug_assert!(!self.overlaps(&range), "{range:?} is already free");

        let mut merged = range;

        self.merge_with_prev(&mut merged);
        self.merge_with_next(&mut merged);

        self.link(merged);

        merged
    }

    /// If the free run right before `range` ends where `range` starts, it is taken
    /// out of the list and `range` grows backwards to cover it.
    fn merge_with_prev(&mut self, range: &mut PageRange) {
        let Some((&start, &pages)) = self.by_start.range(..range.start()).next_back() else {
            return;
        };

        let prev = PageRange::new(start, pages, self.log_page_size);

        if prev.is_adjacent(range) {
            self.unlink(prev);
            trace!("merging {range:?} with previous {prev:?}");
            *range = PageRange::new(prev.start(), prev.pages() + range.pages(), self.log_page_size);
        }
    }

    /// Same as [`FreeList::merge_with_prev`] with the run starting right at `range.end()`.
    fn merge_with_next(&mut self, range: &mut PageRange) {
        if let Some(&pages) = self.by_start.get(&range.end()) {
            let next = PageRange::new(range.end(), pages, self.log_page_size);

            self.unlink(next);
            trace!("merging {range:?} with next {next:?}");
            let pages = range.pages() + next.pages();
            *range = PageRange::new(range.start(), pages, self.log_page_size);
        }
    }

    /// Removes `pages` pages from the smallest free run that can hold them, taking
    /// them from the low end of that run. Ties go to the lowest address.
    ///
    /// Whatever is left of the run stays in the list. It can't be adjacent to any
    /// other free run because the run itself wasn't.
    pub fn take_best_fit(&mut self, pages: usize) -> Option<PageRange> {
        let &(_, start) = self.by_size.range((pages, 0)..).next()?;

        Some(self.take_from(start, pages))
    }

    /// Removes the biggest free run holding at least `minimum` pages, cut down to
    /// `maximum` pages if it is bigger than that.
    pub fn take_largest(&mut self, minimum: usize, maximum: usize) -> Option<PageRange> {
        let &(pages, start) = self.by_size.iter().next_back()?;

        if pages < minimum {
            return None;
        }

        Some(self.take_from(start, pages.min(maximum)))
    }

    /// Removes `range`, which must sit entirely inside one free run, and puts back
    /// whatever is left on either side of it.
    pub fn carve(&mut self, range: PageRange) {
        let Some(run) = self.find_containing(range.start()) else {
            debug_assert!(false, "{range:?} is not free");
            return;
        };

        debug_assert!(run.covers(&range));

        self.unlink(run);

        let (before, rest) = run.split_at((range.start() - run.start()) >> self.log_page_size);
        let (_, after) = rest.split_at(range.pages());

        if before.pages() > 0 {
            self.link(before);
        }
        if after.pages() > 0 {
            self.link(after);
        }
    }

    fn take_from(&mut self, start: usize, pages: usize) -> PageRange {
        let run_pages = self.by_start[&start];
        let run = PageRange::new(start, run_pages, self.log_page_size);

        self.unlink(run);

        let (taken, rest) = run.split_at(pages);
        if rest.pages() > 0 {
            trace!("splitting {run:?}: {} pages stay free", rest.pages());
            self.link(rest);
        }

        taken
    }

    fn link(&mut self, range: PageRange) {
        self.by_start.insert(range.start(), range.pages());
        self.by_size.insert((range.pages(), range.start()));
        self.total_pages += range.pages();
    }

    fn unlink(&mut self, range: PageRange) {
        self.by_start.remove(&range.start());
        self.by_size.remove(&(range.pages(), range.start()));
        self.total_pages -= range.pages();
    }
}
