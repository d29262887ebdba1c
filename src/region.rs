use std::fmt;

use crate::utils::page_index;

/// A contiguous run of whole pages.
///
/// This is the unit the arena hands out and takes back: free list entries,
/// ledger entries and OS mappings are all `PageRange`s. A range always knows the
/// page size it was cut with, so it can answer questions about its own end and
/// neighbours without going back to the arena.
///
/// ```text
///   start                                     end()
///     |                                         |
///     v                                         v
///     +---------+---------+---------+---------+
///     | page 0  | page 1  |   ...   | page n-1|
///     +---------+---------+---------+---------+
///      <------------ pages * page_size ------->
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRange {
    start: usize,
    pages: usize,
    log_page_size: u32,
}

impl PageRange {
    /// Creates a range of `pages` pages starting at `start`.
    ///
    /// `start` is expected to be aligned to `1 << log_page_size`; the arena never
    /// builds a range that isn't.
    pub const fn new(start: usize, pages: usize, log_page_size: u32) -> Self {
        Self {
            start,
            pages,
            log_page_size,
        }
    }

    /// Address of the first byte of the range.
    #[inline]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Number of pages in the range.
    #[inline]
    pub const fn pages(&self) -> usize {
        self.pages
    }

    #[inline]
    pub const fn page_size(&self) -> usize {
        1 << self.log_page_size
    }

    #[inline]
    pub const fn log_page_size(&self) -> u32 {
        self.log_page_size
    }

    #[inline]
    pub const fn byte_len(&self) -> usize {
        self.pages << self.log_page_size
    }

    /// One past the last byte of the range.
    #[inline]
    pub const fn end(&self) -> usize {
        self.start + self.byte_len()
    }

    /// Index of the first page, see [`crate::utils::page_index`].
    #[inline]
    pub const fn first_page(&self) -> usize {
        page_index(self.start, self.log_page_size)
    }

    /// Start address as a raw pointer, for callers that place objects in the range.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.start as *mut u8
    }

    #[inline]
    pub const fn contains(&self, addr: usize) -> bool {
        self.start <= addr && addr < self.end()
    }

    /// Whether `other` lies entirely inside `self`.
    #[inline]
    pub const fn covers(&self, other: &PageRange) -> bool {
        self.start <= other.start && other.end() <= self.end()
    }

    #[inline]
    pub const fn overlaps(&self, other: &PageRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// Whether `self` ends exactly where `other` starts or the other way round.
    #[inline]
    pub const fn is_adjacent(&self, other: &PageRange) -> bool {
        self.end() == other.start || other.end() == self.start
    }

    /// Cuts the range after `pages` pages. The first half keeps the start address.
    ///
    /// `pages` must not be greater than [`PageRange::pages`]; either half may be empty.
    pub fn split_at(&self, pages: usize) -> (PageRange, PageRange) {
        debug_assert!(pages <= self.pages);

        let head = PageRange::new(self.start, pages, self.log_page_size);
        let tail = PageRange::new(head.end(), self.pages - pages, self.log_page_size);

        (head, tail)
    }
}

impl fmt::Debug for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PageRange(0x{:x}..0x{:x}, {} pages)",
            self.start,
            self.end(),
            self.pages
        )
    }
}
