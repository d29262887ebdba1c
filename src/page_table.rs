use std::collections::HashMap;

use crate::{arena::PageArena, kernel::PageSource, region::PageRange, utils::page_index};

/// Per page metadata, found from any address inside the page.
///
/// This is the table a BIBOP collector consults to classify a pointer: shift the
/// address down to a page index, look the index up. The arena never fills it in,
/// the collector does as it hands pages to generations, and nothing here ever
/// reads the memory the addresses point to.
#[derive(Debug, Clone)]
pub struct PageTable<T> {
    entries: HashMap<usize, T>,
    log_page_size: u32,
}

impl<T> PageTable<T> {
    pub fn new(log_page_size: u32) -> Self {
        Self {
            entries: HashMap::new(),
            log_page_size,
        }
    }

    /// A table using the same page size as `arena`.
    pub fn for_arena<S: PageSource>(arena: &PageArena<S>) -> Self {
        Self::new(arena.log_page_size())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata of the page holding `addr`.
    pub fn lookup(&self, addr: usize) -> Option<&T> {
        self.entries.get(&page_index(addr, self.log_page_size))
    }

    pub fn lookup_mut(&mut self, addr: usize) -> Option<&mut T> {
        self.entries.get_mut(&page_index(addr, self.log_page_size))
    }

    /// Forgets every page of `range`. Returns how many had an entry.
    pub fn clear(&mut self, range: PageRange) -> usize {
        debug_assert_eq!(range.log_page_size(), self.log_page_size);

        let first = range.first_page();

        (first..first + range.pages())
            .filter(|index| self.entries.remove(index).is_some())
            .count()
    }
}

impl<T: Clone> PageTable<T> {
    /// Gives every page of `range` a copy of `value`, replacing what was there.
    pub fn assign(&mut self, range: PageRange, value: T) {
        debug_assert_eq!(range.log_page_size(), self.log_page_size);

        let first = range.first_page();

        for index in first..first + range.pages() {
            self.entries.insert(index, value.clone());
        }
    }
}
