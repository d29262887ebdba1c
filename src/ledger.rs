use std::collections::BTreeMap;

use crate::{error::ReleaseFault, region::PageRange};

/// Every range currently handed out to the collector, keyed by start address.
///
/// The ledger exists only to check releases: a range comes back exactly as it
/// went out, once. Anything else is a bug in the caller and must not reach the
/// free list.
#[derive(Debug)]
pub(crate) struct Ledger {
    /// start -> pages
    grants: BTreeMap<usize, usize>,
    total_pages: usize,
    log_page_size: u32,
}

impl Ledger {
    pub fn new(log_page_size: u32) -> Self {
        Self {
            grants: BTreeMap::new(),
            total_pages: 0,
            log_page_size,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    #[inline]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn grant(&mut self, range: PageRange) {
        debug_assert!(self.find(range.start()).is_none());

        self.grants.insert(range.start(), range.pages());
        self.total_pages += range.pages();
    }

    /// The granted range holding `addr`, if any.
    pub fn find(&self, addr: usize) -> Option<PageRange> {
        let (&start, &pages) = self.grants.range(..=addr).next_back()?;
        let range = PageRange::new(start, pages, self.log_page_size);

        range.contains(addr).then_some(range)
    }

    /// Drops `range` from the ledger if it matches a grant exactly.
    ///
    /// `AlreadyFree` is never produced here, the ledger can't tell a double release
    /// from a wild one. The arena refines `NotGranted` against its free list.
    pub fn revoke(&mut self, range: PageRange) -> Result<(), ReleaseFault> {
        match self.grants.get(&range.start()) {
            Some(&pages) if pages == range.pages() => {
                self.grants.remove(&range.start());
                self.total_pages -= pages;
                Ok(())
            }
            Some(&granted) => Err(ReleaseFault::SizeMismatch { granted }),
            None => match self.find(range.start()) {
                Some(grant) => Err(ReleaseFault::InsideGrant {
                    grant_start: grant.start(),
                }),
                None => Err(ReleaseFault::NotGranted),
            },
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = PageRange> + '_ {
        self.grants
            .iter()
            .map(|(&start, &pages)| PageRange::new(start, pages, self.log_page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: u32 = 12;

    fn range(page: usize, pages: usize) -> PageRange {
        PageRange::new(page << LOG, pages, LOG)
    }

    #[test]
    fn exact_release_is_accepted_once() {
        let mut ledger = Ledger::new(LOG);

        ledger.grant(range(4, 3));
        assert_eq!(ledger.total_pages(), 3);

        assert_eq!(ledger.revoke(range(4, 3)), Ok(()));
        assert_eq!(ledger.total_pages(), 0);
        assert_eq!(ledger.revoke(range(4, 3)), Err(ReleaseFault::NotGranted));
    }

    #[test]
    fn wrong_size_is_refused() {
        let mut ledger = Ledger::new(LOG);

        ledger.grant(range(4, 3));

        assert_eq!(
            ledger.revoke(range(4, 2)),
            Err(ReleaseFault::SizeMismatch { granted: 3 })
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn interior_start_is_refused() {
        let mut ledger = Ledger::new(LOG);

        ledger.grant(range(4, 3));

        assert_eq!(
            ledger.revoke(range(5, 1)),
            Err(ReleaseFault::InsideGrant { grant_start: 4 << LOG })
        );
    }

    #[test]
    fn find_by_interior_address() {
        let mut ledger = Ledger::new(LOG);

        ledger.grant(range(4, 3));
        ledger.grant(range(10, 1));

        assert_eq!(ledger.find((6 << LOG) + 17), Some(range(4, 3)));
        assert_eq!(ledger.find(7 << LOG), None);
        assert_eq!(ledger.find(10 << LOG), Some(range(10, 1)));
        assert_eq!(ledger.iter().count(), 2);
    }
}
