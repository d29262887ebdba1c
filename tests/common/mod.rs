//! A page source that hands out numbers instead of memory.

#![allow(dead_code)]

use std::collections::BTreeMap;

use bibop_pages::{utils::align, PageSource};

/// Simulated address space starting at `BASE`.
///
/// Mappings are laid out one after the other. `capacity` bounds the total bytes
/// that can be live at once; `maps_left` makes every map call past a budget fail.
/// Unmaps are checked against the live mappings, so a bad unmap from the arena
/// fails the test.
#[derive(Debug)]
pub struct SimulatedPages {
    os_page_size: usize,
    next: usize,
    capacity: usize,
    maps_left: Option<usize>,
    live: BTreeMap<usize, usize>,
    pub maps: usize,
    pub unmaps: usize,
}

pub const BASE: usize = 0x7f00_0000_0000;

impl SimulatedPages {
    pub fn new(capacity: usize) -> Self {
        Self {
            os_page_size: 4096,
            next: BASE,
            capacity,
            maps_left: None,
            live: BTreeMap::new(),
            maps: 0,
            unmaps: 0,
        }
    }

    /// An address space where nothing can ever be mapped.
    pub fn exhausted() -> Self {
        Self::new(0)
    }

    /// Lets `count` more map calls through, then fails every one after.
    pub fn allow_maps(mut self, count: usize) -> Self {
        self.maps_left = Some(count);
        self
    }

    pub fn refuse_maps(&mut self) {
        self.maps_left = Some(0);
    }

    pub fn live_bytes(&self) -> usize {
        self.live.values().sum()
    }
}

impl PageSource for SimulatedPages {
    fn os_page_size(&self) -> usize {
        self.os_page_size
    }

    fn map(&mut self, len: usize, aligment: usize) -> Option<usize> {
        assert!(len > 0 && len % self.os_page_size == 0, "bad length {len}");
        assert!(aligment.is_power_of_two() && aligment >= self.os_page_size);

        if self.maps_left == Some(0) {
            return None;
        }
        if self.live_bytes().checked_add(len)? > self.capacity {
            return None;
        }

        let start = align(self.next, aligment);
        self.next = start.checked_add(len)?;
        self.live.insert(start, len);
        self.maps += 1;
        if let Some(left) = self.maps_left.as_mut() {
            *left -= 1;
        }

        Some(start)
    }

    unsafe fn unmap(&mut self, addr: usize, len: usize) {
        assert_eq!(
            self.live.remove(&addr),
            Some(len),
            "unmap of 0x{addr:x} does not match a mapping"
        );
        self.unmaps += 1;
    }
}
