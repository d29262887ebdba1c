//! This file contains all the helper functions for the arena.
//! These are functions that don't particularly belong to any concrete module of the crate:
//! rounding sizes to a power of two and the address to page transform the
//! collector relies on.

/// Rounds `to_be_aligned` up to a multiple of `aligment`, which must be a power of two.
///
/// This is used to round mapping sizes up to the OS page size and addresses up to the
/// arena page size.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around the address space.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    Some(to_be_aligned.checked_add(aligment - 1)? & !(aligment - 1))
}

#[inline]
pub fn is_aligned(addr: usize, aligment: usize) -> bool {
    addr & (aligment - 1) == 0
}

/// Index of the page containing `addr` when pages are `1 << log_page_size` bytes.
///
/// This is the whole BIBOP trick: the page (and therefore whatever metadata the
/// collector keeps for it) is found with one shift, no object header involved.
#[inline]
pub const fn page_index(addr: usize, log_page_size: u32) -> usize {
    addr >> log_page_size
}

/// Byte offset of `addr` inside its page.
#[inline]
pub const fn page_offset(addr: usize, log_page_size: u32) -> usize {
    addr & ((1 << log_page_size) - 1)
}

/// First byte address of page `index`.
#[inline]
pub const fn page_address(index: usize, log_page_size: u32) -> usize {
    index << log_page_size
}

/// `log2(size)` when `size` is a non zero power of two.
pub fn log2_exact(size: usize) -> Option<u32> {
    size.is_power_of_two().then(|| size.trailing_zeros())
}
