use thiserror::Error;

/// Arena operation result
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Everything that can go wrong inside the arena.
///
/// None of these are meant to be recovered from by the collector: the fatal entry
/// points ([`crate::PageArena::acquire`], [`crate::PageArena::release`]) report them
/// and terminate. The `try_*` variants hand them back so the logic can be tested.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("invalid arena configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid page request: minimum {minimum}, maximum {maximum}")]
    InvalidRequest { minimum: usize, maximum: usize },

    #[error(
        "out of memory: could not allocate {minimum} pages \
         (asked for up to {maximum}, {mapped_pages} pages mapped)"
    )]
    Exhausted {
        minimum: usize,
        maximum: usize,
        mapped_pages: usize,
    },

    #[error("bad release of {pages} pages at 0x{start:x}: {reason}")]
    InvalidRelease {
        start: usize,
        pages: usize,
        reason: ReleaseFault,
    },
}

/// Why a release was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFault {
    /// Zero pages
    #[error("empty range")]
    Empty,
    /// Start address is not on a page boundary
    #[error("start is not page aligned")]
    Misaligned,
    /// The start address is granted, but with a different page count
    #[error("range was granted with {granted} pages")]
    SizeMismatch { granted: usize },
    /// The start address falls inside a grant that starts at `grant_start`
    #[error("start lies inside the grant at 0x{grant_start:x}")]
    InsideGrant { grant_start: usize },
    /// The pages are already on the free list
    #[error("pages are already free")]
    AlreadyFree,
    /// The arena never handed out anything at this address
    #[error("range was never granted")]
    NotGranted,
}
