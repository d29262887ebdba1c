//! Page arena for a "big bag of pages" (BIBOP) garbage collector.
//!
//! A BIBOP collector never stores a header in its objects: it finds out what an
//! object is by looking at the page the object lives in. That only works if every
//! heap page is aligned to the page size, so the page of an address is one shift
//! away ([`utils::page_index`]). This crate owns those pages.
//!
//! The collector creates one [`PageArena`], asks it for elastic runs of pages with
//! [`PageArena::acquire`] and gives them back with [`PageArena::release`]:
//!
//! ```no_run
//! use bibop_pages::PageArena;
//!
//! let mut arena = PageArena::system().unwrap();
//!
//! // Anything from 4 to 16 pages will do, as many as possible.
//! let (pages, start) = arena.acquire(4, 16);
//! assert!((4..=16).contains(&pages));
//!
//! arena.release(start, pages);
//! ```
//!
//! Returned pages sit on a free list, merged with their free neighbours, and
//! serve the next requests before the OS is asked for more. Running out of memory
//! or releasing something that was never granted ends the process with a `gc:`
//! message; the `try_*` methods return an [`ArenaError`] instead.

pub mod arena;
pub mod config;
pub mod diagnostics;
pub mod error;
mod freelist;
pub mod kernel;
mod ledger;
pub mod page_table;
pub mod region;
pub mod sync;
pub mod utils;

pub use arena::{ArenaStats, PageArena};
pub use config::ArenaConfig;
pub use error::{ArenaError, ArenaResult, ReleaseFault};
pub use kernel::{PageSource, SystemPages};
pub use page_table::PageTable;
pub use region::PageRange;
pub use sync::SyncPageArena;
