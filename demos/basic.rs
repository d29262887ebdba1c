//! Grows, shrinks and regrows a pretend heap to show free list reuse and
//! coalescing. Run with `RUST_LOG=debug` to see the arena's own log, or build
//! with `--features bibop-log` to get it in a `BIBOP_LOG` file instead.

use bibop_pages::{ArenaConfig, PageArena, SystemPages};

fn log_grant(what: &str, pages: usize, start: *mut u8) {
    println!("{what}: got {pages} pages at {start:?}");
}

#[cfg(feature = "bibop-log")]
fn init_logging() {
    if let Err(err) = bibop_pages::diagnostics::BibopLog::install(log::LevelFilter::Debug) {
        bibop_pages::gc_error!("{err}");
    }
}

#[cfg(not(feature = "bibop-log"))]
fn init_logging() {
    env_logger::init();
}

fn main() {
    init_logging();

    let config = match ArenaConfig::from_env() {
        Ok(config) => config,
        Err(err) => bibop_pages::gc_error!("{err}"),
    };
    let mut arena = match PageArena::initialize(config, SystemPages) {
        Ok(arena) => arena,
        Err(err) => bibop_pages::gc_error!("{err}"),
    };

    let (young_pages, young) = arena.acquire(4, 16);
    log_grant("young", young_pages, young);

    let (old_pages, old) = arena.acquire(8, 8);
    log_grant("old", old_pages, old);

    let (large_pages, large) = arena.acquire(2, 2);
    log_grant("large object", large_pages, large);

    // Touch the pages, they are real memory.
    unsafe {
        young.write(23);
        assert_eq!(young.read(), 23);
    }

    arena.release(young, young_pages);
    arena.release(old, old_pages);

    // young and old were next to each other, they came back as one run.
    let (merged_pages, merged) = arena.acquire(young_pages + old_pages, young_pages + old_pages);
    log_grant("merged", merged_pages, merged);

    if merged == young {
        println!("Correctly reused at {merged:?}");
    } else {
        println!("Not reused. young was at {young:?} and merged is at {merged:?}");
    }

    println!("{:#?}", arena.stats());
}
