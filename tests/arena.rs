mod common;

use bibop_pages::{ArenaConfig, ArenaError, ArenaResult, PageArena, PageTable, ReleaseFault};
use common::SimulatedPages;

const PAGE: usize = 4096;

fn config() -> ArenaConfig {
    ArenaConfig::default()
        .with_os_quantum_pages(1)
        .with_return_threshold(None)
}

fn arena_over(source: SimulatedPages) -> PageArena<SimulatedPages> {
    PageArena::initialize(config(), source).unwrap()
}

#[test]
fn acquire_release_reacquire_scenario() {
    let mut arena = arena_over(SimulatedPages::new(1 << 30));

    let first = arena.try_acquire(4, 16).unwrap();
    assert!((4..=16).contains(&first.pages()));
    assert_eq!(first.start() % PAGE, 0);

    arena.try_release(first.start(), first.pages()).unwrap();

    arena.source_mut().refuse_maps();
    let again = arena.try_acquire(first.pages(), first.pages()).unwrap();

    assert_eq!(again.start(), first.start());
    assert_eq!(arena.source().maps, 1);
}

#[test]
fn reuse_needs_no_second_mapping() {
    // The source serves exactly one map call.
    let mut arena = arena_over(SimulatedPages::new(1 << 30).allow_maps(1));

    let range = arena.try_acquire(8, 8).unwrap();
    arena.try_release(range.start(), range.pages()).unwrap();

    for pages in [8, 5, 1] {
        let smaller = arena.try_acquire(pages, pages).unwrap();
        assert_eq!(smaller.start(), range.start());
        arena.try_release(smaller.start(), smaller.pages()).unwrap();
    }

    assert_eq!(arena.source().maps, 1);
}

#[test]
fn adjacent_releases_coalesce_in_either_order() {
    for low_first in [true, false] {
        let mut arena = PageArena::initialize(
            config().with_os_quantum_pages(12),
            SimulatedPages::new(1 << 30),
        )
        .unwrap();

        let low = arena.try_acquire(5, 5).unwrap();
        let high = arena.try_acquire(7, 7).unwrap();
        assert_eq!(low.end(), high.start());

        let high_water = arena.stats().peak_mapped_pages;

        if low_first {
            arena.try_release(low.start(), 5).unwrap();
            arena.try_release(high.start(), 7).unwrap();
        } else {
            arena.try_release(high.start(), 7).unwrap();
            arena.try_release(low.start(), 5).unwrap();
        }

        assert_eq!(arena.free_ranges().count(), 1);

        arena.source_mut().refuse_maps();
        let whole = arena.try_acquire(12, 12).unwrap();

        assert_eq!(whole.start(), low.start());
        assert_eq!(arena.stats().peak_mapped_pages, high_water);
    }
}

#[test]
fn release_between_grants_merges_three_ways() {
    let mut arena = PageArena::initialize(
        config().with_os_quantum_pages(9),
        SimulatedPages::new(1 << 30),
    )
    .unwrap();

    let a = arena.try_acquire(3, 3).unwrap();
    let b = arena.try_acquire(3, 3).unwrap();
    let c = arena.try_acquire(3, 3).unwrap();

    arena.try_release(a.start(), 3).unwrap();
    arena.try_release(c.start(), 3).unwrap();
    assert_eq!(arena.free_ranges().count(), 2);

    arena.try_release(b.start(), 3).unwrap();
    let runs: Vec<_> = arena.free_ranges().collect();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].start(), a.start());
    assert_eq!(runs[0].pages(), 9);
}

#[test]
fn exhausted_source_is_an_error_not_an_empty_grant() {
    let mut arena = arena_over(SimulatedPages::exhausted());

    let err = arena.try_acquire(1, 32).unwrap_err();

    assert_eq!(
        err,
        ArenaError::Exhausted {
            minimum: 1,
            maximum: 32,
            mapped_pages: 0,
        }
    );
    assert_eq!(arena.stats().grants, 0);
}

#[test]
fn grants_shrink_under_pressure() {
    // 10 pages of address space in total.
    let mut arena = arena_over(SimulatedPages::new(10 * PAGE));

    let first = arena.try_acquire(2, 8).unwrap();
    assert_eq!(first.pages(), 8);

    let second = arena.try_acquire(1, 8).unwrap();
    assert_eq!(second.pages(), 2);

    assert!(matches!(
        arena.try_acquire(1, 1),
        Err(ArenaError::Exhausted { mapped_pages: 10, .. })
    ));
}

#[test]
fn returning_memory_to_the_os() {
    let mut arena = PageArena::initialize(
        config().with_os_quantum_pages(4).with_return_threshold(Some(8)),
        SimulatedPages::new(1 << 30),
    )
    .unwrap();

    let a = arena.try_acquire(4, 4).unwrap();
    let b = arena.try_acquire(4, 4).unwrap();
    let c = arena.try_acquire(4, 4).unwrap();
    assert_eq!(arena.source().maps, 3);

    arena.try_release(a.start(), 4).unwrap();
    arena.try_release(c.start(), 4).unwrap();
    assert_eq!(arena.source().unmaps, 0);

    // a, b and c were mapped back to back: one 12 page run, three whole mappings.
    arena.try_release(b.start(), 4).unwrap();
    assert_eq!(arena.source().unmaps, 3);
    assert_eq!(arena.source().live_bytes(), 0);
    assert_eq!(arena.stats().mapped_pages, 0);
    assert_eq!(arena.free_ranges().count(), 0);

    // And the arena still works afterwards.
    let d = arena.try_acquire(4, 4).unwrap();
    assert_eq!(d.pages(), 4);
}

#[test]
fn partially_granted_mappings_stay_mapped() {
    let mut arena = PageArena::initialize(
        config().with_os_quantum_pages(16).with_return_threshold(Some(4)),
        SimulatedPages::new(1 << 30),
    )
    .unwrap();

    let a = arena.try_acquire(8, 8).unwrap();
    let _b = arena.try_acquire(8, 8).unwrap();

    arena.try_release(a.start(), 8).unwrap();

    assert_eq!(arena.source().unmaps, 0);
    assert_eq!(arena.stats().free_pages, 8);
}

#[test]
fn bad_releases_are_reported() {
    let mut arena = arena_over(SimulatedPages::new(1 << 30));
    let range = arena.try_acquire(4, 4).unwrap();

    let reason = |result: ArenaResult<()>| match result {
        Err(ArenaError::InvalidRelease { reason, .. }) => reason,
        other => panic!("expected a refused release, got {other:?}"),
    };

    assert_eq!(
        reason(arena.try_release(range.start(), 2)),
        ReleaseFault::SizeMismatch { granted: 4 }
    );
    assert_eq!(
        reason(arena.try_release(range.start() + PAGE, 3)),
        ReleaseFault::InsideGrant {
            grant_start: range.start()
        }
    );

    arena.try_release(range.start(), 4).unwrap();
    assert_eq!(
        reason(arena.try_release(range.start(), 4)),
        ReleaseFault::AlreadyFree
    );
}

#[test]
fn page_table_follows_grants() {
    #[derive(Debug, Clone, PartialEq)]
    enum Generation {
        Nursery,
        Tenured,
    }

    let mut arena = arena_over(SimulatedPages::new(1 << 30));
    let mut table = PageTable::for_arena(&arena);

    let nursery = arena.try_acquire(2, 2).unwrap();
    let tenured = arena.try_acquire(3, 3).unwrap();
    table.assign(nursery, Generation::Nursery);
    table.assign(tenured, Generation::Tenured);

    let object = tenured.start() + PAGE + 24;
    assert_eq!(table.lookup(object), Some(&Generation::Tenured));
    assert_eq!(arena.granted_range(object), Some(tenured));

    arena.try_release(nursery.start(), 2).unwrap();
    assert_eq!(table.clear(nursery), 2);
    assert_eq!(table.lookup(nursery.start()), None);
}

#[test]
fn real_pages_are_usable() {
    let mut arena = PageArena::system().unwrap();

    let range = arena.try_acquire(2, 4).unwrap();

    unsafe {
        let bytes = std::slice::from_raw_parts_mut(range.as_ptr(), range.byte_len());
        bytes.fill(0xab);
        assert!(bytes.iter().all(|&byte| byte == 0xab));
    }

    arena.try_release(range.start(), range.pages()).unwrap();
}

#[test]
fn large_pages_on_real_memory() {
    // 64 KiB pages: bigger than the OS page everywhere we run.
    let config = ArenaConfig::default().with_log_page_size(16);
    let mut arena = PageArena::initialize(config, bibop_pages::SystemPages).unwrap();

    let (pages, start) = arena.acquire(1, 3);

    assert!((1..=3).contains(&pages));
    assert_eq!(start as usize % (1 << 16), 0);

    arena.release(start, pages);
}
