//! Several threads sharing one arena behind its lock.

use std::{sync::Arc, thread};

use bibop_pages::SyncPageArena;

fn main() {
    env_logger::init();

    let arena = match SyncPageArena::system() {
        Ok(arena) => Arc::new(arena),
        Err(err) => bibop_pages::gc_error!("{err}"),
    };

    let workers: Vec<_> = (0..4)
        .map(|id| {
            let arena = Arc::clone(&arena);
            thread::spawn(move || {
                for round in 1..=8 {
                    let (pages, start) = arena.acquire(1, round);
                    println!("thread {id}: {pages} pages at {start:?}");
                    arena.release(start, pages);
                }
            })
        })
        .collect();

    for worker in workers {
        if worker.join().is_err() {
            bibop_pages::gc_error!("worker thread panicked");
        }
    }

    println!("{:#?}", arena.stats());
}
