// Copyright 2020 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! A small worker pool for running a per-item closure (typically
//! `BaqFacade::process_read`) across many disjoint items concurrently,
//! restoring input order on the way out. Purely a convenience: nothing
//! in `facade` requires a pool, every call works equally well driven
//! single-threaded from a plain loop.

use std::thread;

use crossbeam::channel::{bounded, unbounded};

/// Run `f` over `items` using `workers` threads, returning results in
/// the same order `items` were given, regardless of which worker
/// finished which item first.
pub fn worker_pool<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let workers = workers.max(1);
    let n = items.len();

    let (work_tx, work_rx) = bounded::<(usize, T)>(workers * 2);
    let (result_tx, result_rx) = unbounded::<(usize, R)>();
    let f = std::sync::Arc::new(f);

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let f = f.clone();
            thread::spawn(move || {
                for (idx, item) in work_rx {
                    let result = f(item);
                    if result_tx.send((idx, result)).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(result_tx);

    thread::spawn(move || {
        for (idx, item) in items.into_iter().enumerate() {
            if work_tx.send((idx, item)).is_err() {
                break;
            }
        }
    });

    let mut slots: Vec<Option<R>> = (0..n).map(|_| None).collect();
    for (idx, result) in result_rx {
        slots[idx] = Some(result);
    }

    for handle in handles {
        let _ = handle.join();
    }

    slots.into_iter().map(|s| s.expect("worker dropped a result")).collect()
}
