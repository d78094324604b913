use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use latchless_cache::CowCache;

/// Many threads race `get_or_add` on one key: exactly one value wins,
/// every caller observes it, and the count rises by exactly one.
#[test]
fn get_or_add_is_linearizable_per_key() {
    const THREADS: usize = 16;

    let cache = Arc::new(CowCache::new());
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || cache.get_or_add("shared", t).unwrap())
        })
        .collect();

    let observed: HashSet<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(observed.len(), 1, "all callers saw the same winner");
    assert_eq!(cache.len(), 1);
    let winner = *observed.iter().next().unwrap();
    assert_eq!(cache.try_get(&"shared").unwrap(), Some(winner));
}

/// Concurrent writers on distinct keys never lose each other's updates;
/// losing CAS candidates are rebuilt, not dropped.
#[test]
fn concurrent_writers_never_lose_updates() {
    const WRITERS: usize = 8;
    const PER_WRITER: usize = 200;

    let cache = Arc::new(CowCache::new());
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..PER_WRITER {
                    cache.get_or_add((w, i), w * PER_WRITER + i).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cache.len(), WRITERS * PER_WRITER);
    let snap = cache.snapshot().unwrap();
    for w in 0..WRITERS {
        for i in 0..PER_WRITER {
            assert_eq!(snap.get(&(w, i)), Some(&(w * PER_WRITER + i)));
        }
    }
}

/// Readers racing a writer always see a fully formed snapshot: either
/// the whole batch is visible or none of it.
#[test]
fn readers_never_observe_a_torn_batch() {
    let cache: Arc<CowCache<(usize, usize), usize>> = Arc::new(CowCache::new());
    cache.get_or_add((usize::MAX, usize::MAX), 0).unwrap();

    let writer = {
        let cache = cache.clone();
        thread::spawn(move || {
            for round in 0..50usize {
                let batch: Vec<_> = (0..20usize).map(|i| ((round, i), round)).collect();
                cache.append(batch).unwrap();
            }
        })
    };

    let reader = {
        let cache = cache.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let snap = cache.snapshot().unwrap();
                // every started round is fully present or fully absent
                for round in 0..50usize {
                    let present = (0..20usize)
                        .filter(|i| snap.contains_key(&(round, *i)))
                        .count();
                    assert!(present == 0 || present == 20, "torn batch visible");
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
}
