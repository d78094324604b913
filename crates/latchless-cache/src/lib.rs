//! Copy-on-write cache optimized for many readers and few writers
//!
//! Readers load the current immutable snapshot with no coordination at
//! all. Writers build a replacement snapshot and swap it in with a CAS,
//! retrying when another writer lands first; losing candidates are
//! simply discarded.

pub mod cache;

pub use cache::{CacheIter, CowCache};

pub use latchless_core::{LatchlessError, Result};
