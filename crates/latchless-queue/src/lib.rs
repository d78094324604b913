//! Lock-free queue and stack primitives
//!
//! - `queue`: Michael-Scott two-pointer FIFO with epoch-based reclamation
//! - `stack`: Treiber LIFO driven by a single CAS head swap
//!
//! Both structures keep a shared count/version pair. Iteration captures
//! the version at the start and fails fast with `ConcurrentModification`
//! the moment a mutation lands, instead of silently yielding a partial
//! view.

pub mod queue;
pub mod stack;

pub use queue::LockFreeQueue;
pub use stack::LockFreeStack;

pub use latchless_core::{LatchlessError, Result};
