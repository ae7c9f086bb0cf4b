//! Cache layer.
//!
//! [`CacheEngine`] heads an execution: it computes a [`RequestKey`] from the
//! workflow id and the heap's nuts, serves a stored [`CacheResult`] when one
//! exists, and otherwise runs the chains and stores their materialized
//! output. Heap changes invalidate every entry computed from that heap.
//!
//! [`RequestKey`]: crate::engine::RequestKey

mod engine;
mod result;
mod size;
mod store;

pub use engine::{CacheConfig, CacheEngine};
pub use result::{BEST_EFFORT_PREFIX, CacheResult, is_best_effort};
pub use size::parse_size;
pub use store::CacheStore;
