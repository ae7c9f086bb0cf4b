//! assetflow - resolve, transform, version and cache web assets.
//!
//! Assets are resolved by a [`Heap`] from a [`Backend`], flow through
//! per-type [`Chain`]s of stage-ordered [`Node`]s that attach streaming
//! [`Filter`]s, and whole executions are memoized by the [`CacheEngine`]
//! until the heap reports a change.
//!
//! [`Heap`]: heap::Heap
//! [`Backend`]: backend::Backend
//! [`Chain`]: engine::Chain
//! [`Node`]: engine::Node
//! [`Filter`]: pipe::Filter
//! [`CacheEngine`]: cache::CacheEngine

pub mod logger;

pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod heap;
pub mod nodes;
pub mod nut;
pub mod pipe;
pub mod scheduler;
pub mod workflow;

pub use error::{EngineError, Result};
pub use workflow::{Engine, Workflow};
