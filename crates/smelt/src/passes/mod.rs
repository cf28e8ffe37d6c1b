//! Per-function IR passes.
//!
//! Each pass is a self-contained sub-module operating on one function's
//! arena, which is what lets the finalizer fan passes out across
//! threads (see `translate::finalize`). The [`pool`] runs the early
//! passes concurrently with translation when optimizations are enabled.

pub mod auto_drop;
pub mod pool;
pub mod refinalize;
pub mod vacuum;

pub use pool::FunctionPassPool;
