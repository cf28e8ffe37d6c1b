//! # asm.js → WASM translation
//!
//! The pipeline core, split along the pass structure:
//!
//! | Module | Responsibility |
//! |-------------|------------------------------------------------------|
//! | [`context`] | per-run registries: globals, views, tables, inferred import signatures |
//! | [`detect`]  | syntactic type and signedness detection              |
//! | [`module`]  | first pass over top-level bindings, exports, orchestration |
//! | [`function`]| the recursive expression/statement translator        |
//! | [`labels`]  | scoped label uniquification                          |
//! | [`traps`]   | div/rem and float-to-int shims                       |
//! | [`finalize`]| deferred call fixups, debug-info folding (function-parallel) |
//! | [`assembly`]| fixed wiring: memory, table, base globals, `__udivmoddi4` |
//!
//! Translation is single-threaded; the pass pool and the finalizer fan
//! out over completed functions only.

mod assembly;
mod context;
mod detect;
mod finalize;
mod function;
mod labels;
pub mod names;
mod traps;

pub(crate) mod module;

pub use context::{Context, ImportSig, TrapMode};
pub use module::{build_module, TranslateOptions};
