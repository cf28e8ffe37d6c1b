//! WebAssembly IR.
//!
//! The translator builds this representation and codegen encodes it.
//! It is split into:
//! - [`types`]: value types, literals, operator enums, signature strings
//! - [`expr`]: the closed expression variant and the per-function arena
//! - [`module`]: functions, imports, exports, globals, table, memory

mod expr;
mod module;
mod types;

pub use expr::{ExprId, Expression, FuncArena, Name};
pub use module::{
    Export, ExportKind, Function, Global, GlobalInit, Import, ImportKind, Memory, Module, Table,
};
pub use types::{sig_for, sig_parts, BinaryOp, Literal, UnaryOp, ValType};
