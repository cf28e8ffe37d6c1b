//! Binary emission of the completed module via `wasm-encoder`.

mod instruction;
mod module;

pub use module::encode;
