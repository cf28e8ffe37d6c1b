//! Fixed names used by the translation: synthetic helper functions, the
//! `asm2wasm` import namespace, and the debug intrinsic.

/// Module name for imports the translator itself introduces.
pub const ASM2WASM: &str = "asm2wasm";

/// Floating-point remainder ffi (WASM has no `f64.rem`). Signature `ddd`.
pub const F64_REM: &str = "f64-rem";

/// Float-to-int conversion: ffi import in JS trap mode (signature `id`),
/// local helper in clamp mode.
pub const F64_TO_INT: &str = "f64-to-int";

/// `debugger;` statements call this import. Signature `v`.
pub const DEBUGGER: &str = "debugger";

/// Injected by the preprocessor; folded back into annotations by the
/// call finalizer.
pub const EMSCRIPTEN_DEBUGINFO: &str = "emscripten_debuginfo";

/// Non-trapping integer division/remainder helpers.
pub const I32S_DIV: &str = "i32s-div";
pub const I32U_DIV: &str = "i32u-div";
pub const I32S_REM: &str = "i32s-rem";
pub const I32U_REM: &str = "i32u-rem";
pub const I64S_DIV: &str = "i64s-div";
pub const I64U_DIV: &str = "i64u-div";
pub const I64S_REM: &str = "i64s-rem";
pub const I64U_REM: &str = "i64u-rem";

/// Reserved local for the inline `Math.abs(i32)` expansion.
pub const I32_TEMP: &str = "asm2wasm_i32_temp";

/// Function-table call prefixes (external and in-module forms); the
/// first argument is the table index.
pub const FTCALL: &str = "ftCall_";
pub const MFTCALL: &str = "mftCall_";

/// Imports with these names stay immutable (they seed segment offsets);
/// every other imported global gets the dual-global lowering.
pub const TABLE_BASE: &str = "tableBase";
pub const MEMORY_BASE: &str = "memoryBase";

/// Special exports that trigger the i64 `__udivmoddi4` rewrite.
pub const UDIVMODDI4: &str = "__udivmoddi4";
pub const GET_TEMP_RET0: &str = "getTempRet0";

/// asm.js memory growth exports this helper; it is dropped in favor of
/// `memory.grow`.
pub const EMSCRIPTEN_REPLACE_MEMORY: &str = "_emscripten_replace_memory";

/// The grow-memory function codegen installs when growth was detected.
pub const GROW_WASM_MEMORY: &str = "__growWasmMemory";
