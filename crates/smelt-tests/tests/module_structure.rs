//! Module-level wiring: envelope stripping, fixed imports, memory
//! growth, exports, and the __udivmoddi4 rewrite.

use smelt_tests::{
    asm_module, compile, count_ops, defined_function_count, exports, imports, memory_import_max,
};
use wasmparser::Operator;

#[test]
fn separate_asm_envelope_is_stripped() {
    let inner = asm_module("function f() {} return { f: f };");
    let wrapped = format!("Module[\"asm\"] = ({});", inner);
    let wasm = compile(&wrapped);
    assert!(exports(&wasm).contains(&("f".to_string(), "func")));
}

#[test]
fn fixed_imports_are_always_present() {
    let wasm = compile(&asm_module("function f() {} return { f: f };"));
    let imports = imports(&wasm);
    assert!(imports.contains(&("env".to_string(), "memory".to_string(), "memory")));
    assert!(imports.contains(&("env".to_string(), "table".to_string(), "table")));
    assert!(imports.contains(&("env".to_string(), "memoryBase".to_string(), "global")));
    assert!(imports.contains(&("env".to_string(), "tableBase".to_string(), "global")));
}

#[test]
fn memory_has_no_maximum_without_growth() {
    let wasm = compile(&asm_module("function f() {} return { f: f };"));
    assert_eq!(memory_import_max(&wasm), None);
    assert!(!exports(&wasm).iter().any(|(n, _)| n == "__growWasmMemory"));
}

#[test]
fn growth_helper_is_detected_and_replaced() {
    let source = "function asmModule(global, env, buffer) { \"use asm\"; \
        var HEAP8 = new global.Int8Array(buffer); \
        function _emscripten_replace_memory(newBuffer) { \
          HEAP8 = new global.Int8Array(newBuffer); return true; } \
        // EMSCRIPTEN_START_FUNCS\n \
        function f() {} \
        return { f: f, _emscripten_replace_memory: _emscripten_replace_memory }; }";
    let wasm = compile(source);
    // max raised to the platform ceiling, grow helper installed
    assert_eq!(memory_import_max(&wasm), Some(65536));
    assert!(exports(&wasm)
        .contains(&("__growWasmMemory".to_string(), "func")));
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::MemoryGrow { .. })),
        1
    );
}

#[test]
fn mutable_imported_globals_are_lowered_to_pairs() {
    let wasm = compile(&asm_module(
        "var STACKTOP = env.STACKTOP | 0; \
         function f(x) { x = x | 0; STACKTOP = (STACKTOP + x) | 0; return STACKTOP | 0; } \
         return { f: f };",
    ));
    // the import base keeps its source name; the mutable shadow is a
    // defined global the code reads and writes
    assert!(imports(&wasm).contains(&("env".to_string(), "STACKTOP".to_string(), "global")));
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::GlobalSet { .. })),
        1
    );
}

#[test]
fn numeric_exports_become_immutable_globals() {
    let wasm = compile(&asm_module("function f() {} return { f: f, version: 3 };"));
    assert!(exports(&wasm).contains(&("version".to_string(), "global")));
}

#[test]
fn udivmoddi4_is_rewritten_to_native_i64() {
    let wasm = compile(&asm_module(
        "var tempRet0 = 0; \
         function _div64(xl, xh, yl, yh, r) { \
           xl = xl | 0; xh = xh | 0; yl = yl | 0; yh = yh | 0; r = r | 0; \
           return xl | 0; } \
         function _getTempRet0() { return tempRet0 | 0; } \
         return { __udivmoddi4: _div64, getTempRet0: _getTempRet0 };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I64DivU)), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I64RemU)), 1);
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I64Store { .. })),
        1
    );
    assert_eq!(defined_function_count(&wasm), 2);
}

#[test]
fn without_get_temp_ret0_the_rewrite_is_skipped() {
    let wasm = compile(&asm_module(
        "function _div64(xl, xh, yl, yh, r) { \
           xl = xl | 0; xh = xh | 0; yl = yl | 0; yh = yh | 0; r = r | 0; \
           return xl | 0; } \
         return { __udivmoddi4: _div64 };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I64DivU)), 0);
}

#[test]
fn preprocessing_clean_module_is_identity_shaped() {
    // a module with no envelope, no growth helper and no annotations
    // translates the same with and without the preprocessor's rewrites
    let source = asm_module("function f(x) { x = x | 0; return x | 0; } return { f: f };");
    let a = compile(&source);
    let b = compile(&source);
    assert_eq!(a, b);
}
