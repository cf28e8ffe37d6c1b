//! Shared helpers for the end-to-end tests.
//!
//! Tests feed complete asm.js modules through the pipeline and assert
//! on the decoded output. The decode helpers wrap `wasmparser` to pull
//! structured facts (imports, exports, element layout, instruction
//! usage) back out of the emitted binary.

use wasmparser::{ElementItems, ElementKind, ExternalKind, Operator, Parser, Payload, TypeRef};

pub use smelt::{translate, translate_to_ir, TranslateOptions, TrapMode};

/// A standard module prologue with the heap views and math imports the
/// scenarios use.
pub const PRELUDE: &str = "var HEAP8 = new global.Int8Array(buffer); \
     var HEAPU8 = new global.Uint8Array(buffer); \
     var HEAP16 = new global.Int16Array(buffer); \
     var HEAP32 = new global.Int32Array(buffer); \
     var HEAPU32 = new global.Uint32Array(buffer); \
     var HEAPF32 = new global.Float32Array(buffer); \
     var HEAPF64 = new global.Float64Array(buffer); \
     var Math_imul = global.Math.imul; \
     var Math_clz32 = global.Math.clz32; \
     var Math_fround = global.Math.fround; \
     var Math_abs = global.Math.abs; \
     var Math_floor = global.Math.floor; \
     var Math_ceil = global.Math.ceil; \
     var Math_sqrt = global.Math.sqrt; \
     var Math_max = global.Math.max; \
     var Math_min = global.Math.min; \
     var tempDoublePtr = env.tempDoublePtr | 0; ";

/// Wrap a body in the standard module shape.
pub fn asm_module(body: &str) -> String {
    format!(
        "function asmModule(global, env, buffer) {{ \"use asm\"; {} {} }}",
        PRELUDE, body
    )
}

/// Translate with default options, panicking with the full error chain
/// on failure.
pub fn compile(source: &str) -> Vec<u8> {
    compile_with(source, &TranslateOptions::default())
}

pub fn compile_with(source: &str, options: &TranslateOptions) -> Vec<u8> {
    match translate(source.to_string(), options) {
        Ok(bytes) => bytes,
        Err(e) => panic!("translation failed: {:#}", e),
    }
}

/// (module, name, kind) for every import, in order. Kind is one of
/// "func", "global", "memory", "table".
pub fn imports(wasm: &[u8]) -> Vec<(String, String, &'static str)> {
    let mut result = Vec::new();
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::ImportSection(reader) = payload.expect("decode failed") {
            for import in reader {
                let import = import.expect("bad import entry");
                let kind = match import.ty {
                    TypeRef::Func(_) => "func",
                    TypeRef::Global(_) => "global",
                    TypeRef::Memory(_) => "memory",
                    TypeRef::Table(_) => "table",
                    _ => "other",
                };
                result.push((import.module.to_string(), import.name.to_string(), kind));
            }
        }
    }
    result
}

/// (name, kind) for every export, in order.
pub fn exports(wasm: &[u8]) -> Vec<(String, &'static str)> {
    let mut result = Vec::new();
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::ExportSection(reader) = payload.expect("decode failed") {
            for export in reader {
                let export = export.expect("bad export entry");
                let kind = match export.kind {
                    ExternalKind::Func => "func",
                    ExternalKind::Global => "global",
                    ExternalKind::Memory => "memory",
                    ExternalKind::Table => "table",
                    _ => "other",
                };
                result.push((export.name.to_string(), kind));
            }
        }
    }
    result
}

/// The maximum of the imported memory, in pages.
pub fn memory_import_max(wasm: &[u8]) -> Option<u64> {
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::ImportSection(reader) = payload.expect("decode failed") {
            for import in reader {
                let import = import.expect("bad import entry");
                if let TypeRef::Memory(mem) = import.ty {
                    return mem.maximum;
                }
            }
        }
    }
    None
}

/// Function indices of the single active element segment.
pub fn element_functions(wasm: &[u8]) -> Vec<u32> {
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::ElementSection(reader) = payload.expect("decode failed") {
            for element in reader {
                let element = element.expect("bad element entry");
                assert!(matches!(element.kind, ElementKind::Active { .. }));
                let ElementItems::Functions(items) = element.items else {
                    panic!("expected function elements");
                };
                return items
                    .into_iter()
                    .map(|f| f.expect("bad element function"))
                    .collect();
            }
        }
    }
    Vec::new()
}

/// Count occurrences of an operator (by matcher) across all function
/// bodies.
pub fn count_ops(wasm: &[u8], mut matches: impl FnMut(&Operator<'_>) -> bool) -> usize {
    let mut count = 0;
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::CodeSectionEntry(body) = payload.expect("decode failed") {
            let mut reader = body.get_operators_reader().expect("bad function body");
            while !reader.eof() {
                let op = reader.read().expect("bad operator");
                if matches(&op) {
                    count += 1;
                }
            }
        }
    }
    count
}

/// Number of defined (non-imported) functions.
pub fn defined_function_count(wasm: &[u8]) -> usize {
    let mut count = 0;
    for payload in Parser::new(0).parse_all(wasm) {
        if let Payload::CodeSectionEntry(_) = payload.expect("decode failed") {
            count += 1;
        }
    }
    count
}
