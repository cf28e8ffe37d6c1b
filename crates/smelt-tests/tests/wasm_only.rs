//! The wasm-only sentinel intrinsics: i64 arithmetic, raw loads and
//! stores, bitcasts.

use smelt_tests::{asm_module, compile_with, count_ops, TranslateOptions, TrapMode};
use wasmparser::Operator;

fn options() -> TranslateOptions {
    TranslateOptions {
        wasm_only: true,
        ..Default::default()
    }
}

#[test]
fn i64_locals_and_arithmetic() {
    let source = asm_module(
        "function f(x) { x = x | 0; var a = i64(0); \
           a = i64_add(i64_sext(x), i64_const(0, 1)); \
           return i64_trunc(a) | 0; } \
         return { f: f };",
    );
    let wasm = compile_with(&source, &options());
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I64Add)), 1);
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I64ExtendI32S)),
        1
    );
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I32WrapI64)),
        1
    );
    // i64_const(0, 1) packs to 1 << 32
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I64Const { value } if *value == 1 << 32)),
        1
    );
}

#[test]
fn i64_comparisons_produce_i32() {
    let source = asm_module(
        "function f(x, y) { x = x | 0; y = y | 0; \
           return i64_slt(i64_sext(x), i64_sext(y)) | 0; } \
         return { f: f };",
    );
    let wasm = compile_with(&source, &options());
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I64LtS)), 1);
}

#[test]
fn raw_load_store_bypass_the_views() {
    let source = asm_module(
        "function f(p) { p = p | 0; \
           store4(p | 0, load4((p + 8) | 0)); \
           storef((p + 4) | 0, Math_fround(1.0)); \
           return +loadd((p + 16) | 0); } \
         return { f: f };",
    );
    let wasm = compile_with(&source, &options());
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I32Load { .. })),
        1
    );
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I32Store { .. })),
        1
    );
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F32Store { .. })),
        1
    );
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F64Load { .. })),
        1
    );
}

#[test]
fn explicit_alignment_overrides_the_natural_one() {
    let source = asm_module(
        "function f(p) { p = p | 0; return load4(p | 0, 1) | 0; } return { f: f };",
    );
    let wasm = compile_with(&source, &options());
    assert_eq!(
        count_ops(&wasm, |op| matches!(
            op,
            Operator::I32Load { memarg } if memarg.align == 0
        )),
        1
    );
}

#[test]
fn storef_demotes_double_values() {
    let source = asm_module(
        "function f(p, d) { p = p | 0; d = +d; storef(p | 0, d); } return { f: f };",
    );
    let wasm = compile_with(&source, &options());
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F32DemoteF64)),
        1
    );
}

#[test]
fn bitcast_intrinsics() {
    let source = asm_module(
        "function f(x) { x = Math_fround(x); return i32_bc2i(x) | 0; } \
         function g(x) { x = x | 0; return Math_fround(i32_bc2f(x)); } \
         return { f: f, g: g };",
    );
    let wasm = compile_with(&source, &options());
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I32ReinterpretF32)),
        1
    );
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F32ReinterpretI32)),
        1
    );
}

#[test]
fn i64_division_respects_the_trap_mode() {
    let source = asm_module(
        "function f(x, y) { x = x | 0; y = y | 0; \
           return i64_trunc(i64_sdiv(i64_sext(x), i64_sext(y))) | 0; } \
         return { f: f };",
    );
    let allow = compile_with(&source, &options());
    assert_eq!(count_ops(&allow, |op| matches!(op, Operator::I64DivS)), 1);

    let clamp = compile_with(
        &source,
        &TranslateOptions {
            wasm_only: true,
            trap_mode: TrapMode::Clamp,
            ..Default::default()
        },
    );
    // the division moved into the i64s-div helper, with both guards
    assert_eq!(count_ops(&clamp, |op| matches!(op, Operator::I64DivS)), 1);
    assert_eq!(count_ops(&clamp, |op| matches!(op, Operator::I64Eqz)), 1);
    assert_eq!(
        count_ops(&clamp, |op| matches!(op, Operator::I64Const { value: -1 })),
        1
    );
}

#[test]
fn copysign_intrinsics() {
    let source = asm_module(
        "function f(a, b) { a = +a; b = +b; return +f64_copysign(a, b); } \
         return { f: f };",
    );
    let wasm = compile_with(&source, &options());
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F64Copysign)),
        1
    );
}
