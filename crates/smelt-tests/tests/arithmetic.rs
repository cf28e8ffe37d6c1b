//! Expression translation: operators, coercions, math intrinsics.

use smelt_tests::{asm_module, compile, count_ops, exports};
use wasmparser::Operator;

#[test]
fn add_function_signature_and_body() {
    let wasm = compile(&asm_module(
        "function add(x, y) { x = x | 0; y = y | 0; return (x + y) | 0; } \
         return { add: add };",
    ));
    assert!(exports(&wasm).contains(&("add".to_string(), "func")));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Add)), 1);
}

#[test]
fn double_arithmetic_uses_f64_ops() {
    let wasm = compile(&asm_module(
        "function mix(a, b) { a = +a; b = +b; return +(a * b + a); } \
         return { mix: mix };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::F64Mul)), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::F64Add)), 1);
}

#[test]
fn int_negation_is_zero_minus() {
    let wasm = compile(&asm_module(
        "function neg(x) { x = x | 0; return (0 - (x | 0)) | 0; } \
         function neg2(x) { x = x | 0; return (-(x | 0)) | 0; } \
         return { neg: neg, neg2: neg2 };",
    ));
    // both spellings produce i32.sub from zero
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Sub)), 2);
}

#[test]
fn float_negation_is_a_real_neg() {
    let wasm = compile(&asm_module(
        "function neg(d) { d = +d; return +(-d); } return { neg: neg };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::F64Neg)), 1);
}

#[test]
fn bitwise_not_is_xor_minus_one() {
    let wasm = compile(&asm_module(
        "function inv(x) { x = x | 0; return (~x) | 0; } return { inv: inv };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Xor)), 1);
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I32Const { value: -1 })),
        1
    );
}

#[test]
fn logical_not_is_eqz() {
    let wasm = compile(&asm_module(
        "function not(x) { x = x | 0; return (!(x | 0)) | 0; } return { not: not };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Eqz)), 1);
}

#[test]
fn imul_and_clz_lower_to_plain_ops() {
    let wasm = compile(&asm_module(
        "function f(x, y) { x = x | 0; y = y | 0; \
           return (Math_imul(x | 0, y | 0) + Math_clz32(x | 0)) | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Mul)), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Clz)), 1);
}

#[test]
fn fround_of_a_literal_is_an_f32_const() {
    let wasm = compile(&asm_module(
        "function f() { return Math_fround(1.5); } return { f: f };",
    ));
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F32Const { .. })),
        1
    );
    // no conversion happens at runtime
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F32DemoteF64)),
        0
    );
}

#[test]
fn fround_of_an_int_converts() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; return Math_fround(Math_fround(0.0) + Math_fround(x | 0)); } \
         return { f: f };",
    ));
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F32ConvertI32S)),
        1
    );
}

#[test]
fn integer_abs_expands_to_a_select() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; return Math_abs(x | 0) | 0; } return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Select)), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32LtS)), 1);
}

#[test]
fn float_abs_and_sqrt_use_native_ops() {
    let wasm = compile(&asm_module(
        "function f(d) { d = +d; return +Math_sqrt(Math_abs(d)); } return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::F64Abs)), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::F64Sqrt)), 1);
}

#[test]
fn min_max_dispatch_on_operand_type() {
    let wasm = compile(&asm_module(
        "function f(a, b) { a = +a; b = +b; return +Math_max(Math_min(a, b), 0.5); } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::F64Min)), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::F64Max)), 1);
}

#[test]
fn unsigned_coercion_picks_unsigned_division() {
    let wasm = compile(&asm_module(
        "function f(x, y) { x = x | 0; y = y | 0; \
           return ((x >>> 0) / (y >>> 0)) >>> 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32DivU)), 1);
}

#[test]
fn signed_division_stays_signed() {
    let wasm = compile(&asm_module(
        "function f(x, y) { x = x | 0; y = y | 0; return ((x | 0) / (y | 0)) | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32DivS)), 1);
}

#[test]
fn unsigned_comparison_forms() {
    let wasm = compile(&asm_module(
        "function f(x, y) { x = x | 0; y = y | 0; \
           return ((x >>> 0) < (y >>> 0)) | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32LtU)), 1);
}

#[test]
fn plus_coercion_converts_by_signedness() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; return +(x >>> 0); } \
         function g(x) { x = x | 0; return +(x | 0); } \
         return { f: f, g: g };",
    ));
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F64ConvertI32U)),
        1
    );
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::F64ConvertI32S)),
        1
    );
}

#[test]
fn conditional_expression_becomes_a_typed_if() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; return ((x | 0) > 0 ? 1 : 2) | 0; } return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::If { .. })), 1);
}
