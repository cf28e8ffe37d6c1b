//! Loop and switch lowering.

use smelt_tests::{asm_module, compile, count_ops};
use wasmparser::Operator;

#[test]
fn while_loop_shape() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; \
           while ((x | 0) > 0) { x = (x - 1) | 0; } \
           return x | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 1);
    // the exit branch tests the negated condition
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Eqz)), 1);
}

#[test]
fn while_true_has_no_condition_check() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; \
           while (1) { x = (x - 1) | 0; if (!(x | 0)) break; } \
           return x | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 1);
    // only the explicit break's eqz, no loop-head check
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Eqz)), 1);
}

#[test]
fn do_while_branches_backwards_conditionally() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; \
           do { x = (x - 1) | 0; } while ((x | 0) > 0); \
           return x | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::BrIf { .. })), 1);
}

#[test]
fn do_once_without_continue_needs_no_loop() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; \
           do { if ((x | 0) > 3) break; x = 5; } while (0); \
           return x | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 0);
}

#[test]
fn do_once_with_continue_keeps_the_loop() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; \
           do { x = (x - 1) | 0; if ((x | 0) > 3) continue; } while (0); \
           return x | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 1);
}

#[test]
fn for_loop_shape() {
    let wasm = compile(&asm_module(
        "function f(n) { n = n | 0; var i = 0, acc = 0; \
           for (i = 0; (i | 0) < (n | 0); i = (i + 1) | 0) { acc = (acc + i) | 0; } \
           return acc | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 1);
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32LtS)), 1);
}

#[test]
fn labeled_break_and_continue_cross_loops() {
    let wasm = compile(&asm_module(
        "function f(n) { n = n | 0; var i = 0, j = 0; \
           outer: while (1) { \
             i = (i + 1) | 0; \
             while (1) { \
               j = (j + 1) | 0; \
               if ((j | 0) > 3) continue outer; \
               if ((i | 0) > (n | 0)) break outer; \
             } \
           } \
           return (i + j) | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 2);
}

#[test]
fn same_label_name_nests_without_collision() {
    let wasm = compile(&asm_module(
        "function f(x) { x = x | 0; \
           L: while ((x | 0) > 0) { \
             x = (x - 1) | 0; \
             L: while ((x | 0) > 4) { x = (x - 2) | 0; break L; } \
           } \
           return x | 0; } \
         return { f: f };",
    ));
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Loop { .. })), 2);
}

#[test]
fn dense_switch_uses_br_table() {
    let wasm = compile(&asm_module(
        "var x0 = env.x0; var x1 = env.x1; var xd = env.xd; \
         function f(x) { x = x | 0; \
           switch (x | 0) { \
             case 0: x0(); break; \
             case 1: x1(); break; \
             default: xd(); \
           } } \
         return { f: f };",
    ));
    assert_eq!(
        count_ops(&wasm, |op| matches!(
            op,
            Operator::BrTable { targets } if targets.len() == 2
        )),
        1
    );
}

#[test]
fn switch_selector_is_offset_by_the_minimum() {
    let wasm = compile(&asm_module(
        "var h = env.h; \
         function f(x) { x = x | 0; \
           switch (x | 0) { \
             case 5: h(); break; \
             case 7: h(); break; \
           } } \
         return { f: f };",
    ));
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I32Const { value: 5 })),
        1
    );
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Sub)), 1);
    // case 6 is a hole, pointing at the default
    assert_eq!(
        count_ops(&wasm, |op| matches!(
            op,
            Operator::BrTable { targets } if targets.len() == 3
        )),
        1
    );
}

#[test]
fn sparse_switch_falls_back_to_an_if_chain() {
    let wasm = compile(&asm_module(
        "var h = env.h; \
         function f(x) { x = x | 0; \
           switch (x | 0) { \
             case 0: h(); break; \
             case 20000: h(); break; \
             default: h(); \
           } } \
         return { f: f };",
    ));
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::BrTable { .. })),
        0
    );
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::I32Eq)), 2);
}

#[test]
fn switch_fall_through_needs_no_duplicate_bodies() {
    let wasm = compile(&asm_module(
        "var h = env.h; var g = env.g; \
         function f(x) { x = x | 0; \
           switch (x | 0) { \
             case 0: h(); \
             case 1: g(); break; \
           } } \
         return { f: f };",
    ));
    // case 0 falls into case 1; each body appears once
    assert_eq!(count_ops(&wasm, |op| matches!(op, Operator::Call { .. })), 2);
}

#[test]
fn negative_case_keys_are_offset_correctly() {
    let wasm = compile(&asm_module(
        "var h = env.h; \
         function f(x) { x = x | 0; \
           switch (x | 0) { \
             case -1: h(); break; \
             case 1: h(); break; \
           } } \
         return { f: f };",
    ));
    assert_eq!(
        count_ops(&wasm, |op| matches!(
            op,
            Operator::BrTable { targets } if targets.len() == 3
        )),
        1
    );
    assert_eq!(
        count_ops(&wasm, |op| matches!(op, Operator::I32Const { value: -1 })),
        1
    );
}
