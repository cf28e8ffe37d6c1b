//! Trap shims.
//!
//! WebAssembly traps on integer division by zero, on `INT_MIN / -1`,
//! and on out-of-range float-to-int truncation; asm.js semantics must
//! not. Outside `Allow` mode these operations route through helper
//! functions synthesized at most once per (operation, width), or
//! through an ffi import in JS mode.

use crate::ir::{
    BinaryOp, Expression, ExprId, FuncArena, Function, Import, ImportKind, Literal, Module,
    UnaryOp, ValType,
};

use super::context::{Context, TrapMode};
use super::names;

/// i32 division/remainder with asm.js semantics (§4.6). In `Allow`
/// mode this is the raw operation.
pub fn i32_binary(
    ctx: &mut Context,
    module: &mut Module,
    arena: &mut FuncArena,
    op: BinaryOp,
    left: ExprId,
    right: ExprId,
) -> ExprId {
    if ctx.trap_mode == TrapMode::Allow {
        return arena.binary(op, left, right);
    }
    let target = match op {
        BinaryOp::I32RemS => names::I32S_REM,
        BinaryOp::I32RemU => names::I32U_REM,
        BinaryOp::I32DivS => names::I32S_DIV,
        BinaryOp::I32DivU => names::I32U_DIV,
        other => panic!("not a trapping i32 op: {:?}", other),
    };
    if ctx.added_functions.insert(target.to_string()) {
        module.add_function(make_int_div_helper(target, op, ValType::I32));
    }
    arena.alloc(Expression::Call {
        target: target.to_string(),
        operands: vec![left, right],
        ty: ValType::I32,
    })
}

/// i64 division/remainder with asm.js semantics; used by the wasm-only
/// sentinel intrinsics.
pub fn i64_binary(
    ctx: &mut Context,
    module: &mut Module,
    arena: &mut FuncArena,
    op: BinaryOp,
    left: ExprId,
    right: ExprId,
) -> ExprId {
    if ctx.trap_mode == TrapMode::Allow {
        return arena.binary(op, left, right);
    }
    let target = match op {
        BinaryOp::I64RemS => names::I64S_REM,
        BinaryOp::I64RemU => names::I64U_REM,
        BinaryOp::I64DivS => names::I64S_DIV,
        BinaryOp::I64DivU => names::I64U_DIV,
        other => panic!("not a trapping i64 op: {:?}", other),
    };
    if ctx.added_functions.insert(target.to_string()) {
        module.add_function(make_int_div_helper(target, op, ValType::I64));
    }
    arena.alloc(Expression::Call {
        target: target.to_string(),
        operands: vec![left, right],
        ty: ValType::I64,
    })
}

/// `(a, b) -> if b == 0 then 0 else a OP b`, with the signed-division
/// overflow case `INT_MIN / -1` short-circuited to 0 as well.
fn make_int_div_helper(name: &str, op: BinaryOp, ty: ValType) -> Function {
    let mut func = Function::new(name);
    func.add_param("a", ty);
    func.add_param("b", ty);
    func.result = ty;

    let arena = &mut func.arena;
    let a = arena.get_local(0, ty);
    let b = arena.get_local(1, ty);
    let mut result = arena.binary(op, a, b);

    if matches!(op, BinaryOp::I32DivS | BinaryOp::I64DivS) {
        let (eq, min_lit, neg_one) = match ty {
            ValType::I32 => (
                BinaryOp::I32Eq,
                Literal::I32(i32::MIN),
                Literal::I32(-1),
            ),
            _ => (
                BinaryOp::I64Eq,
                Literal::I64(i64::MIN),
                Literal::I64(-1),
            ),
        };
        let a = arena.get_local(0, ty);
        let min_const = arena.const_(min_lit);
        let is_min = arena.binary(eq, a, min_const);
        let b = arena.get_local(1, ty);
        let neg_one_const = arena.const_(neg_one);
        let is_neg_one = arena.binary(eq, b, neg_one_const);
        let overflow = arena.binary(BinaryOp::I32And, is_min, is_neg_one);
        let zero = arena.const_(Literal::zero(ty));
        result = arena.alloc(Expression::If {
            condition: overflow,
            if_true: zero,
            if_false: Some(result),
            ty,
        });
    }

    let eqz = match ty {
        ValType::I32 => UnaryOp::I32Eqz,
        _ => UnaryOp::I64Eqz,
    };
    let b = arena.get_local(1, ty);
    let b_is_zero = arena.unary(eqz, b);
    let zero = arena.const_(Literal::zero(ty));
    let body = arena.alloc(Expression::If {
        condition: b_is_zero,
        if_true: zero,
        if_false: Some(result),
        ty,
    });
    func.body = Some(body);
    func
}

/// Float-to-int truncation with asm.js semantics (§4.6): raw trunc in
/// `Allow` mode, an ffi in `JS` mode, a clamping helper in `Clamp` mode.
/// `signed_` only matters in `Allow` mode; the emulations follow the
/// double path.
pub fn float_to_int(
    ctx: &mut Context,
    module: &mut Module,
    arena: &mut FuncArena,
    signed_: bool,
    value: ExprId,
) -> ExprId {
    if ctx.trap_mode == TrapMode::Allow {
        let is_f64 = arena.ty(value) == ValType::F64;
        let op = match (signed_, is_f64) {
            (true, true) => UnaryOp::I32TruncF64S,
            (true, false) => UnaryOp::I32TruncF32S,
            (false, true) => UnaryOp::I32TruncF64U,
            (false, false) => UnaryOp::I32TruncF32U,
        };
        return arena.unary(op, value);
    }

    // normalize the input to f64
    let input = if arena.ty(value) == ValType::F32 {
        arena.unary(UnaryOp::F64PromoteF32, value)
    } else {
        value
    };

    if ctx.trap_mode == TrapMode::Js {
        // precise JavaScript semantics via a slow ffi
        if ctx.added_functions.insert(names::F64_TO_INT.to_string()) {
            module.add_import(Import {
                name: names::F64_TO_INT.to_string(),
                module: names::ASM2WASM.to_string(),
                base: names::F64_TO_INT.to_string(),
                kind: ImportKind::Function {
                    sig: Some("id".to_string()),
                },
            });
        }
        return arena.alloc(Expression::CallImport {
            target: names::F64_TO_INT.to_string(),
            operands: vec![input],
            ty: ValType::I32,
        });
    }

    debug_assert_eq!(ctx.trap_mode, TrapMode::Clamp);
    if ctx.added_functions.insert(names::F64_TO_INT.to_string()) {
        module.add_function(make_clamping_f64_to_int());
    }
    arena.alloc(Expression::Call {
        target: names::F64_TO_INT.to_string(),
        operands: vec![input],
        ty: ValType::I32,
    })
}

/// The clamp helper returns `i32::MIN` for NaN and for both overflow
/// directions; this matches native builds rather than the `frem`-based
/// behavior of asm.js itself.
fn make_clamping_f64_to_int() -> Function {
    let mut func = Function::new(names::F64_TO_INT);
    func.add_param("v", ValType::F64);
    func.result = ValType::I32;

    let arena = &mut func.arena;
    let v = arena.get_local(0, ValType::F64);
    let mut body = arena.unary(UnaryOp::I32TruncF64S, v);

    // too small
    let v = arena.get_local(0, ValType::F64);
    let low_bound = arena.const_(Literal::F64(i32::MIN as f64 - 1.0));
    let too_small = arena.binary(BinaryOp::F64Le, v, low_bound);
    let min = arena.const_(Literal::I32(i32::MIN));
    body = arena.alloc(Expression::If {
        condition: too_small,
        if_true: min,
        if_false: Some(body),
        ty: ValType::I32,
    });

    // too big: min here as well, anything out of range goes to the min
    let v = arena.get_local(0, ValType::F64);
    let high_bound = arena.const_(Literal::F64(i32::MAX as f64 + 1.0));
    let too_big = arena.binary(BinaryOp::F64Ge, v, high_bound);
    let min = arena.const_(Literal::I32(i32::MIN));
    body = arena.alloc(Expression::If {
        condition: too_big,
        if_true: min,
        if_false: Some(body),
        ty: ValType::I32,
    });

    // nan
    let v1 = arena.get_local(0, ValType::F64);
    let v2 = arena.get_local(0, ValType::F64);
    let is_nan = arena.binary(BinaryOp::F64Ne, v1, v2);
    let min = arena.const_(Literal::I32(i32::MIN));
    body = arena.alloc(Expression::If {
        condition: is_nan,
        if_true: min,
        if_false: Some(body),
        ty: ValType::I32,
    });

    func.body = Some(body);
    func
}

/// Register the `asm2wasm.f64-rem` import on first use (signature `ddd`).
pub fn ensure_f64_rem_import(ctx: &mut Context, module: &mut Module) {
    if ctx.added_functions.insert(names::F64_REM.to_string()) {
        module.add_import(Import {
            name: names::F64_REM.to_string(),
            module: names::ASM2WASM.to_string(),
            base: names::F64_REM.to_string(),
            kind: ImportKind::Function {
                sig: Some("ddd".to_string()),
            },
        });
    }
}

/// Register the `asm2wasm.debugger` import on first use (signature `v`).
pub fn ensure_debugger_import(ctx: &mut Context, module: &mut Module) {
    if ctx.added_functions.insert(names::DEBUGGER.to_string()) {
        module.add_import(Import {
            name: names::DEBUGGER.to_string(),
            module: names::ASM2WASM.to_string(),
            base: names::DEBUGGER.to_string(),
            kind: ImportKind::Function {
                sig: Some("v".to_string()),
            },
        });
    }
}
