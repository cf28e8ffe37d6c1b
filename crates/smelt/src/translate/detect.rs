//! asm.js type and signedness detection.
//!
//! Types are carried by coercion shapes, not declarations: `(e)|0` is
//! int, `+(e)` is double, `fround(e)` is float. Detection is purely
//! syntactic and consults local/global tables only for bare names.

use crate::ast::{BinOp, Expr, UnOp};

use super::context::{AsmType, Context};

/// Signedness hint of an int-typed expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Signed,
    Unsigned,
    /// Works as either (e.g. a small literal or an add).
    Flexible,
    NoSign,
}

/// Lookup for names in scope, provided by the function translator.
pub trait NameTypes {
    fn local_type(&self, name: &str) -> Option<AsmType>;
}

/// No locals in scope (module-level detection).
pub struct NoLocals;

impl NameTypes for NoLocals {
    fn local_type(&self, _name: &str) -> Option<AsmType> {
        None
    }
}

/// Detect the asm.js type of an expression. `in_var_def` accepts the
/// initializer shapes of `var` declarations (`0`, `+0`, `fround(0)`,
/// `i64(0)`).
pub fn detect_type(
    ctx: &Context,
    expr: &Expr,
    locals: &dyn NameTypes,
    in_var_def: bool,
) -> AsmType {
    match expr {
        Expr::Num(n) => {
            if n.fract() == 0.0 {
                AsmType::Int
            } else {
                AsmType::Double
            }
        }
        Expr::Name(name) => {
            if let Some(ty) = locals.local_type(name) {
                return ty;
            }
            if let Some(global) = ctx.mapped_globals.get(name.as_str()) {
                return AsmType::from_wasm(global.ty);
            }
            AsmType::None
        }
        Expr::Unary(UnOp::Plus, _) => AsmType::Double,
        Expr::Unary(UnOp::Minus, e) => detect_type(ctx, e, locals, in_var_def),
        Expr::Unary(UnOp::BitNot | UnOp::LogNot, _) => AsmType::Int,
        Expr::Binary(op, left, right) => match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let l = detect_type(ctx, left, locals, in_var_def);
                if l != AsmType::None {
                    l
                } else {
                    detect_type(ctx, right, locals, in_var_def)
                }
            }
            _ => AsmType::Int,
        },
        Expr::Conditional(_, then, _) => detect_type(ctx, then, locals, in_var_def),
        Expr::Seq(_, b) => detect_type(ctx, b, locals, in_var_def),
        Expr::Call(callee, _) => {
            if let Some(name) = callee.as_name() {
                if ctx.intrinsics.is(&ctx.intrinsics.fround, name) {
                    return AsmType::Float;
                }
                if ctx.wasm_only {
                    if let Some(ty) = wasm_only_call_type(name) {
                        return ty;
                    }
                }
            }
            AsmType::None
        }
        Expr::Sub(base, _) => {
            // heap access: the view dictates the type
            if let Some(name) = base.as_name() {
                if let Some(view) = ctx.views.get(name) {
                    return view.ty;
                }
            }
            AsmType::None
        }
        Expr::Assign(_, value) => detect_type(ctx, value, locals, in_var_def),
        _ => AsmType::None,
    }
}

/// Result types of the wasm-only sentinel calls, needed so type
/// detection sees through them (`i64_add(x, y)` is an i64, etc.).
fn wasm_only_call_type(name: &str) -> Option<AsmType> {
    match name {
        "i64" | "i64_const" => Some(AsmType::Int64),
        "loadf" | "f32_copysign" | "i32_bc2f" => Some(AsmType::Float),
        "loadd" | "f64_copysign" | "i64_bc2d" => Some(AsmType::Double),
        "load1" | "load2" | "load4" | "i32_cttz" | "i32_ctpop" | "i32_bc2i" => Some(AsmType::Int),
        "load8" => Some(AsmType::Int64),
        _ => {
            if let Some(rest) = name.strip_prefix("i64_") {
                // comparisons produce an i32; everything else stays i64
                let comparison = matches!(
                    rest,
                    "eq" | "ne"
                        | "ule"
                        | "sle"
                        | "uge"
                        | "sge"
                        | "ult"
                        | "slt"
                        | "ugt"
                        | "sgt"
                );
                return Some(if comparison { AsmType::Int } else { AsmType::Int64 });
            }
            None
        }
    }
}

/// Detect the signedness of an int expression; used to pick between
/// signed and unsigned division, conversion and comparison forms.
pub fn detect_sign(expr: &Expr) -> Sign {
    match expr {
        Expr::Num(n) => {
            if n.fract() != 0.0 {
                Sign::NoSign
            } else if *n < 0.0 {
                Sign::Signed
            } else if *n > i32::MAX as f64 {
                Sign::Unsigned
            } else {
                Sign::Flexible
            }
        }
        Expr::Binary(op, ..) => match op {
            BinOp::ShrU => Sign::Unsigned,
            BinOp::Or | BinOp::And | BinOp::Xor | BinOp::Shl | BinOp::Shr => Sign::Signed,
            BinOp::Add | BinOp::Sub | BinOp::Mul => Sign::Flexible,
            _ => Sign::NoSign,
        },
        Expr::Unary(UnOp::BitNot, _) => Sign::Signed,
        Expr::Unary(UnOp::Minus, e) => detect_sign(e),
        _ => Sign::NoSign,
    }
}

/// The `(e) >>> 0` coercion (or a literal too big for i32) marks an
/// expression as unsigned.
pub fn is_unsigned_coercion(expr: &Expr) -> bool {
    detect_sign(expr) == Sign::Unsigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Expr, UnOp};
    use crate::translate::context::{Context, View};

    fn name(s: &str) -> Expr {
        Expr::Name(s.to_string())
    }

    fn or_zero(e: Expr) -> Expr {
        Expr::Binary(BinOp::Or, Box::new(e), Box::new(Expr::Num(0.0)))
    }

    #[test]
    fn coercion_shapes() {
        let ctx = Context::default();
        assert_eq!(
            detect_type(&ctx, &or_zero(name("x")), &NoLocals, false),
            AsmType::Int
        );
        assert_eq!(
            detect_type(
                &ctx,
                &Expr::Unary(UnOp::Plus, Box::new(name("x"))),
                &NoLocals,
                false
            ),
            AsmType::Double
        );
        assert_eq!(
            detect_type(&ctx, &Expr::Num(1.5), &NoLocals, false),
            AsmType::Double
        );
        assert_eq!(
            detect_type(&ctx, &Expr::Num(3.0), &NoLocals, false),
            AsmType::Int
        );
    }

    #[test]
    fn fround_detects_as_float() {
        let mut ctx = Context::default();
        ctx.intrinsics.fround = Some("Math_fround".to_string());
        let call = Expr::Call(Box::new(name("Math_fround")), vec![name("x")]);
        assert_eq!(detect_type(&ctx, &call, &NoLocals, false), AsmType::Float);
    }

    #[test]
    fn heap_views_detect_through_sub() {
        let mut ctx = Context::default();
        ctx.views
            .insert("HEAPF32".to_string(), View::new(4, false, true, AsmType::Float));
        let access = Expr::Sub(Box::new(name("HEAPF32")), Box::new(name("p")));
        assert_eq!(detect_type(&ctx, &access, &NoLocals, false), AsmType::Float);
    }

    #[test]
    fn wasm_only_sentinels() {
        let mut ctx = Context::default();
        ctx.wasm_only = true;
        let add = Expr::Call(Box::new(name("i64_add")), vec![name("a"), name("b")]);
        assert_eq!(detect_type(&ctx, &add, &NoLocals, false), AsmType::Int64);
        let cmp = Expr::Call(Box::new(name("i64_slt")), vec![name("a"), name("b")]);
        assert_eq!(detect_type(&ctx, &cmp, &NoLocals, false), AsmType::Int);
        ctx.wasm_only = false;
        assert_eq!(detect_type(&ctx, &add, &NoLocals, false), AsmType::None);
    }

    #[test]
    fn unsigned_coercions() {
        let shr = Expr::Binary(BinOp::ShrU, Box::new(name("x")), Box::new(Expr::Num(0.0)));
        assert!(is_unsigned_coercion(&shr));
        assert!(!is_unsigned_coercion(&or_zero(name("x"))));
        assert!(is_unsigned_coercion(&Expr::Num(3_000_000_000.0)));
        assert!(!is_unsigned_coercion(&Expr::Num(7.0)));
    }
}
