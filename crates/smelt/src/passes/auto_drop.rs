//! Insert `drop` where values land in no-value positions.
//!
//! The translator leaves concrete-typed expressions in statement
//! positions (calls whose results are unused, set-global sequences, and
//! import calls whose results get widened during finalization). This
//! pass walks each function with a "value used" flag and wraps unused
//! value producers in `Drop`. Structured nodes (blocks, ifs, loops)
//! push the flag inward instead of being wrapped themselves, so branch
//! targets stay valueless.
//!
//! Run re-finalize afterwards: dropping changes the types of enclosing
//! blocks.

use crate::ir::{Expression, ExprId, FuncArena, Function};

pub fn run(func: &mut Function) {
    let Some(body) = func.body else {
        return;
    };
    let used = func.result.is_concrete();
    walk(&mut func.arena, body, used);
}

fn walk(arena: &mut FuncArena, id: ExprId, value_used: bool) {
    match arena.get(id).clone() {
        Expression::Block { list, .. } => {
            for (i, child) in list.iter().enumerate() {
                let last = i + 1 == list.len();
                walk(arena, *child, last && value_used);
            }
        }
        Expression::If {
            condition,
            if_true,
            if_false,
            ..
        } => {
            walk(arena, condition, true);
            match if_false {
                Some(f) => {
                    walk(arena, if_true, value_used);
                    walk(arena, f, value_used);
                }
                None => walk(arena, if_true, false),
            }
        }
        Expression::Loop { body, .. } => walk(arena, body, value_used),
        Expression::SetLocal { value, .. }
        | Expression::SetGlobal { value, .. }
        | Expression::Drop { value } => walk(arena, value, true),
        Expression::Store { ptr, value, .. } => {
            walk(arena, ptr, true);
            walk(arena, value, true);
        }
        Expression::Load { ptr, .. } => {
            walk(arena, ptr, true);
            maybe_drop(arena, id, value_used);
        }
        Expression::Unary { value, .. } => {
            walk(arena, value, true);
            maybe_drop(arena, id, value_used);
        }
        Expression::Binary { left, right, .. } => {
            walk(arena, left, true);
            walk(arena, right, true);
            maybe_drop(arena, id, value_used);
        }
        Expression::Select {
            condition,
            if_true,
            if_false,
            ..
        } => {
            walk(arena, condition, true);
            walk(arena, if_true, true);
            walk(arena, if_false, true);
            maybe_drop(arena, id, value_used);
        }
        Expression::Call { operands, .. } | Expression::CallImport { operands, .. } => {
            for op in operands {
                walk(arena, op, true);
            }
            maybe_drop(arena, id, value_used);
        }
        Expression::CallIndirect {
            target, operands, ..
        } => {
            walk(arena, target, true);
            for op in operands {
                walk(arena, op, true);
            }
            maybe_drop(arena, id, value_used);
        }
        Expression::Return { value } => {
            if let Some(v) = value {
                walk(arena, v, true);
            }
        }
        Expression::Break { condition, .. } => {
            if let Some(c) = condition {
                walk(arena, c, true);
            }
        }
        Expression::Switch { condition, .. } => walk(arena, condition, true),
        Expression::Const(_) | Expression::GetLocal { .. } | Expression::GetGlobal { .. } => {
            maybe_drop(arena, id, value_used);
        }
        Expression::Nop | Expression::Unreachable => {}
    }
}

/// Wrap the node in a `Drop`, keeping the handle valid for its parent.
fn maybe_drop(arena: &mut FuncArena, id: ExprId, value_used: bool) {
    if value_used || !arena.ty(id).is_concrete() {
        return;
    }
    let node = arena.replace(id, Expression::Nop);
    let inner = arena.alloc(node);
    arena.replace(id, Expression::Drop { value: inner });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Literal, ValType};

    #[test]
    fn unused_call_result_is_dropped() {
        let mut func = Function::new("f");
        let call = func.arena.alloc(Expression::Call {
            target: "g".into(),
            operands: vec![],
            ty: ValType::I32,
        });
        let nop = func.arena.nop();
        let block = func.arena.alloc(Expression::Block {
            name: None,
            list: vec![call, nop],
            ty: ValType::None,
        });
        func.body = Some(block);
        run(&mut func);
        assert!(matches!(func.arena.get(call), Expression::Drop { .. }));
    }

    #[test]
    fn used_values_are_left_alone() {
        let mut func = Function::new("f");
        func.result = ValType::I32;
        let c = func.arena.const_(Literal::I32(3));
        func.body = Some(c);
        run(&mut func);
        assert!(matches!(func.arena.get(c), Expression::Const(_)));
    }

    #[test]
    fn void_function_body_value_is_dropped() {
        let mut func = Function::new("f");
        let c = func.arena.const_(Literal::I32(3));
        func.body = Some(c);
        run(&mut func);
        assert!(matches!(func.arena.get(c), Expression::Drop { .. }));
    }

    #[test]
    fn if_without_else_drops_inside_the_arm() {
        let mut func = Function::new("f");
        let cond = func.arena.const_(Literal::I32(1));
        let arm = func.arena.const_(Literal::I32(2));
        let iff = func.arena.alloc(Expression::If {
            condition: cond,
            if_true: arm,
            if_false: None,
            ty: ValType::None,
        });
        func.body = Some(iff);
        run(&mut func);
        assert!(matches!(func.arena.get(arm), Expression::Drop { .. }));
        assert!(matches!(func.arena.get(iff), Expression::If { .. }));
    }
}
