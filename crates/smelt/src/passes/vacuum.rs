//! Minimal cleanup: remove nops (notably the ones debug-info folding
//! leaves behind) and unwrap single-child unnamed blocks.

use crate::ir::{Expression, ExprId, FuncArena, Function, ValType};

pub fn run(func: &mut Function) {
    let Some(body) = func.body else {
        return;
    };
    clean(&mut func.arena, body);
}

fn clean(arena: &mut FuncArena, id: ExprId) {
    match arena.get(id).clone() {
        Expression::Block { list, name, ty } => {
            for child in &list {
                clean(arena, *child);
            }
            let kept: Vec<ExprId> = list
                .iter()
                .copied()
                .filter(|&c| !matches!(arena.get(c), Expression::Nop))
                .collect();
            if kept.len() == 1 && name.is_none() && !ty.is_concrete() {
                // unwrap the sole child into this handle
                let child = kept[0];
                let child_node = arena.replace(child, Expression::Nop);
                arena.replace(id, child_node);
                return;
            }
            if let Expression::Block { list: slot, .. } = arena.get_mut(id) {
                *slot = kept;
            }
        }
        Expression::If {
            condition,
            if_true,
            if_false,
            ..
        } => {
            clean(arena, condition);
            clean(arena, if_true);
            if let Some(f) = if_false {
                clean(arena, f);
                // an empty else arm is no arm at all
                if matches!(arena.get(f), Expression::Nop) {
                    if let Expression::If { if_false: slot, .. } = arena.get_mut(id) {
                        *slot = None;
                    }
                }
            }
        }
        Expression::Loop { body, .. } => clean(arena, body),
        Expression::Drop { value } => {
            clean(arena, value);
            // a drop of a nopped debug call vanishes with it
            if matches!(arena.get(value), Expression::Nop) {
                arena.replace(id, Expression::Nop);
            }
        }
        Expression::SetLocal { value, .. } | Expression::SetGlobal { value, .. } => {
            clean(arena, value)
        }
        Expression::Store { ptr, value, .. } => {
            clean(arena, ptr);
            clean(arena, value);
        }
        Expression::Load { ptr, .. } => clean(arena, ptr),
        Expression::Unary { value, .. } => clean(arena, value),
        Expression::Binary { left, right, .. } => {
            clean(arena, left);
            clean(arena, right);
        }
        Expression::Select {
            condition,
            if_true,
            if_false,
            ..
        } => {
            clean(arena, condition);
            clean(arena, if_true);
            clean(arena, if_false);
        }
        Expression::Call { operands, .. } | Expression::CallImport { operands, .. } => {
            for op in operands {
                clean(arena, op);
            }
        }
        Expression::CallIndirect {
            target, operands, ..
        } => {
            clean(arena, target);
            for op in operands {
                clean(arena, op);
            }
        }
        Expression::Return { value } => {
            if let Some(v) = value {
                clean(arena, v);
            }
        }
        Expression::Break { condition, .. } => {
            if let Some(c) = condition {
                clean(arena, c);
            }
        }
        Expression::Switch { condition, .. } => clean(arena, condition),
        Expression::Nop
        | Expression::Unreachable
        | Expression::Const(_)
        | Expression::GetLocal { .. }
        | Expression::GetGlobal { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Literal;

    #[test]
    fn nops_are_removed_from_blocks() {
        let mut func = Function::new("f");
        let nop1 = func.arena.nop();
        let set = {
            let c = func.arena.const_(Literal::I32(1));
            func.arena.set_local(0, c)
        };
        let nop2 = func.arena.nop();
        let block = func.arena.alloc(Expression::Block {
            name: None,
            list: vec![nop1, set, nop2],
            ty: ValType::None,
        });
        func.body = Some(block);
        run(&mut func);
        // set is the only survivor, so the block unwraps into it
        assert!(matches!(func.arena.get(block), Expression::SetLocal { .. }));
    }

    #[test]
    fn named_blocks_are_not_unwrapped() {
        let mut func = Function::new("f");
        let nop = func.arena.nop();
        let br = func.arena.break_to("out");
        let block = func.arena.alloc(Expression::Block {
            name: Some("out".into()),
            list: vec![nop, br],
            ty: ValType::None,
        });
        func.body = Some(block);
        run(&mut func);
        let Expression::Block { list, name, .. } = func.arena.get(block) else {
            panic!("named block must survive");
        };
        assert_eq!(name.as_deref(), Some("out"));
        assert_eq!(list.len(), 1);
    }
}
