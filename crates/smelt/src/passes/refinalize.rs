//! Bottom-up type recomputation.
//!
//! Call types are corrected after construction (import widening, direct
//! call results), which invalidates the stored types of enclosing
//! blocks, ifs and loops. This pass recomputes them post-order. A block
//! that is a branch target never carries a value (breaks here carry
//! none), so its type is forced to `none`.

use rustc_hash::FxHashSet;

use crate::ir::{Expression, ExprId, FuncArena, Function, ValType};

pub fn run(func: &mut Function) {
    let Some(body) = func.body else {
        return;
    };
    let mut targeted = FxHashSet::default();
    collect_targets(&func.arena, body, &mut targeted);
    finalize(&mut func.arena, body, &targeted);
}

fn collect_targets(arena: &FuncArena, root: ExprId, out: &mut FxHashSet<String>) {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        match arena.get(id) {
            Expression::Break { name, condition } => {
                out.insert(name.clone());
                if let Some(c) = condition {
                    stack.push(*c);
                }
            }
            Expression::Switch {
                condition,
                targets,
                default,
            } => {
                out.extend(targets.iter().cloned());
                out.insert(default.clone());
                stack.push(*condition);
            }
            other => push_children(other, &mut stack),
        }
    }
}

fn push_children(node: &Expression, stack: &mut Vec<ExprId>) {
    match node {
        Expression::Block { list, .. } => stack.extend(list.iter().copied()),
        Expression::If {
            condition,
            if_true,
            if_false,
            ..
        } => {
            stack.push(*condition);
            stack.push(*if_true);
            if let Some(f) = if_false {
                stack.push(*f);
            }
        }
        Expression::Loop { body, .. } => stack.push(*body),
        Expression::SetLocal { value, .. }
        | Expression::SetGlobal { value, .. }
        | Expression::Drop { value }
        | Expression::Unary { value, .. } => stack.push(*value),
        Expression::Load { ptr, .. } => stack.push(*ptr),
        Expression::Store { ptr, value, .. } => {
            stack.push(*ptr);
            stack.push(*value);
        }
        Expression::Binary { left, right, .. } => {
            stack.push(*left);
            stack.push(*right);
        }
        Expression::Select {
            condition,
            if_true,
            if_false,
            ..
        } => {
            stack.push(*condition);
            stack.push(*if_true);
            stack.push(*if_false);
        }
        Expression::Call { operands, .. } | Expression::CallImport { operands, .. } => {
            stack.extend(operands.iter().copied());
        }
        Expression::CallIndirect {
            target, operands, ..
        } => {
            stack.push(*target);
            stack.extend(operands.iter().copied());
        }
        Expression::Return { value } => {
            if let Some(v) = value {
                stack.push(*v);
            }
        }
        Expression::Break { condition, .. } => {
            if let Some(c) = condition {
                stack.push(*c);
            }
        }
        Expression::Switch { condition, .. } => stack.push(*condition),
        Expression::Nop
        | Expression::Unreachable
        | Expression::Const(_)
        | Expression::GetLocal { .. }
        | Expression::GetGlobal { .. } => {}
    }
}

fn finalize(arena: &mut FuncArena, id: ExprId, targeted: &FxHashSet<String>) {
    match arena.get(id).clone() {
        Expression::Block { name, list, .. } => {
            for child in &list {
                finalize(arena, *child, targeted);
            }
            let is_target = name.as_deref().is_some_and(|n| targeted.contains(n));
            let ty = if is_target {
                ValType::None
            } else {
                match list.last() {
                    Some(&last) => {
                        let t = arena.ty(last);
                        if t.is_concrete() {
                            t
                        } else {
                            ValType::None
                        }
                    }
                    None => ValType::None,
                }
            };
            if let Expression::Block { ty: slot, .. } = arena.get_mut(id) {
                *slot = ty;
            }
        }
        Expression::If {
            condition,
            if_true,
            if_false,
            ..
        } => {
            finalize(arena, condition, targeted);
            finalize(arena, if_true, targeted);
            if let Some(f) = if_false {
                finalize(arena, f, targeted);
            }
            let ty = match if_false {
                Some(f) => {
                    let t = arena.ty(if_true);
                    if t.is_concrete() && t == arena.ty(f) {
                        t
                    } else {
                        ValType::None
                    }
                }
                None => ValType::None,
            };
            if let Expression::If { ty: slot, .. } = arena.get_mut(id) {
                *slot = ty;
            }
        }
        Expression::Loop { body, .. } => {
            finalize(arena, body, targeted);
            let t = arena.ty(body);
            let ty = if t.is_concrete() { t } else { ValType::None };
            if let Expression::Loop { ty: slot, .. } = arena.get_mut(id) {
                *slot = ty;
            }
        }
        other => {
            let mut stack = Vec::new();
            push_children(&other, &mut stack);
            for child in stack {
                finalize(arena, child, targeted);
            }
        }
    }
}
