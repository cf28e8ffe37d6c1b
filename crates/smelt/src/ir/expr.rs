//! The WASM expression tree.
//!
//! Expressions form a closed variant, visited exhaustively by the
//! finalizer, the passes and codegen. Each function owns an arena of
//! nodes addressed by [`ExprId`] handles; children are handles into the
//! same arena. The handle layout keeps post-order rewrites cheap (no
//! shared ownership, no interior mutability) and lets function-parallel
//! passes each own a distinct arena.

use super::types::{BinaryOp, Literal, UnaryOp, ValType};

/// Label or symbol name inside the IR.
pub type Name = String;

/// Handle to an expression in its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Nop,
    Unreachable,
    Const(Literal),
    GetLocal {
        index: u32,
        ty: ValType,
    },
    SetLocal {
        index: u32,
        value: ExprId,
    },
    GetGlobal {
        name: Name,
        ty: ValType,
    },
    SetGlobal {
        name: Name,
        value: ExprId,
    },
    Load {
        bytes: u8,
        signed: bool,
        offset: u32,
        align: u32,
        ptr: ExprId,
        ty: ValType,
    },
    Store {
        bytes: u8,
        offset: u32,
        align: u32,
        ptr: ExprId,
        value: ExprId,
        value_ty: ValType,
    },
    Unary {
        op: UnaryOp,
        value: ExprId,
    },
    Binary {
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    },
    Select {
        condition: ExprId,
        if_true: ExprId,
        if_false: ExprId,
        ty: ValType,
    },
    /// Discard a value in statement position; inserted by auto-drop.
    Drop {
        value: ExprId,
    },
    Block {
        name: Option<Name>,
        list: Vec<ExprId>,
        ty: ValType,
    },
    If {
        condition: ExprId,
        if_true: ExprId,
        if_false: Option<ExprId>,
        ty: ValType,
    },
    Loop {
        /// Continue label; a branch to it re-enters the loop.
        name: Name,
        body: ExprId,
        ty: ValType,
    },
    Break {
        name: Name,
        condition: Option<ExprId>,
    },
    /// `br_table`.
    Switch {
        condition: ExprId,
        targets: Vec<Name>,
        default: Name,
    },
    Call {
        target: Name,
        operands: Vec<ExprId>,
        ty: ValType,
    },
    CallImport {
        target: Name,
        operands: Vec<ExprId>,
        ty: ValType,
    },
    CallIndirect {
        target: ExprId,
        operands: Vec<ExprId>,
        sig: String,
        ty: ValType,
    },
    Return {
        value: Option<ExprId>,
    },
}

impl Expression {
    /// Visit every direct child handle.
    pub fn for_each_child(&self, mut f: impl FnMut(ExprId)) {
        match self {
            Expression::Nop
            | Expression::Unreachable
            | Expression::Const(_)
            | Expression::GetLocal { .. }
            | Expression::GetGlobal { .. } => {}
            Expression::SetLocal { value, .. }
            | Expression::SetGlobal { value, .. }
            | Expression::Drop { value }
            | Expression::Unary { value, .. } => f(*value),
            Expression::Load { ptr, .. } => f(*ptr),
            Expression::Store { ptr, value, .. } => {
                f(*ptr);
                f(*value);
            }
            Expression::Binary { left, right, .. } => {
                f(*left);
                f(*right);
            }
            Expression::Select {
                condition,
                if_true,
                if_false,
                ..
            } => {
                f(*condition);
                f(*if_true);
                f(*if_false);
            }
            Expression::Block { list, .. } => {
                for child in list {
                    f(*child);
                }
            }
            Expression::If {
                condition,
                if_true,
                if_false,
                ..
            } => {
                f(*condition);
                f(*if_true);
                if let Some(other) = if_false {
                    f(*other);
                }
            }
            Expression::Loop { body, .. } => f(*body),
            Expression::Break { condition, .. } => {
                if let Some(c) = condition {
                    f(*c);
                }
            }
            Expression::Switch { condition, .. } => f(*condition),
            Expression::Call { operands, .. } | Expression::CallImport { operands, .. } => {
                for op in operands {
                    f(*op);
                }
            }
            Expression::CallIndirect {
                target, operands, ..
            } => {
                f(*target);
                for op in operands {
                    f(*op);
                }
            }
            Expression::Return { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
        }
    }
}

/// Per-function expression arena.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncArena {
    nodes: Vec<Expression>,
}

impl FuncArena {
    pub fn new() -> Self {
        FuncArena::default()
    }

    pub fn alloc(&mut self, e: Expression) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(e);
        id
    }

    pub fn get(&self, id: ExprId) -> &Expression {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut Expression {
        &mut self.nodes[id.index()]
    }

    /// Replace the node behind a handle, keeping the handle valid.
    pub fn replace(&mut self, id: ExprId, e: Expression) -> Expression {
        std::mem::replace(&mut self.nodes[id.index()], e)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, including ones orphaned by rewrites.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &Expression> {
        self.nodes.iter()
    }

    /// The value type an expression yields. Structured nodes carry a
    /// stored type (maintained by the re-finalize pass, since call
    /// types are corrected after construction); leaves derive theirs.
    pub fn ty(&self, id: ExprId) -> ValType {
        match self.get(id) {
            Expression::Nop
            | Expression::SetLocal { .. }
            | Expression::SetGlobal { .. }
            | Expression::Store { .. }
            | Expression::Drop { .. } => ValType::None,
            Expression::Unreachable | Expression::Return { .. } | Expression::Switch { .. } => {
                ValType::Unreachable
            }
            Expression::Break { condition, .. } => {
                if condition.is_some() {
                    ValType::None
                } else {
                    ValType::Unreachable
                }
            }
            Expression::Const(lit) => lit.ty(),
            Expression::GetLocal { ty, .. }
            | Expression::GetGlobal { ty, .. }
            | Expression::Load { ty, .. }
            | Expression::Select { ty, .. }
            | Expression::Block { ty, .. }
            | Expression::If { ty, .. }
            | Expression::Loop { ty, .. }
            | Expression::Call { ty, .. }
            | Expression::CallImport { ty, .. }
            | Expression::CallIndirect { ty, .. } => *ty,
            Expression::Unary { op, .. } => op.result_type(),
            Expression::Binary { op, .. } => op.result_type(),
        }
    }

    // ── small builder helpers, used everywhere in translation ─────────

    pub fn const_(&mut self, lit: Literal) -> ExprId {
        self.alloc(Expression::Const(lit))
    }

    pub fn get_local(&mut self, index: u32, ty: ValType) -> ExprId {
        self.alloc(Expression::GetLocal { index, ty })
    }

    pub fn set_local(&mut self, index: u32, value: ExprId) -> ExprId {
        self.alloc(Expression::SetLocal { index, value })
    }

    pub fn unary(&mut self, op: UnaryOp, value: ExprId) -> ExprId {
        self.alloc(Expression::Unary { op, value })
    }

    pub fn binary(&mut self, op: BinaryOp, left: ExprId, right: ExprId) -> ExprId {
        self.alloc(Expression::Binary { op, left, right })
    }

    pub fn nop(&mut self) -> ExprId {
        self.alloc(Expression::Nop)
    }

    pub fn break_to(&mut self, name: &str) -> ExprId {
        self.alloc(Expression::Break {
            name: name.to_string(),
            condition: None,
        })
    }

    /// Wrap an expression in an unnamed block unless it already is one.
    pub fn blockify(&mut self, id: ExprId) -> ExprId {
        if matches!(self.get(id), Expression::Block { name: None, .. }) {
            return id;
        }
        let ty = self.ty(id);
        self.alloc(Expression::Block {
            name: None,
            list: vec![id],
            ty,
        })
    }

    /// Wrap in a block carrying `name`, appending `tail` if provided; if
    /// the expression is an unnamed block it is renamed in place.
    pub fn blockify_named(&mut self, id: ExprId, name: &str, tail: Option<ExprId>) -> ExprId {
        let reuse = matches!(self.get(id), Expression::Block { name: None, .. });
        let block = if reuse {
            if let Expression::Block { name: n, .. } = self.get_mut(id) {
                *n = Some(name.to_string());
            }
            id
        } else {
            let ty = self.ty(id);
            self.alloc(Expression::Block {
                name: Some(name.to_string()),
                list: vec![id],
                ty,
            })
        };
        if let Some(tail_id) = tail {
            if let Expression::Block { list, .. } = self.get_mut(block) {
                list.push(tail_id);
            }
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_stable_across_replace() {
        let mut arena = FuncArena::new();
        let a = arena.const_(Literal::I32(1));
        let b = arena.binary(BinaryOp::I32Add, a, a);
        arena.replace(a, Expression::Const(Literal::I32(2)));
        match arena.get(b) {
            Expression::Binary { left, .. } => {
                assert_eq!(arena.get(*left), &Expression::Const(Literal::I32(2)));
            }
            other => panic!("unexpected node: {:?}", other),
        }
    }

    #[test]
    fn derived_types() {
        let mut arena = FuncArena::new();
        let c = arena.const_(Literal::F64(1.5));
        assert_eq!(arena.ty(c), ValType::F64);

        let eqz = arena.unary(UnaryOp::I32Eqz, c);
        assert_eq!(arena.ty(eqz), ValType::I32);

        let set = arena.set_local(0, c);
        assert_eq!(arena.ty(set), ValType::None);

        let br = arena.break_to("out");
        assert_eq!(arena.ty(br), ValType::Unreachable);

        let cond = arena.const_(Literal::I32(1));
        let br_if = arena.alloc(Expression::Break {
            name: "out".into(),
            condition: Some(cond),
        });
        assert_eq!(arena.ty(br_if), ValType::None);
    }

    #[test]
    fn blockify_reuses_unnamed_blocks() {
        let mut arena = FuncArena::new();
        let c = arena.const_(Literal::I32(1));
        let block = arena.alloc(Expression::Block {
            name: None,
            list: vec![c],
            ty: ValType::I32,
        });
        assert_eq!(arena.blockify(block), block);

        let named = arena.blockify_named(block, "out", None);
        assert_eq!(named, block);
        assert!(
            matches!(arena.get(named), Expression::Block { name: Some(n), .. } if n == "out")
        );
    }
}
