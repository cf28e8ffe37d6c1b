//! Function-body translation: one recursive walk from asm.js AST to a
//! WASM expression tree.
//!
//! Types are inferred bottom-up from coercion shapes; an explicit stack
//! of ancestor nodes supplies the context-sensitive cases (`~~x`
//! signedness, import result types, statement-position global sets).
//! Control flow lowers to labeled blocks and loops with explicit
//! back-edges; `switch` becomes a `br_table` when the key range is
//! reasonable and an if-chain otherwise.

use anyhow::{bail, Result};
use rustc_hash::FxHashMap;

use crate::ast::{BinOp, Expr, FuncDef, Stmt, SwitchCase, UnOp};
use crate::ir::{
    sig_for, BinaryOp, Expression, ExprId, Function, Literal, Module, UnaryOp, ValType,
};

use super::context::{AsmType, Context, ImportSig};
use super::detect::{detect_type, is_unsigned_coercion, NameTypes};
use super::labels::NameMapper;
use super::names;
use super::traps;

impl NameTypes for FxHashMap<String, AsmType> {
    fn local_type(&self, name: &str) -> Option<AsmType> {
        self.get(name).copied()
    }
}

/// Ancestor-stack entry: the immediate parent of the node being
/// processed.
#[derive(Clone, Copy)]
enum Parent<'a> {
    /// Statement-list position; any produced value is discarded.
    Statement,
    /// Structural parent with no expression shape (loop condition,
    /// return value, switch selector).
    Construct,
    Expr(&'a Expr),
}

pub struct FunctionTranslator<'m, 'a> {
    ctx: &'m mut Context,
    module: &'m mut Module,
    debug_info: bool,
    func: Function,
    locals: FxHashMap<String, AsmType>,
    breaks: Vec<String>,
    continues: Vec<String>,
    parent_label: Option<String>,
    mapper: NameMapper,
    seen_return: bool,
    i32_temp: Option<u32>,
    switch_locals: u32,
    parents: Vec<Parent<'a>>,
}

/// Translate one `function` definition into a WASM function. The first
/// `params.len()` body statements are the parameter coercions; `var`
/// statements follow; the rest is code.
pub fn translate_function(
    ctx: &mut Context,
    module: &mut Module,
    def: &FuncDef,
    debug_info: bool,
) -> Result<Function> {
    if ctx.debug {
        log::debug!("translating function {}", def.name);
    }
    let translator = FunctionTranslator {
        ctx,
        module,
        debug_info,
        func: Function::new(def.name.clone()),
        locals: FxHashMap::default(),
        breaks: Vec::new(),
        continues: Vec::new(),
        parent_label: None,
        mapper: NameMapper::new(),
        seen_return: false,
        i32_temp: None,
        switch_locals: 0,
        parents: Vec::new(),
    };
    translator.run(def)
}

fn break_label(label: &str) -> String {
    format!("label$break${}", label)
}

fn continue_label(label: &str) -> String {
    format!("label$continue${}", label)
}

impl<'m, 'a> FunctionTranslator<'m, 'a> {
    fn run(mut self, def: &'a FuncDef) -> Result<Function> {
        // parameters: the leading `x = x | 0;` style coercions carry the
        // types
        for (i, param) in def.params.iter().enumerate() {
            let Some(Stmt::Expr(Expr::Assign(target, value))) = def.body.get(i) else {
                bail!("missing type coercion for parameter {}", param);
            };
            let Some(name) = target.as_name() else {
                bail!("bad parameter coercion target: {}", target);
            };
            let asm_ty = detect_type(self.ctx, value, &self.locals, false);
            if asm_ty == AsmType::None {
                bail!("cannot detect parameter type: {}", value);
            }
            self.func.add_param(name, asm_ty.to_wasm());
            self.locals.insert(name.to_string(), asm_ty);
        }

        // local declarations, typed by their initializer shapes
        let mut start = def.params.len();
        while let Some(Stmt::Var(decls)) = def.body.get(start) {
            for (name, init) in decls {
                let asm_ty = detect_type(self.ctx, init, &self.locals, true);
                if asm_ty == AsmType::None {
                    bail!("cannot detect local type: var {} = {}", name, init);
                }
                self.func.add_var(name.clone(), asm_ty.to_wasm());
                self.locals.insert(name.clone(), asm_ty);
            }
            start += 1;
        }

        let body = self.process_statements(&def.body, start)?;
        self.func.body = Some(body);

        // a trailing debug intrinsic after `return` would change the
        // body type; terminate the block so it stays unreachable
        if self.debug_info && self.func.result != ValType::None {
            if let Expression::Block { list, .. } = self.func.arena.get(body) {
                if let Some(&last) = list.last() {
                    if self.is_debug_info_call(last) {
                        let unreachable = self.func.arena.alloc(Expression::Unreachable);
                        if let Expression::Block { list, .. } = self.func.arena.get_mut(body) {
                            list.push(unreachable);
                        }
                    }
                }
            }
        }

        debug_assert!(self.breaks.is_empty() && self.continues.is_empty());
        if let Some(label) = self.parent_label {
            bail!("label `{}` attached to an unlabelable statement", label);
        }
        Ok(self.func)
    }

    fn is_debug_info_call(&self, id: ExprId) -> bool {
        matches!(
            self.func.arena.get(id),
            Expression::CallImport { target, .. } if target == names::EMSCRIPTEN_DEBUGINFO
        )
    }

    fn arena(&mut self) -> &mut crate::ir::FuncArena {
        &mut self.func.arena
    }

    fn parent(&self) -> Option<Parent<'a>> {
        let len = self.parents.len();
        if len >= 2 {
            Some(self.parents[len - 2])
        } else {
            None
        }
    }

    /// The WASM type the surrounding expression expects, if any; used
    /// for import calls and indirect-call signatures.
    fn parent_wasm_type(&self) -> ValType {
        match self.parent() {
            Some(Parent::Expr(p)) => detect_type(self.ctx, p, &self.locals, false).to_wasm(),
            _ => ValType::None,
        }
    }

    fn detect_asm_type(&self, e: &Expr) -> AsmType {
        detect_type(self.ctx, e, &self.locals, false)
    }

    /// Build a block from already-translated children with a
    /// provisional type (re-finalize firms types up later).
    fn make_block(&mut self, name: Option<String>, list: Vec<ExprId>) -> ExprId {
        let ty = match list.last() {
            Some(&last) => self.func.arena.ty(last),
            None => ValType::None,
        };
        self.func.arena.alloc(Expression::Block { name, list, ty })
    }

    fn make_if(&mut self, condition: ExprId, if_true: ExprId, if_false: Option<ExprId>) -> ExprId {
        let ty = match if_false {
            Some(other) => {
                let t = self.func.arena.ty(if_true);
                if t.is_concrete() && t == self.func.arena.ty(other) {
                    t
                } else {
                    ValType::None
                }
            }
            None => ValType::None,
        };
        self.func.arena.alloc(Expression::If {
            condition,
            if_true,
            if_false,
            ty,
        })
    }

    /// Conditions must be i32; wrap an i64 down (wasm-only mode).
    fn truncate_to_i32(&mut self, value: ExprId) -> ExprId {
        if self.func.arena.ty(value) == ValType::I64 {
            return self.func.arena.unary(UnaryOp::I32WrapI64, value);
        }
        value
    }

    fn ensure_i32_temp(&mut self) -> u32 {
        if let Some(index) = self.i32_temp {
            return index;
        }
        let index = self.func.add_var(names::I32_TEMP, ValType::I32);
        self.locals.insert(names::I32_TEMP.to_string(), AsmType::Int);
        self.i32_temp = Some(index);
        index
    }

    // ── statements ──────────────────────────────────────────────────────

    fn process_statements(&mut self, stmts: &'a [Stmt], from: usize) -> Result<ExprId> {
        let items = &stmts[from..];
        match items.len() {
            0 => Ok(self.arena().nop()),
            1 => self.process_stmt(&items[0]),
            _ => {
                let mut list = Vec::with_capacity(items.len());
                for stmt in items {
                    list.push(self.process_stmt(stmt)?);
                }
                Ok(self.make_block(None, list))
            }
        }
    }

    fn process_stmt(&mut self, stmt: &'a Stmt) -> Result<ExprId> {
        match stmt {
            Stmt::Empty => Ok(self.arena().nop()),
            Stmt::Expr(e) => {
                self.parents.push(Parent::Statement);
                let result = self.process_expr(e);
                self.parents.pop();
                result
            }
            Stmt::Block(stmts) => self.process_block(stmts),
            Stmt::If(cond, then, otherwise) => {
                self.parents.push(Parent::Construct);
                let condition = self.process_expr(cond)?;
                self.parents.pop();
                let condition = self.truncate_to_i32(condition);
                let if_true = self.process_stmt(then)?;
                let if_false = match otherwise {
                    Some(s) => Some(self.process_stmt(s)?),
                    None => None,
                };
                Ok(self.make_if(condition, if_true, if_false))
            }
            Stmt::While(cond, body) => self.process_while(cond, body),
            Stmt::DoWhile(body, cond) => self.process_do_while(body, cond),
            Stmt::For {
                init,
                cond,
                inc,
                body,
            } => self.process_for(init, cond, inc, body),
            Stmt::Label(label, inner) => {
                if self.parent_label.is_some() {
                    bail!("nested label without an intervening statement: {}", stmt);
                }
                self.parent_label = Some(label.clone());
                let result = self.process_stmt(inner)?;
                if self.parent_label.take().is_some() {
                    bail!("label `{}` attached to an unlabelable statement", label);
                }
                Ok(result)
            }
            Stmt::Break(label) => {
                let name = match label {
                    Some(l) => match self.mapper.to_unique(&break_label(l)) {
                        Some(unique) => unique.to_string(),
                        None => bail!("break to unknown label: {}", l),
                    },
                    None => match self.breaks.last() {
                        Some(name) => name.clone(),
                        None => bail!("break outside of a breakable construct"),
                    },
                };
                Ok(self.func.arena.alloc(Expression::Break {
                    name,
                    condition: None,
                }))
            }
            Stmt::Continue(label) => {
                let name = match label {
                    Some(l) => match self.mapper.to_unique(&continue_label(l)) {
                        Some(unique) => unique.to_string(),
                        None => bail!("continue to unknown label: {}", l),
                    },
                    None => match self.continues.last() {
                        Some(name) => name.clone(),
                        None => bail!("continue outside of a loop"),
                    },
                };
                Ok(self.func.arena.alloc(Expression::Break {
                    name,
                    condition: None,
                }))
            }
            Stmt::Return(value) => {
                let ty = match value {
                    Some(e) => self.detect_asm_type(e).to_wasm(),
                    None => ValType::None,
                };
                if self.seen_return {
                    if self.func.result != ty {
                        bail!(
                            "inconsistent return type in {}: {} vs {}",
                            self.func.name,
                            self.func.result,
                            ty
                        );
                    }
                } else {
                    self.seen_return = true;
                    self.func.result = ty;
                }
                let value = match value {
                    Some(e) => {
                        self.parents.push(Parent::Construct);
                        let id = self.process_expr(e)?;
                        self.parents.pop();
                        Some(id)
                    }
                    None => None,
                };
                Ok(self.func.arena.alloc(Expression::Return { value }))
            }
            Stmt::Switch(selector, cases) => self.process_switch(selector, cases),
            Stmt::Var(_) => bail!("var declaration after function prologue: {}", stmt),
        }
    }

    fn process_block(&mut self, stmts: &'a [Stmt]) -> Result<ExprId> {
        let label = self.parent_label.take().map(|l| {
            let source = break_label(&l);
            let name = self.mapper.push(&source);
            self.breaks.push(name.clone());
            (source, name)
        });
        let inner = self.process_statements(stmts, 0)?;
        if let Some((source, name)) = label {
            self.breaks.pop();
            self.mapper.pop(&source);
            return Ok(self.func.arena.blockify_named(inner, &name, None));
        }
        Ok(inner)
    }

    fn process_while(&mut self, cond: &'a Expr, body: &'a Stmt) -> Result<ExprId> {
        let forever = matches!(cond, Expr::Num(n) if *n == 1.0);
        let (out_src, in_src) = match self.parent_label.take() {
            Some(l) => (break_label(&l), continue_label(&l)),
            None => ("while-out".to_string(), "while-in".to_string()),
        };
        let out = self.mapper.push(&out_src);
        let in_ = self.mapper.push(&in_src);
        self.breaks.push(out.clone());
        self.continues.push(in_.clone());

        let loop_body = if forever {
            self.process_stmt(body)?
        } else {
            self.parents.push(Parent::Construct);
            let condition = self.process_expr(cond)?;
            self.parents.pop();
            let eqz = self.func.arena.unary(UnaryOp::I32Eqz, condition);
            let break_out = self.func.arena.break_to(&out);
            let check = self.make_if(eqz, break_out, None);
            let body_id = self.process_stmt(body)?;
            self.make_block(None, vec![check, body_id])
        };

        self.continues.pop();
        self.breaks.pop();
        self.mapper.pop(&in_src);
        self.mapper.pop(&out_src);

        // loops do not automatically repeat; add the back edge, with the
        // break target labeling a block around body + back edge
        let continuer = self.func.arena.break_to(&in_);
        let block = self.func.arena.blockify_named(loop_body, &out, Some(continuer));
        Ok(self.func.arena.alloc(Expression::Loop {
            name: in_,
            body: block,
            ty: ValType::None,
        }))
    }

    fn process_do_while(&mut self, body: &'a Stmt, cond: &'a Expr) -> Result<ExprId> {
        if matches!(cond, Expr::Num(n) if *n == 0.0) {
            // one-time loop; only needs to be a loop if something
            // continues to it
            let stop_src = match self.parent_label.take() {
                Some(l) => break_label(&l),
                None => "do-once".to_string(),
            };
            let stop = self.mapper.push(&stop_src);
            let more = self.mapper.push("unlikely-continue");
            self.breaks.push(stop.clone());
            self.continues.push(more.clone());
            let child = self.process_stmt(body)?;
            self.continues.pop();
            self.breaks.pop();
            self.mapper.pop("unlikely-continue");
            self.mapper.pop(&stop_src);

            if count_breaks_to(&self.func.arena, child, &more) == 0 {
                let mut list = vec![child];
                if self.func.arena.ty(child).is_concrete() {
                    // a nop keeps the block valueless
                    list.push(self.func.arena.nop());
                }
                return Ok(self.func.arena.alloc(Expression::Block {
                    name: Some(stop),
                    list,
                    ty: ValType::None,
                }));
            }
            let loop_ = self.func.arena.alloc(Expression::Loop {
                name: more,
                body: child,
                ty: ValType::None,
            });
            return Ok(self.func.arena.blockify_named(loop_, &stop, None));
        }

        // general do-while: loop body then a conditional back edge
        let (out_src, in_src) = match self.parent_label.take() {
            Some(l) => (break_label(&l), continue_label(&l)),
            None => ("do-out".to_string(), "do-in".to_string()),
        };
        let out = self.mapper.push(&out_src);
        let in_ = self.mapper.push(&in_src);
        self.breaks.push(out.clone());
        self.continues.push(in_.clone());
        let body_id = self.process_stmt(body)?;
        self.continues.pop();
        self.breaks.pop();
        self.mapper.pop(&in_src);
        self.mapper.pop(&out_src);

        self.parents.push(Parent::Construct);
        let condition = self.process_expr(cond)?;
        self.parents.pop();
        let continuer = self.func.arena.alloc(Expression::Break {
            name: in_.clone(),
            condition: Some(condition),
        });
        let block = self.func.arena.blockify_named(body_id, &out, Some(continuer));
        Ok(self.func.arena.alloc(Expression::Loop {
            name: in_,
            body: block,
            ty: ValType::None,
        }))
    }

    fn process_for(
        &mut self,
        init: &'a Option<Expr>,
        cond: &'a Option<Expr>,
        inc: &'a Option<Expr>,
        body: &'a Stmt,
    ) -> Result<ExprId> {
        let init_id = match init {
            Some(e) => {
                self.parents.push(Parent::Construct);
                let id = self.process_expr(e)?;
                self.parents.pop();
                id
            }
            None => self.arena().nop(),
        };

        let (out_src, in_src) = match self.parent_label.take() {
            Some(l) => (break_label(&l), continue_label(&l)),
            None => ("for-out".to_string(), "for-in".to_string()),
        };
        let out = self.mapper.push(&out_src);
        let in_ = self.mapper.push(&in_src);
        self.breaks.push(out.clone());
        self.continues.push(in_.clone());

        let check = match cond {
            Some(e) => {
                self.parents.push(Parent::Construct);
                let condition = self.process_expr(e)?;
                self.parents.pop();
                let eqz = self.func.arena.unary(UnaryOp::I32Eqz, condition);
                let break_out = self.func.arena.break_to(&out);
                self.make_if(eqz, break_out, None)
            }
            None => self.arena().nop(),
        };
        let body_id = self.process_stmt(body)?;
        let inc_id = match inc {
            Some(e) => {
                self.parents.push(Parent::Construct);
                let id = self.process_expr(e)?;
                self.parents.pop();
                id
            }
            None => self.arena().nop(),
        };

        self.continues.pop();
        self.breaks.pop();
        self.mapper.pop(&in_src);
        self.mapper.pop(&out_src);

        let loop_body = self.make_block(None, vec![check, body_id, inc_id]);
        let continuer = self.func.arena.break_to(&in_);
        let block = self.func.arena.blockify_named(loop_body, &out, Some(continuer));
        let loop_ = self.func.arena.alloc(Expression::Loop {
            name: in_,
            body: block,
            ty: ValType::None,
        });
        Ok(self.make_block(None, vec![init_id, loop_]))
    }

    // ── expressions ─────────────────────────────────────────────────────

    fn process_expr(&mut self, e: &'a Expr) -> Result<ExprId> {
        self.parents.push(Parent::Expr(e));
        let result = self.process_expr_inner(e);
        self.parents.pop();
        result
    }

    fn process_expr_inner(&mut self, e: &'a Expr) -> Result<ExprId> {
        match e {
            Expr::Num(n) => Ok(self.func.arena.const_(literal_for_num(*n))),
            Expr::Name(name) => self.process_name(e, name),
            Expr::Assign(target, value) => self.process_assign(e, target, value),
            Expr::Binary(op, left, right) => self.process_binary(e, *op, left, right),
            Expr::Unary(op, operand) => self.process_unary(e, *op, operand),
            Expr::Sub(base, index) => self.process_load(e, base, index),
            Expr::Conditional(cond, then, otherwise) => {
                let condition = self.process_expr(cond)?;
                let if_true = self.process_expr(then)?;
                let if_false = self.process_expr(otherwise)?;
                Ok(self.make_if(condition, if_true, Some(if_false)))
            }
            Expr::Seq(first, second) => self.process_seq(first, second),
            Expr::Call(callee, args) => self.process_call(e, callee, args),
            _ => bail!("confusing expression: {}", e),
        }
    }

    fn process_name(&mut self, e: &Expr, name: &str) -> Result<ExprId> {
        if let Some(&asm_ty) = self.locals.get(name) {
            let index = self.func.local_index(name).expect("local is registered");
            return Ok(self.func.arena.get_local(index, asm_ty.to_wasm()));
        }
        if name == names::DEBUGGER {
            traps::ensure_debugger_import(self.ctx, self.module);
            return Ok(self.func.arena.alloc(Expression::CallImport {
                target: names::DEBUGGER.to_string(),
                operands: vec![],
                ty: ValType::None,
            }));
        }
        let Some(global) = self.ctx.mapped_globals.get(name) else {
            bail!("confusing expression: {}", e);
        };
        Ok(self.func.arena.alloc(Expression::GetGlobal {
            name: name.to_string(),
            ty: global.ty,
        }))
    }

    fn process_assign(&mut self, e: &'a Expr, target: &'a Expr, value: &'a Expr) -> Result<ExprId> {
        if let Some(name) = target.as_name() {
            if self.locals.contains_key(name) {
                let index = self.func.local_index(name).expect("local is registered");
                let value_id = self.process_expr(value)?;
                return Ok(self.func.arena.set_local(index, value_id));
            }
            let Some(global) = self.ctx.mapped_globals.get(name) else {
                bail!("confusing expression: {}", e);
            };
            let global_ty = global.ty;
            let value_id = self.process_expr(value)?;
            let set = self.func.arena.alloc(Expression::SetGlobal {
                name: name.to_string(),
                value: value_id,
            });
            // set_global yields nothing; only materialize the value when
            // the surrounding expression actually uses it
            if matches!(self.parent(), Some(Parent::Statement) | None) {
                return Ok(set);
            }
            let get = self.func.arena.alloc(Expression::GetGlobal {
                name: name.to_string(),
                ty: global_ty,
            });
            return Ok(self.make_block(None, vec![set, get]));
        }

        // heap store
        let Expr::Sub(base, index) = target else {
            bail!("bad assignment target: {}", target);
        };
        let Some(heap) = base.as_name() else {
            bail!("bad assignment target: {}", target);
        };
        let Some(view) = self.ctx.views.get(heap).copied() else {
            bail!("store through unknown view: {}", e);
        };
        let ptr = self.process_unshifted(index, view.bytes)?;
        let mut value_id = self.process_expr(value)?;
        let value_ty = view.ty.to_wasm();
        let found_ty = self.func.arena.ty(value_id);
        if found_ty != value_ty {
            // implicit float coercions of asm.js stores are made explicit
            value_id = match (value_ty, found_ty) {
                (ValType::F32, ValType::F64) => {
                    self.func.arena.unary(UnaryOp::F32DemoteF64, value_id)
                }
                (ValType::F64, ValType::F32) => {
                    self.func.arena.unary(UnaryOp::F64PromoteF32, value_id)
                }
                _ => bail!("bad types in heap store: {}", e),
            };
        }
        Ok(self.func.arena.alloc(Expression::Store {
            bytes: view.bytes,
            offset: 0,
            align: view.bytes as u32,
            ptr,
            value: value_id,
            value_ty,
        }))
    }

    fn process_load(&mut self, e: &Expr, base: &'a Expr, index: &'a Expr) -> Result<ExprId> {
        let Some(heap) = base.as_name() else {
            bail!("confusing expression: {}", e);
        };
        let Some(view) = self.ctx.views.get(heap).copied() else {
            bail!("load through unknown view: {}", e);
        };
        let ptr = self.process_unshifted(index, view.bytes)?;
        Ok(self.func.arena.alloc(Expression::Load {
            bytes: view.bytes,
            signed: view.signed,
            offset: 0,
            align: view.bytes as u32,
            ptr,
            ty: view.wasm_type(),
        }))
    }

    /// Given `HEAP32[addr >> 2]` we want the absolute address with the
    /// shift peeled; constant indices are scaled at translation time.
    fn process_unshifted(&mut self, ptr: &'a Expr, bytes: u8) -> Result<ExprId> {
        let shifts = match bytes {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => bail!("bad heap access width: {}", bytes),
        };
        match ptr {
            Expr::Binary(BinOp::Shr, inner, amount)
                if matches!(amount.as_integer(), Some(n) if n == shifts) =>
            {
                self.process_expr(inner)
            }
            Expr::Binary(BinOp::Or, inner, zero) if bytes == 1 && zero.is_zero() => {
                self.process_expr(inner)
            }
            Expr::Num(n) if n.fract() == 0.0 => {
                let addr = (*n as i64 as u32) << shifts;
                Ok(self.func.arena.const_(Literal::I32(addr as i32)))
            }
            other => bail!("bad unshifted heap address: {}", other),
        }
    }

    fn process_binary(
        &mut self,
        e: &'a Expr,
        op: BinOp,
        left: &'a Expr,
        right: &'a Expr,
    ) -> Result<ExprId> {
        // peel the `(e)|0` and `(e)>>>0` coercions
        if matches!(op, BinOp::Or | BinOp::ShrU) && right.is_zero() {
            let inner = self.process_expr(left)?;
            fix_call_type(&mut self.func.arena, inner, ValType::I32);
            return Ok(inner);
        }

        let left_id = self.process_expr(left)?;
        let left_ty = self.func.arena.ty(left_id);

        // floating-point % has no WASM primitive
        if op == BinOp::Mod && left_ty.is_float() {
            let right_id = self.process_expr(right)?;
            traps::ensure_f64_rem_import(self.ctx, self.module);
            return Ok(self.func.arena.alloc(Expression::CallImport {
                target: names::F64_REM.to_string(),
                operands: vec![left_id, right_id],
                ty: ValType::F64,
            }));
        }

        let right_id = self.process_expr(right)?;
        let wasm_op = parse_asm_binary_op(op, left, right, left_ty)
            .ok_or_else(|| anyhow::anyhow!("bad wasm binary op: {}", e))?;
        if matches!(
            wasm_op,
            BinaryOp::I32DivS | BinaryOp::I32DivU | BinaryOp::I32RemS | BinaryOp::I32RemU
        ) {
            return Ok(traps::i32_binary(
                self.ctx,
                self.module,
                &mut self.func.arena,
                wasm_op,
                left_id,
                right_id,
            ));
        }
        Ok(self.func.arena.binary(wasm_op, left_id, right_id))
    }

    fn process_unary(&mut self, e: &'a Expr, op: UnOp, operand: &'a Expr) -> Result<ExprId> {
        match op {
            UnOp::Plus => {
                if let Some(lit) = check_literal(self.ctx, e, true) {
                    return Ok(self.func.arena.const_(lit));
                }
                let value = self.process_expr(operand)?;
                match self.func.arena.ty(value) {
                    ValType::I32 => {
                        let conv = if is_unsigned_coercion(operand) {
                            UnaryOp::F64ConvertI32U
                        } else {
                            UnaryOp::F64ConvertI32S
                        };
                        Ok(self.func.arena.unary(conv, value))
                    }
                    ValType::F32 => Ok(self.func.arena.unary(UnaryOp::F64PromoteF32, value)),
                    _ => {
                        fix_call_type(&mut self.func.arena, value, ValType::F64);
                        Ok(value)
                    }
                }
            }
            UnOp::Minus => {
                if matches!(operand, Expr::Num(_))
                    || matches!(operand, Expr::Unary(UnOp::Plus, inner) if matches!(inner.as_ref(), Expr::Num(_)))
                {
                    let Some(lit) = check_literal(self.ctx, e, true) else {
                        bail!("bad negated literal: {}", e);
                    };
                    return Ok(self.func.arena.const_(lit));
                }
                match self.detect_asm_type(operand) {
                    AsmType::Int => {
                        // wasm has no integer negation; use 0 - e
                        let zero = self.func.arena.const_(Literal::I32(0));
                        let value = self.process_expr(operand)?;
                        Ok(self.func.arena.binary(BinaryOp::I32Sub, zero, value))
                    }
                    AsmType::Double => {
                        let value = self.process_expr(operand)?;
                        Ok(self.func.arena.unary(UnaryOp::F64Neg, value))
                    }
                    AsmType::Float => {
                        let value = self.process_expr(operand)?;
                        Ok(self.func.arena.unary(UnaryOp::F32Neg, value))
                    }
                    _ => bail!("confusing expression: {}", e),
                }
            }
            UnOp::BitNot => {
                if let Expr::Unary(UnOp::BitNot, inner) = operand {
                    // `~~x`: float-to-int truncation; the parent decides
                    // signedness
                    let signed = !self.parent_is_unsigned_coercion();
                    let value = self.process_expr(inner)?;
                    return Ok(traps::float_to_int(
                        self.ctx,
                        self.module,
                        &mut self.func.arena,
                        signed,
                        value,
                    ));
                }
                let value = self.process_expr(operand)?;
                let neg_one = self.func.arena.const_(Literal::I32(-1));
                Ok(self.func.arena.binary(BinaryOp::I32Xor, value, neg_one))
            }
            UnOp::LogNot => {
                let value = self.process_expr(operand)?;
                Ok(self.func.arena.unary(UnaryOp::I32Eqz, value))
            }
        }
    }

    fn parent_is_unsigned_coercion(&self) -> bool {
        match self.parent() {
            Some(Parent::Expr(p)) => {
                matches!(p, Expr::Binary(..)) && is_unsigned_coercion(p)
            }
            _ => false,
        }
    }

    fn process_seq(&mut self, first: &'a Expr, second: &'a Expr) -> Result<ExprId> {
        if let Some(result) = self.match_bitcast_idiom(first, second)? {
            return Ok(result);
        }
        let a = self.process_expr(first)?;
        let b = self.process_expr(second)?;
        Ok(self.make_block(None, vec![a, b]))
    }

    /// The `tempDoublePtr` reinterpret idiom:
    /// `(HEAP32[tempDoublePtr >> 2] = i, +HEAPF32[tempDoublePtr >> 2])`
    /// and friends fold to a single bitcast.
    fn match_bitcast_idiom(&mut self, first: &'a Expr, second: &'a Expr) -> Result<Option<ExprId>> {
        let Expr::Assign(target, written) = first else {
            return Ok(None);
        };
        let Some(write_heap) = self.match_tdp_access(target) else {
            return Ok(None);
        };
        let Some(write_view) = self.ctx.views.get(&write_heap).copied() else {
            return Ok(None);
        };

        // what is read back, and through which coercion?
        let (read_ty, read_value): (AsmType, &Expr) = match second {
            Expr::Binary(BinOp::Or, value, zero) if zero.is_zero() => {
                (AsmType::Int, value.as_ref())
            }
            Expr::Unary(UnOp::Plus, value) => (AsmType::Double, value.as_ref()),
            Expr::Call(callee, args)
                if args.len() == 1
                    && callee
                        .as_name()
                        .is_some_and(|n| self.ctx.intrinsics.is(&self.ctx.intrinsics.fround, n)) =>
            {
                (AsmType::Float, &args[0])
            }
            _ => return Ok(None),
        };
        if self.match_tdp_access(read_value).is_none() {
            return Ok(None);
        }

        match (write_view.ty, read_ty) {
            (AsmType::Int, AsmType::Float | AsmType::Double) => {
                let value = self.process_expr(written)?;
                let conv = self.func.arena.unary(UnaryOp::F32ReinterpretI32, value);
                if read_ty == AsmType::Double {
                    return Ok(Some(self.func.arena.unary(UnaryOp::F64PromoteF32, conv)));
                }
                Ok(Some(conv))
            }
            (AsmType::Float, AsmType::Int) => {
                let mut value = self.process_expr(written)?;
                if self.func.arena.ty(value) == ValType::F64 {
                    // the write to HEAPF32 narrows implicitly
                    value = self.func.arena.unary(UnaryOp::F32DemoteF64, value);
                }
                Ok(Some(self.func.arena.unary(UnaryOp::I32ReinterpretF32, value)))
            }
            _ => Ok(None),
        }
    }

    /// Matches `HEAP?[tempDoublePtr >> 2]`, returning the view name.
    fn match_tdp_access(&self, e: &Expr) -> Option<String> {
        let Expr::Sub(base, index) = e else {
            return None;
        };
        let heap = base.as_name()?;
        let Expr::Binary(BinOp::Shr, ptr, amount) = index.as_ref() else {
            return None;
        };
        if amount.as_integer() != Some(2) {
            return None;
        }
        let name = ptr.as_name()?;
        let tdp = self.ctx.intrinsics.temp_double_ptr.as_deref()?;
        if name != tdp {
            return None;
        }
        Some(heap.to_string())
    }

    // The call handler and switch lowering live in their own impl block
    // below to keep this one navigable.
}

impl<'m, 'a> FunctionTranslator<'m, 'a> {
    fn process_call(&mut self, e: &'a Expr, callee: &'a Expr, args: &'a [Expr]) -> Result<ExprId> {
        let Some(name) = callee.as_name() else {
            return self.process_function_pointer_call(e, callee, args);
        };

        // intercepted math intrinsics lower to plain operations
        if self.ctx.intrinsics.is(&self.ctx.intrinsics.imul, name) {
            if args.len() != 2 {
                bail!("imul expects two operands: {}", e);
            }
            let left = self.process_expr(&args[0])?;
            let right = self.process_expr(&args[1])?;
            return Ok(self.func.arena.binary(BinaryOp::I32Mul, left, right));
        }
        if self.ctx.intrinsics.is(&self.ctx.intrinsics.clz32, name)
            || self.ctx.intrinsics.is(&self.ctx.intrinsics.llvm_cttz_i32, name)
        {
            if args.len() != 1 {
                bail!("bit-count intrinsic expects one operand: {}", e);
            }
            let op = if self.ctx.intrinsics.is(&self.ctx.intrinsics.clz32, name) {
                UnaryOp::I32Clz
            } else {
                UnaryOp::I32Ctz
            };
            let value = self.process_expr(&args[0])?;
            return Ok(self.func.arena.unary(op, value));
        }
        if self.ctx.intrinsics.is(&self.ctx.intrinsics.fround, name) {
            return self.process_fround(e, args);
        }
        if self.ctx.intrinsics.is(&self.ctx.intrinsics.abs, name) {
            return self.process_abs(e, args);
        }
        if self.ctx.intrinsics.is(&self.ctx.intrinsics.floor, name)
            || self.ctx.intrinsics.is(&self.ctx.intrinsics.ceil, name)
            || self.ctx.intrinsics.is(&self.ctx.intrinsics.sqrt, name)
        {
            let value = self.process_expr(&args[0])?;
            let is_floor = self.ctx.intrinsics.is(&self.ctx.intrinsics.floor, name);
            let is_ceil = self.ctx.intrinsics.is(&self.ctx.intrinsics.ceil, name);
            let op = match self.func.arena.ty(value) {
                ValType::F32 => {
                    if is_floor {
                        UnaryOp::F32Floor
                    } else if is_ceil {
                        UnaryOp::F32Ceil
                    } else {
                        UnaryOp::F32Sqrt
                    }
                }
                ValType::F64 => {
                    if is_floor {
                        UnaryOp::F64Floor
                    } else if is_ceil {
                        UnaryOp::F64Ceil
                    } else {
                        UnaryOp::F64Sqrt
                    }
                }
                other => bail!("bad operand type {} for {}", other, e),
            };
            return Ok(self.func.arena.unary(op, value));
        }
        if self.ctx.intrinsics.is(&self.ctx.intrinsics.max, name)
            || self.ctx.intrinsics.is(&self.ctx.intrinsics.min, name)
        {
            if args.len() != 2 {
                bail!("min/max expects two operands: {}", e);
            }
            let is_max = self.ctx.intrinsics.is(&self.ctx.intrinsics.max, name);
            let left = self.process_expr(&args[0])?;
            let right = self.process_expr(&args[1])?;
            let op = match self.func.arena.ty(left) {
                ValType::F32 => {
                    if is_max {
                        BinaryOp::F32Max
                    } else {
                        BinaryOp::F32Min
                    }
                }
                ValType::F64 => {
                    if is_max {
                        BinaryOp::F64Max
                    } else {
                        BinaryOp::F64Min
                    }
                }
                other => bail!("bad operand type {} for {}", other, e),
            };
            return Ok(self.func.arena.binary(op, left, right));
        }

        if self.ctx.wasm_only {
            if let Some(result) = self.process_wasm_only_call(e, name, args)? {
                return Ok(result);
            }
        }

        // ftCall_* and mftCall_* are function-table calls with the index
        // as first argument
        let table_call = name.starts_with(names::FTCALL) || name.starts_with(names::MFTCALL);

        if table_call {
            if args.is_empty() {
                bail!("table call without a target: {}", e);
            }
            let target = self.process_expr(&args[0])?;
            let mut operands = Vec::with_capacity(args.len() - 1);
            for arg in &args[1..] {
                operands.push(self.process_expr(arg)?);
            }
            let result = self.parent_wasm_type();
            let sig = self.operand_sig(result, &operands);
            return Ok(self.func.arena.alloc(Expression::CallIndirect {
                target,
                operands,
                sig,
                ty: result,
            }));
        }

        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            operands.push(self.process_expr(arg)?);
        }

        if self.module.get_import(name).is_some() {
            // result type comes from the surrounding coercion; it may be
            // incomplete here and is reconciled by the call finalizer
            let ty = self.parent_wasm_type();
            let params: Vec<ValType> = operands.iter().map(|&id| self.func.arena.ty(id)).collect();
            self.ctx
                .note_imported_call(name, ImportSig::new(params, ty));
            return Ok(self.func.arena.alloc(Expression::CallImport {
                target: name.to_string(),
                operands,
                ty,
            }));
        }

        Ok(self.func.arena.alloc(Expression::Call {
            target: name.to_string(),
            operands,
            ty: ValType::None,
        }))
    }

    /// `FUNCTION_TABLE_xx[(expr) & mask](args)`: a `call_indirect` whose
    /// target is `expr` plus a placeholder the finalizer replaces with
    /// the table's start offset.
    fn process_function_pointer_call(
        &mut self,
        e: &'a Expr,
        callee: &'a Expr,
        args: &'a [Expr],
    ) -> Result<ExprId> {
        let Expr::Sub(table, index) = callee else {
            bail!("confusing call target: {}", e);
        };
        let Some(table_name) = table.as_name() else {
            bail!("confusing call target: {}", e);
        };
        let Expr::Binary(BinOp::And, masked, mask) = index.as_ref() else {
            bail!("function pointer call without a mask: {}", e);
        };
        if mask.as_integer().is_none() {
            bail!("function pointer mask is not a constant: {}", e);
        }
        let target = self.process_expr(masked)?;
        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            operands.push(self.process_expr(arg)?);
        }
        let result = self.parent_wasm_type();
        let sig = self.operand_sig(result, &operands);
        // the table's offset in the merged table is not known yet; emit
        // target + callImport(tableName) and patch it in finalization
        let placeholder = self.func.arena.alloc(Expression::CallImport {
            target: table_name.to_string(),
            operands: vec![],
            ty: ValType::I32,
        });
        let offset_target = self.func.arena.binary(BinaryOp::I32Add, target, placeholder);
        Ok(self.func.arena.alloc(Expression::CallIndirect {
            target: offset_target,
            operands,
            sig,
            ty: result,
        }))
    }

    fn operand_sig(&self, result: ValType, operands: &[ExprId]) -> String {
        let params: Vec<ValType> = operands.iter().map(|&id| self.func.arena.ty(id)).collect();
        sig_for(result, &params)
    }

    fn process_fround(&mut self, e: &'a Expr, args: &'a [Expr]) -> Result<ExprId> {
        if args.len() != 1 {
            bail!("fround expects one operand: {}", e);
        }
        if let Some(lit) = check_literal(self.ctx, &args[0], false) {
            if lit.ty() == ValType::F64 {
                let Literal::F64(v) = lit else { unreachable!() };
                return Ok(self.func.arena.const_(Literal::F32(v as f32)));
            }
        }
        let value = self.process_expr(&args[0])?;
        match self.func.arena.ty(value) {
            ValType::F64 => Ok(self.func.arena.unary(UnaryOp::F32DemoteF64, value)),
            ValType::I32 => {
                let conv = if is_unsigned_coercion(&args[0]) {
                    UnaryOp::F32ConvertI32U
                } else {
                    UnaryOp::F32ConvertI32S
                };
                Ok(self.func.arena.unary(conv, value))
            }
            ValType::F32 => Ok(value),
            ValType::None => {
                // a call whose type we learn right here
                fix_call_type(&mut self.func.arena, value, ValType::F32);
                Ok(value)
            }
            _ => bail!("confusing fround target: {}", e),
        }
    }

    fn process_abs(&mut self, e: &'a Expr, args: &'a [Expr]) -> Result<ExprId> {
        if args.len() != 1 {
            bail!("abs expects one operand: {}", e);
        }
        let value = self.process_expr(&args[0])?;
        match self.func.arena.ty(value) {
            ValType::I32 => {
                // no integer abs in wasm; select on a cached value
                let temp = self.ensure_i32_temp();
                let set = self.func.arena.set_local(temp, value);
                let get_cond = self.func.arena.get_local(temp, ValType::I32);
                let zero = self.func.arena.const_(Literal::I32(0));
                let is_negative = self.func.arena.binary(BinaryOp::I32LtS, get_cond, zero);
                let zero = self.func.arena.const_(Literal::I32(0));
                let get_flip = self.func.arena.get_local(temp, ValType::I32);
                let flip = self.func.arena.binary(BinaryOp::I32Sub, zero, get_flip);
                let get_plain = self.func.arena.get_local(temp, ValType::I32);
                let select = self.func.arena.alloc(Expression::Select {
                    condition: is_negative,
                    if_true: flip,
                    if_false: get_plain,
                    ty: ValType::I32,
                });
                Ok(self.func.arena.alloc(Expression::Block {
                    name: None,
                    list: vec![set, select],
                    ty: ValType::I32,
                }))
            }
            ValType::F32 => Ok(self.func.arena.unary(UnaryOp::F32Abs, value)),
            ValType::F64 => Ok(self.func.arena.unary(UnaryOp::F64Abs, value)),
            other => bail!("bad operand type {} for {}", other, e),
        }
    }

    /// Sentinel intrinsics available in wasm-only builds; they map
    /// directly onto WASM operations and bypass the heap views.
    fn process_wasm_only_call(
        &mut self,
        e: &'a Expr,
        name: &str,
        args: &'a [Expr],
    ) -> Result<Option<ExprId>> {
        // load/store families carry an optional explicit alignment
        let explicit_align = |args: &[Expr], at: usize, natural: u32| -> u32 {
            match args.get(at).and_then(|a| a.as_integer()) {
                Some(0) | None => natural,
                Some(n) => n as u32,
            }
        };
        match name {
            "load1" | "load2" | "load4" | "load8" | "loadf" | "loadd" => {
                let (bytes, ty) = match name {
                    "load1" => (1, ValType::I32),
                    "load2" => (2, ValType::I32),
                    "load4" => (4, ValType::I32),
                    "load8" => (8, ValType::I64),
                    "loadf" => (4, ValType::F32),
                    _ => (8, ValType::F64),
                };
                let align = if bytes == 1 {
                    1
                } else {
                    explicit_align(args, 1, bytes as u32)
                };
                let ptr = self.process_expr(&args[0])?;
                return Ok(Some(self.func.arena.alloc(Expression::Load {
                    bytes,
                    signed: true,
                    offset: 0,
                    align,
                    ptr,
                    ty,
                })));
            }
            "store1" | "store2" | "store4" | "store8" | "storef" | "stored" => {
                let (bytes, ty) = match name {
                    "store1" => (1, ValType::I32),
                    "store2" => (2, ValType::I32),
                    "store4" => (4, ValType::I32),
                    "store8" => (8, ValType::I64),
                    "storef" => (4, ValType::F32),
                    _ => (8, ValType::F64),
                };
                let align = if bytes == 1 {
                    1
                } else {
                    explicit_align(args, 2, bytes as u32)
                };
                let ptr = self.process_expr(&args[0])?;
                let mut value = self.process_expr(&args[1])?;
                if name == "storef" && self.func.arena.ty(value) == ValType::F64 {
                    // asm.js allows storing a double to a float slot
                    value = self.func.arena.unary(UnaryOp::F32DemoteF64, value);
                }
                return Ok(Some(self.func.arena.alloc(Expression::Store {
                    bytes,
                    offset: 0,
                    align,
                    ptr,
                    value,
                    value_ty: ty,
                })));
            }
            "i64_const" => {
                let Some(lit) = check_literal(self.ctx, e, true) else {
                    bail!("bad i64 constant: {}", e);
                };
                return Ok(Some(self.func.arena.const_(lit)));
            }
            "i64" if args.len() == 1 => {
                // no-op coercion; i64(0) of an i32 constant is tolerated
                let value = self.process_expr(&args[0])?;
                if self.func.arena.ty(value) == ValType::I32 {
                    let Expression::Const(lit) = self.func.arena.get(value) else {
                        bail!("bad i64 coercion target: {}", e);
                    };
                    let wide = Literal::I64(lit.as_i32() as i64);
                    return Ok(Some(self.func.arena.const_(wide)));
                }
                fix_call_type(&mut self.func.arena, value, ValType::I64);
                return Ok(Some(value));
            }
            _ => {}
        }

        if args.len() == 1 {
            let unop = match name {
                "i32_cttz" => Some(UnaryOp::I32Ctz),
                "i32_ctpop" => Some(UnaryOp::I32Popcnt),
                "i32_bc2f" => Some(UnaryOp::F32ReinterpretI32),
                "i32_bc2i" => Some(UnaryOp::I32ReinterpretF32),
                "i64_trunc" => Some(UnaryOp::I32WrapI64),
                "i64_sext" => Some(UnaryOp::I64ExtendI32S),
                "i64_zext" => Some(UnaryOp::I64ExtendI32U),
                "i64_s2f" => Some(UnaryOp::F32ConvertI64S),
                "i64_s2d" => Some(UnaryOp::F64ConvertI64S),
                "i64_u2f" => Some(UnaryOp::F32ConvertI64U),
                "i64_u2d" => Some(UnaryOp::F64ConvertI64U),
                "i64_f2s" => Some(UnaryOp::I64TruncF32S),
                "i64_d2s" => Some(UnaryOp::I64TruncF64S),
                "i64_f2u" => Some(UnaryOp::I64TruncF32U),
                "i64_d2u" => Some(UnaryOp::I64TruncF64U),
                "i64_bc2d" => Some(UnaryOp::F64ReinterpretI64),
                "i64_bc2i" => Some(UnaryOp::I64ReinterpretF64),
                "i64_cttz" => Some(UnaryOp::I64Ctz),
                "i64_ctlz" => Some(UnaryOp::I64Clz),
                "i64_ctpop" => Some(UnaryOp::I64Popcnt),
                _ => None,
            };
            if let Some(op) = unop {
                let value = self.process_expr(&args[0])?;
                return Ok(Some(self.func.arena.unary(op, value)));
            }
        }

        if args.len() == 2 {
            let trapping = match name {
                "i64_udiv" => Some(BinaryOp::I64DivU),
                "i64_sdiv" => Some(BinaryOp::I64DivS),
                "i64_urem" => Some(BinaryOp::I64RemU),
                "i64_srem" => Some(BinaryOp::I64RemS),
                _ => None,
            };
            if let Some(op) = trapping {
                let left = self.process_expr(&args[0])?;
                let right = self.process_expr(&args[1])?;
                return Ok(Some(traps::i64_binary(
                    self.ctx,
                    self.module,
                    &mut self.func.arena,
                    op,
                    left,
                    right,
                )));
            }
            let binop = match name {
                "i64_add" => Some(BinaryOp::I64Add),
                "i64_sub" => Some(BinaryOp::I64Sub),
                "i64_mul" => Some(BinaryOp::I64Mul),
                "i64_and" => Some(BinaryOp::I64And),
                "i64_or" => Some(BinaryOp::I64Or),
                "i64_xor" => Some(BinaryOp::I64Xor),
                "i64_shl" => Some(BinaryOp::I64Shl),
                "i64_ashr" => Some(BinaryOp::I64ShrS),
                "i64_lshr" => Some(BinaryOp::I64ShrU),
                "i64_eq" => Some(BinaryOp::I64Eq),
                "i64_ne" => Some(BinaryOp::I64Ne),
                "i64_ule" => Some(BinaryOp::I64LeU),
                "i64_sle" => Some(BinaryOp::I64LeS),
                "i64_uge" => Some(BinaryOp::I64GeU),
                "i64_sge" => Some(BinaryOp::I64GeS),
                "i64_ult" => Some(BinaryOp::I64LtU),
                "i64_slt" => Some(BinaryOp::I64LtS),
                "i64_ugt" => Some(BinaryOp::I64GtU),
                "i64_sgt" => Some(BinaryOp::I64GtS),
                "f32_copysign" => Some(BinaryOp::F32Copysign),
                "f64_copysign" => Some(BinaryOp::F64Copysign),
                _ => None,
            };
            if let Some(op) = binop {
                let left = self.process_expr(&args[0])?;
                let right = self.process_expr(&args[1])?;
                return Ok(Some(self.func.arena.binary(op, left, right)));
            }
        }

        Ok(None)
    }

    fn process_switch(&mut self, selector: &'a Expr, cases: &'a [SwitchCase]) -> Result<ExprId> {
        let name_src = match self.parent_label.take() {
            Some(l) => break_label(&l),
            None => "switch".to_string(),
        };
        let name = self.mapper.push(&name_src);
        self.breaks.push(name.clone());

        self.parents.push(Parent::Construct);
        let condition = self.process_expr(selector)?;
        self.parents.pop();
        let cond_ty = self.func.arena.ty(condition);

        // key range; tested in floating point to avoid i64 overflow
        let mut seen = false;
        let (mut min, mut max) = (0i64, 0i64);
        for case in cases {
            if let Some(value) = &case.value {
                let index = self.case_value(value)?;
                if !seen {
                    seen = true;
                    min = index;
                    max = index;
                } else {
                    min = min.min(index);
                    max = max.max(index);
                }
            }
        }
        let range = max as f64 - min as f64;
        let can_switch = (0.0..10240.0).contains(&range);

        let result = if can_switch {
            self.switch_br_table(condition, cond_ty, cases, min, &name)?
        } else {
            self.switch_if_chain(condition, cond_ty, cases, &name)?
        };

        self.breaks.pop();
        self.mapper.pop(&name_src);
        Ok(result)
    }

    fn case_value(&self, value: &Expr) -> Result<i64> {
        let Some(lit) = check_literal(self.ctx, value, true) else {
            bail!("bad switch case value: {}", value);
        };
        Ok(match lit {
            Literal::I32(v) => v as i64,
            Literal::I64(v) => v,
            other => bail!("bad switch case value {:?}", other),
        })
    }

    fn case_literal(&self, value: &Expr, cond_ty: ValType) -> Result<Literal> {
        let v = self.case_value(value)?;
        Ok(if cond_ty == ValType::I64 {
            Literal::I64(v)
        } else {
            Literal::I32(v as i32)
        })
    }

    /// Dense keys: one `br_table` over the min-offset selector, cases
    /// nested lexically so fall-through works naturally.
    fn switch_br_table(
        &mut self,
        condition: ExprId,
        cond_ty: ValType,
        cases: &'a [SwitchCase],
        min: i64,
        exit: &str,
    ) -> Result<ExprId> {
        let offset_condition = if cond_ty == ValType::I64 {
            // offset in 64 bits, then narrow for the br_table
            let min_const = self.func.arena.const_(Literal::I64(min));
            let sub = self.func.arena.binary(BinaryOp::I64Sub, condition, min_const);
            self.func.arena.unary(UnaryOp::I32WrapI64, sub)
        } else {
            let min_const = self.func.arena.const_(Literal::I32(min as i32));
            self.func.arena.binary(BinaryOp::I32Sub, condition, min_const)
        };
        let br = self.func.arena.alloc(Expression::Switch {
            condition: offset_condition,
            targets: vec![],
            default: String::new(),
        });
        let mut top = self.make_block(None, vec![br]);
        let mut default_name: Option<String> = None;

        for case in cases {
            let body = self.process_statements(&case.body, 0)?;
            let (source, case_name) = match &case.value {
                None => {
                    let n = self.mapper.push("switch-default");
                    default_name = Some(n.clone());
                    ("switch-default", n)
                }
                Some(value) => {
                    let index = (self.case_value(value)? - min) as usize;
                    let n = self.mapper.push("switch-case");
                    if let Expression::Switch { targets, .. } = self.func.arena.get_mut(br) {
                        if targets.len() <= index {
                            targets.resize(index + 1, String::new());
                        }
                        targets[index] = n.clone();
                    }
                    ("switch-case", n)
                }
            };
            if let Expression::Block { name, .. } = self.func.arena.get_mut(top) {
                *name = Some(case_name);
            }
            top = self.make_block(None, vec![top, body]);
            self.mapper.pop(source);
        }

        // the outermost block is the switch exit
        if let Expression::Block { name, .. } = self.func.arena.get_mut(top) {
            *name = Some(exit.to_string());
        }
        let default_final = default_name.unwrap_or_else(|| exit.to_string());
        if let Expression::Switch {
            targets, default, ..
        } = self.func.arena.get_mut(br)
        {
            *default = default_final.clone();
            for target in targets.iter_mut() {
                if target.is_empty() {
                    *target = default_final.clone();
                }
            }
        }
        Ok(top)
    }

    /// Sparse keys: cache the selector in a local and branch through a
    /// chain of equality tests.
    fn switch_if_chain(
        &mut self,
        condition: ExprId,
        cond_ty: ValType,
        cases: &'a [SwitchCase],
        exit: &str,
    ) -> Result<ExprId> {
        let var = self
            .func
            .add_var(format!("switch${}", self.switch_locals), cond_ty);
        self.switch_locals += 1;
        let set = self.func.arena.set_local(var, condition);
        let mut top = self.make_block(None, vec![set]);
        let br_holder = top;
        let eq_op = if cond_ty == ValType::I64 {
            BinaryOp::I64Eq
        } else {
            BinaryOp::I32Eq
        };

        let mut chain: Option<ExprId> = None;
        let mut first: Option<ExprId> = None;
        let mut default_name: Option<String> = None;

        for case in cases {
            let body = self.process_statements(&case.body, 0)?;
            let (source, case_name) = match &case.value {
                None => {
                    let n = self.mapper.push("switch-default");
                    default_name = Some(n.clone());
                    ("switch-default", n)
                }
                Some(value) => {
                    let lit = self.case_literal(value, cond_ty)?;
                    let n = self.mapper.push("switch-case");
                    let get = self.func.arena.get_local(var, cond_ty);
                    let case_const = self.func.arena.const_(lit);
                    let compare = self.func.arena.binary(eq_op, get, case_const);
                    let branch = self.func.arena.alloc(Expression::Break {
                        name: n.clone(),
                        condition: None,
                    });
                    let iff = self.func.arena.alloc(Expression::If {
                        condition: compare,
                        if_true: branch,
                        if_false: chain,
                        ty: ValType::None,
                    });
                    chain = Some(iff);
                    if first.is_none() {
                        first = Some(iff);
                    }
                    ("switch-case", n)
                }
            };
            if let Expression::Block { name, .. } = self.func.arena.get_mut(top) {
                *name = Some(case_name);
            }
            top = self.make_block(None, vec![top, body]);
            self.mapper.pop(source);
        }

        if let Expression::Block { name, .. } = self.func.arena.get_mut(top) {
            *name = Some(exit.to_string());
        }
        let default_final = default_name.unwrap_or_else(|| exit.to_string());
        let (Some(first_id), Some(chain_root)) = (first, chain) else {
            bail!("if-chain switch with no concrete cases");
        };
        let default_branch = self.func.arena.alloc(Expression::Break {
            name: default_final,
            condition: None,
        });
        if let Expression::If { if_false, .. } = self.func.arena.get_mut(first_id) {
            *if_false = Some(default_branch);
        }
        if let Expression::Block { list, .. } = self.func.arena.get_mut(br_holder) {
            list.push(chain_root);
        }
        Ok(top)
    }
}

/// Pick the WASM binary op for an asm.js operator. `None` for operators
/// outside the subset (`&&`, `||`).
fn parse_asm_binary_op(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    left_ty: ValType,
) -> Option<BinaryOp> {
    let int = left_ty == ValType::I32;
    let f32 = left_ty == ValType::F32;
    let pick = |i, f, d| Some(if int { i } else if f32 { f } else { d });
    match op {
        BinOp::Add => pick(BinaryOp::I32Add, BinaryOp::F32Add, BinaryOp::F64Add),
        BinOp::Sub => pick(BinaryOp::I32Sub, BinaryOp::F32Sub, BinaryOp::F64Sub),
        BinOp::Mul => pick(BinaryOp::I32Mul, BinaryOp::F32Mul, BinaryOp::F64Mul),
        BinOp::And => Some(BinaryOp::I32And),
        BinOp::Or => Some(BinaryOp::I32Or),
        BinOp::Xor => Some(BinaryOp::I32Xor),
        BinOp::Shl => Some(BinaryOp::I32Shl),
        BinOp::Shr => Some(BinaryOp::I32ShrS),
        BinOp::ShrU => Some(BinaryOp::I32ShrU),
        BinOp::Eq => pick(BinaryOp::I32Eq, BinaryOp::F32Eq, BinaryOp::F64Eq),
        BinOp::Ne => pick(BinaryOp::I32Ne, BinaryOp::F32Ne, BinaryOp::F64Ne),
        _ => {
            // signedness matters from here on
            let unsigned = is_unsigned_coercion(left) || is_unsigned_coercion(right);
            match op {
                BinOp::Div => {
                    if int {
                        Some(if unsigned {
                            BinaryOp::I32DivU
                        } else {
                            BinaryOp::I32DivS
                        })
                    } else if f32 {
                        Some(BinaryOp::F32Div)
                    } else {
                        Some(BinaryOp::F64Div)
                    }
                }
                BinOp::Mod => {
                    if int {
                        Some(if unsigned {
                            BinaryOp::I32RemU
                        } else {
                            BinaryOp::I32RemS
                        })
                    } else {
                        // handled by the caller via the f64-rem import
                        None
                    }
                }
                BinOp::Lt => {
                    if int {
                        Some(if unsigned {
                            BinaryOp::I32LtU
                        } else {
                            BinaryOp::I32LtS
                        })
                    } else if f32 {
                        Some(BinaryOp::F32Lt)
                    } else {
                        Some(BinaryOp::F64Lt)
                    }
                }
                BinOp::Le => {
                    if int {
                        Some(if unsigned {
                            BinaryOp::I32LeU
                        } else {
                            BinaryOp::I32LeS
                        })
                    } else if f32 {
                        Some(BinaryOp::F32Le)
                    } else {
                        Some(BinaryOp::F64Le)
                    }
                }
                BinOp::Gt => {
                    if int {
                        Some(if unsigned {
                            BinaryOp::I32GtU
                        } else {
                            BinaryOp::I32GtS
                        })
                    } else if f32 {
                        Some(BinaryOp::F32Gt)
                    } else {
                        Some(BinaryOp::F64Gt)
                    }
                }
                BinOp::Ge => {
                    if int {
                        Some(if unsigned {
                            BinaryOp::I32GeU
                        } else {
                            BinaryOp::I32GeS
                        })
                    } else if f32 {
                        Some(BinaryOp::F32Ge)
                    } else {
                        Some(BinaryOp::F64Ge)
                    }
                }
                _ => None,
            }
        }
    }
}

/// Numeric literals become signed i32 if representable, else unsigned
/// i32 (stored as its bit pattern), else f64.
fn literal_for_num(n: f64) -> Literal {
    if n.fract() == 0.0 {
        if (i32::MIN as f64..=i32::MAX as f64).contains(&n) {
            return Literal::I32(n as i32);
        }
        if (0.0..=u32::MAX as f64).contains(&n) {
            return Literal::I32((n as u32) as i32);
        }
    }
    Literal::F64(n)
}

/// Recognize literal shapes: plain numbers, `+n`, `-n`, `+-n`, `-+n`,
/// and (wasm-only) `i64_const(lo, hi)`.
fn check_literal(ctx: &Context, e: &Expr, raw_is_integer: bool) -> Option<Literal> {
    match e {
        Expr::Num(n) => {
            if raw_is_integer {
                if n.fract() != 0.0 {
                    return None;
                }
                Some(Literal::I32(*n as i64 as i32))
            } else {
                Some(Literal::F64(*n))
            }
        }
        Expr::Unary(UnOp::Plus, inner) => match inner.as_ref() {
            Expr::Num(n) => Some(Literal::F64(*n)),
            Expr::Unary(UnOp::Minus, inner2) => match inner2.as_ref() {
                Expr::Num(n) => Some(Literal::F64(-n)),
                _ => None,
            },
            _ => None,
        },
        Expr::Unary(UnOp::Minus, inner) => match inner.as_ref() {
            Expr::Num(n) => {
                let neg = -n;
                if neg.fract() != 0.0 {
                    return None;
                }
                if (i32::MIN as f64..=i32::MAX as f64).contains(&neg) {
                    Some(Literal::I32(neg as i32))
                } else if (0.0..=u32::MAX as f64).contains(&neg) {
                    Some(Literal::I32((neg as u32) as i32))
                } else {
                    None
                }
            }
            Expr::Unary(UnOp::Plus, inner2) => match inner2.as_ref() {
                Expr::Num(n) => Some(Literal::F64(-n)),
                _ => None,
            },
            _ => None,
        },
        Expr::Call(callee, args) if ctx.wasm_only => {
            if callee.as_name() == Some("i64_const") && args.len() == 2 {
                let lo = args[0].as_integer()? as u64 & 0xffff_ffff;
                let hi = args[1].as_integer()? as u64 & 0xffff_ffff;
                Some(Literal::I64((lo | (hi << 32)) as i64))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Calls whose types are only fully known later get them fixed in place
/// when a coercion reveals the answer.
fn fix_call_type(arena: &mut crate::ir::FuncArena, id: ExprId, new_ty: ValType) {
    match arena.get_mut(id) {
        Expression::Call { ty, .. }
        | Expression::CallImport { ty, .. }
        | Expression::CallIndirect { ty, .. } => *ty = new_ty,
        _ => {}
    }
}

/// Count branches targeting `name` (the `do {} while(0)` optimization
/// needs to know whether anything continues).
fn count_breaks_to(arena: &crate::ir::FuncArena, root: ExprId, name: &str) -> usize {
    let mut count = 0;
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        match arena.get(id) {
            Expression::Break { name: n, condition } => {
                if n == name {
                    count += 1;
                }
                if let Some(c) = condition {
                    stack.push(*c);
                }
            }
            Expression::Switch {
                condition,
                targets,
                default,
            } => {
                if targets.iter().any(|t| t == name) || default == name {
                    count += 1;
                }
                stack.push(*condition);
            }
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
            Expression::Store { ptr, value, .. } => {
                stack.push(*ptr);
                stack.push(*value);
            }
            Expression::Load { ptr, .. } => stack.push(*ptr),
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
            Expression::Nop
            | Expression::Unreachable
            | Expression::Const(_)
            | Expression::GetLocal { .. }
            | Expression::GetGlobal { .. } => {}
        }
    }
    count
}

