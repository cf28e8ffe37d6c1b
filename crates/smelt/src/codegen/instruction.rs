//! Expression-tree to instruction-stream lowering.
//!
//! Walks one function's arena, emitting instructions into a
//! `wasm_encoder::Function`. Branch names resolve to relative depths
//! against a label stack (every `block`, `loop` and `if` contributes a
//! frame); blocks and ifs carry a result type exactly when their stored
//! type is concrete.

use std::borrow::Cow;

use anyhow::{bail, Result};
use wasm_encoder::{BlockType, Instruction, MemArg};

use crate::ir::{BinaryOp, Expression, ExprId, Function, Literal, UnaryOp, ValType};

use super::module::Layout;

pub struct InstrEmitter<'a> {
    pub func: &'a Function,
    pub layout: &'a Layout,
    pub out: &'a mut wasm_encoder::Function,
    pub labels: Vec<Option<String>>,
}

impl<'a> InstrEmitter<'a> {
    pub fn emit_body(&mut self) -> Result<()> {
        if let Some(body) = self.func.body {
            self.emit(body)?;
            // a value-returning function whose body ends in returns or
            // branches leaves nothing on the fallthrough path
            if self.func.result.is_concrete() && self.func.arena.ty(body) != self.func.result {
                self.out.instruction(&Instruction::Unreachable);
            }
        }
        self.out.instruction(&Instruction::End);
        Ok(())
    }

    fn block_type(&self, ty: ValType) -> BlockType {
        if ty.is_concrete() {
            BlockType::Result(super::module::val_type(ty))
        } else {
            BlockType::Empty
        }
    }

    fn branch_depth(&self, name: &str) -> Result<u32> {
        for (depth, label) in self.labels.iter().rev().enumerate() {
            if label.as_deref() == Some(name) {
                return Ok(depth as u32);
            }
        }
        bail!("branch to unknown label `{}`", name);
    }

    fn emit(&mut self, id: ExprId) -> Result<()> {
        // clone the node up front so recursion can re-borrow the arena
        match self.func.arena.get(id).clone() {
            Expression::Nop => {
                self.out.instruction(&Instruction::Nop);
            }
            Expression::Unreachable => {
                self.out.instruction(&Instruction::Unreachable);
            }
            Expression::Const(lit) => {
                let instr = match lit {
                    Literal::I32(v) => Instruction::I32Const(v),
                    Literal::I64(v) => Instruction::I64Const(v),
                    Literal::F32(v) => Instruction::F32Const(v.into()),
                    Literal::F64(v) => Instruction::F64Const(v.into()),
                };
                self.out.instruction(&instr);
            }
            Expression::GetLocal { index, .. } => {
                self.out.instruction(&Instruction::LocalGet(index));
            }
            Expression::SetLocal { index, value } => {
                self.emit(value)?;
                self.out.instruction(&Instruction::LocalSet(index));
            }
            Expression::GetGlobal { name, .. } => {
                let index = self.layout.global_index(&name)?;
                self.out.instruction(&Instruction::GlobalGet(index));
            }
            Expression::SetGlobal { name, value } => {
                self.emit(value)?;
                let index = self.layout.global_index(&name)?;
                self.out.instruction(&Instruction::GlobalSet(index));
            }
            Expression::Load {
                bytes,
                signed,
                offset,
                align,
                ptr,
                ty,
            } => {
                self.emit(ptr)?;
                let memarg = MemArg {
                    offset: offset as u64,
                    align: align_log2(align),
                    memory_index: 0,
                };
                let instr = match (ty, bytes, signed) {
                    (ValType::I32, 1, true) => Instruction::I32Load8S(memarg),
                    (ValType::I32, 1, false) => Instruction::I32Load8U(memarg),
                    (ValType::I32, 2, true) => Instruction::I32Load16S(memarg),
                    (ValType::I32, 2, false) => Instruction::I32Load16U(memarg),
                    (ValType::I32, 4, _) => Instruction::I32Load(memarg),
                    (ValType::I64, 8, _) => Instruction::I64Load(memarg),
                    (ValType::F32, 4, _) => Instruction::F32Load(memarg),
                    (ValType::F64, 8, _) => Instruction::F64Load(memarg),
                    _ => bail!("unencodable load: {} bytes as {}", bytes, ty),
                };
                self.out.instruction(&instr);
            }
            Expression::Store {
                bytes,
                offset,
                align,
                ptr,
                value,
                value_ty,
            } => {
                self.emit(ptr)?;
                self.emit(value)?;
                let memarg = MemArg {
                    offset: offset as u64,
                    align: align_log2(align),
                    memory_index: 0,
                };
                let instr = match (value_ty, bytes) {
                    (ValType::I32, 1) => Instruction::I32Store8(memarg),
                    (ValType::I32, 2) => Instruction::I32Store16(memarg),
                    (ValType::I32, 4) => Instruction::I32Store(memarg),
                    (ValType::I64, 8) => Instruction::I64Store(memarg),
                    (ValType::F32, 4) => Instruction::F32Store(memarg),
                    (ValType::F64, 8) => Instruction::F64Store(memarg),
                    _ => bail!("unencodable store: {} bytes as {}", bytes, value_ty),
                };
                self.out.instruction(&instr);
            }
            Expression::Unary { op, value } => {
                self.emit(value)?;
                self.out.instruction(&unary_instruction(op));
            }
            Expression::Binary { op, left, right } => {
                self.emit(left)?;
                self.emit(right)?;
                self.out.instruction(&binary_instruction(op));
            }
            Expression::Select {
                condition,
                if_true,
                if_false,
                ..
            } => {
                self.emit(if_true)?;
                self.emit(if_false)?;
                self.emit(condition)?;
                self.out.instruction(&Instruction::Select);
            }
            Expression::Drop { value } => {
                self.emit(value)?;
                self.out.instruction(&Instruction::Drop);
            }
            Expression::Block { name, list, ty } => {
                let block_type = self.block_type(ty);
                self.out.instruction(&Instruction::Block(block_type));
                self.labels.push(name);
                for child in list {
                    self.emit(child)?;
                }
                self.labels.pop();
                self.out.instruction(&Instruction::End);
            }
            Expression::If {
                condition,
                if_true,
                if_false,
                ty,
            } => {
                self.emit(condition)?;
                let block_type = self.block_type(ty);
                self.out.instruction(&Instruction::If(block_type));
                self.labels.push(None);
                self.emit(if_true)?;
                if let Some(other) = if_false {
                    self.out.instruction(&Instruction::Else);
                    self.emit(other)?;
                }
                self.labels.pop();
                self.out.instruction(&Instruction::End);
            }
            Expression::Loop { name, body, ty } => {
                let block_type = self.block_type(ty);
                self.out.instruction(&Instruction::Loop(block_type));
                self.labels.push(Some(name));
                self.emit(body)?;
                self.labels.pop();
                self.out.instruction(&Instruction::End);
            }
            Expression::Break { name, condition } => match condition {
                Some(c) => {
                    self.emit(c)?;
                    let depth = self.branch_depth(&name)?;
                    self.out.instruction(&Instruction::BrIf(depth));
                }
                None => {
                    let depth = self.branch_depth(&name)?;
                    self.out.instruction(&Instruction::Br(depth));
                }
            },
            Expression::Switch {
                condition,
                targets,
                default,
            } => {
                self.emit(condition)?;
                let depths: Vec<u32> = targets
                    .iter()
                    .map(|t| self.branch_depth(t))
                    .collect::<Result<_>>()?;
                let default_depth = self.branch_depth(&default)?;
                self.out
                    .instruction(&Instruction::BrTable(Cow::from(depths), default_depth));
            }
            Expression::Call { target, operands, .. }
            | Expression::CallImport { target, operands, .. } => {
                for op in operands {
                    self.emit(op)?;
                }
                let index = self.layout.function_index(&target)?;
                self.out.instruction(&Instruction::Call(index));
            }
            Expression::CallIndirect {
                target,
                operands,
                sig,
                ..
            } => {
                for op in operands {
                    self.emit(op)?;
                }
                self.emit(target)?;
                let type_index = self.layout.sig_index(&sig)?;
                self.out.instruction(&Instruction::CallIndirect {
                    type_index,
                    table_index: 0,
                });
            }
            Expression::Return { value } => {
                if let Some(v) = value {
                    self.emit(v)?;
                }
                self.out.instruction(&Instruction::Return);
            }
        }
        Ok(())
    }
}

fn align_log2(align: u32) -> u32 {
    match align {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        other => panic!("bad alignment: {}", other),
    }
}

fn unary_instruction<'a>(op: UnaryOp) -> Instruction<'a> {
    use UnaryOp::*;
    match op {
        I32Clz => Instruction::I32Clz,
        I32Ctz => Instruction::I32Ctz,
        I32Popcnt => Instruction::I32Popcnt,
        I32Eqz => Instruction::I32Eqz,
        I64Clz => Instruction::I64Clz,
        I64Ctz => Instruction::I64Ctz,
        I64Popcnt => Instruction::I64Popcnt,
        I64Eqz => Instruction::I64Eqz,
        F32Neg => Instruction::F32Neg,
        F32Abs => Instruction::F32Abs,
        F32Ceil => Instruction::F32Ceil,
        F32Floor => Instruction::F32Floor,
        F32Sqrt => Instruction::F32Sqrt,
        F64Neg => Instruction::F64Neg,
        F64Abs => Instruction::F64Abs,
        F64Ceil => Instruction::F64Ceil,
        F64Floor => Instruction::F64Floor,
        F64Sqrt => Instruction::F64Sqrt,
        I32WrapI64 => Instruction::I32WrapI64,
        I64ExtendI32S => Instruction::I64ExtendI32S,
        I64ExtendI32U => Instruction::I64ExtendI32U,
        I32TruncF32S => Instruction::I32TruncF32S,
        I32TruncF32U => Instruction::I32TruncF32U,
        I32TruncF64S => Instruction::I32TruncF64S,
        I32TruncF64U => Instruction::I32TruncF64U,
        I64TruncF32S => Instruction::I64TruncF32S,
        I64TruncF32U => Instruction::I64TruncF32U,
        I64TruncF64S => Instruction::I64TruncF64S,
        I64TruncF64U => Instruction::I64TruncF64U,
        F32ConvertI32S => Instruction::F32ConvertI32S,
        F32ConvertI32U => Instruction::F32ConvertI32U,
        F32ConvertI64S => Instruction::F32ConvertI64S,
        F32ConvertI64U => Instruction::F32ConvertI64U,
        F64ConvertI32S => Instruction::F64ConvertI32S,
        F64ConvertI32U => Instruction::F64ConvertI32U,
        F64ConvertI64S => Instruction::F64ConvertI64S,
        F64ConvertI64U => Instruction::F64ConvertI64U,
        F32DemoteF64 => Instruction::F32DemoteF64,
        F64PromoteF32 => Instruction::F64PromoteF32,
        I32ReinterpretF32 => Instruction::I32ReinterpretF32,
        I64ReinterpretF64 => Instruction::I64ReinterpretF64,
        F32ReinterpretI32 => Instruction::F32ReinterpretI32,
        F64ReinterpretI64 => Instruction::F64ReinterpretI64,
    }
}

fn binary_instruction<'a>(op: BinaryOp) -> Instruction<'a> {
    use BinaryOp::*;
    match op {
        I32Add => Instruction::I32Add,
        I32Sub => Instruction::I32Sub,
        I32Mul => Instruction::I32Mul,
        I32DivS => Instruction::I32DivS,
        I32DivU => Instruction::I32DivU,
        I32RemS => Instruction::I32RemS,
        I32RemU => Instruction::I32RemU,
        I32And => Instruction::I32And,
        I32Or => Instruction::I32Or,
        I32Xor => Instruction::I32Xor,
        I32Shl => Instruction::I32Shl,
        I32ShrS => Instruction::I32ShrS,
        I32ShrU => Instruction::I32ShrU,
        I32Eq => Instruction::I32Eq,
        I32Ne => Instruction::I32Ne,
        I32LtS => Instruction::I32LtS,
        I32LtU => Instruction::I32LtU,
        I32GtS => Instruction::I32GtS,
        I32GtU => Instruction::I32GtU,
        I32LeS => Instruction::I32LeS,
        I32LeU => Instruction::I32LeU,
        I32GeS => Instruction::I32GeS,
        I32GeU => Instruction::I32GeU,
        I64Add => Instruction::I64Add,
        I64Sub => Instruction::I64Sub,
        I64Mul => Instruction::I64Mul,
        I64DivS => Instruction::I64DivS,
        I64DivU => Instruction::I64DivU,
        I64RemS => Instruction::I64RemS,
        I64RemU => Instruction::I64RemU,
        I64And => Instruction::I64And,
        I64Or => Instruction::I64Or,
        I64Xor => Instruction::I64Xor,
        I64Shl => Instruction::I64Shl,
        I64ShrS => Instruction::I64ShrS,
        I64ShrU => Instruction::I64ShrU,
        I64Eq => Instruction::I64Eq,
        I64Ne => Instruction::I64Ne,
        I64LtS => Instruction::I64LtS,
        I64LtU => Instruction::I64LtU,
        I64GtS => Instruction::I64GtS,
        I64GtU => Instruction::I64GtU,
        I64LeS => Instruction::I64LeS,
        I64LeU => Instruction::I64LeU,
        I64GeS => Instruction::I64GeS,
        I64GeU => Instruction::I64GeU,
        F32Add => Instruction::F32Add,
        F32Sub => Instruction::F32Sub,
        F32Mul => Instruction::F32Mul,
        F32Div => Instruction::F32Div,
        F32Min => Instruction::F32Min,
        F32Max => Instruction::F32Max,
        F32Copysign => Instruction::F32Copysign,
        F32Eq => Instruction::F32Eq,
        F32Ne => Instruction::F32Ne,
        F32Lt => Instruction::F32Lt,
        F32Le => Instruction::F32Le,
        F32Gt => Instruction::F32Gt,
        F32Ge => Instruction::F32Ge,
        F64Add => Instruction::F64Add,
        F64Sub => Instruction::F64Sub,
        F64Mul => Instruction::F64Mul,
        F64Div => Instruction::F64Div,
        F64Min => Instruction::F64Min,
        F64Max => Instruction::F64Max,
        F64Copysign => Instruction::F64Copysign,
        F64Eq => Instruction::F64Eq,
        F64Ne => Instruction::F64Ne,
        F64Lt => Instruction::F64Lt,
        F64Le => Instruction::F64Le,
        F64Gt => Instruction::F64Gt,
        F64Ge => Instruction::F64Ge,
    }
}
