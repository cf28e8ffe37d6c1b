//! Deferred call finalization (the second pass).
//!
//! Once every function is translated: direct calls take their callee's
//! result type, import calls are reconciled against the inferred
//! signatures (padding and f64 widening), the table-offset placeholders
//! of indirect calls become constants, and debug intrinsics fold onto
//! the preceding expression as source-location annotations.
//!
//! The pass is function-parallel: the lookup tables are frozen before
//! the fan-out and every worker owns its functions' arenas exclusively.

use std::sync::Mutex;

use anyhow::{bail, Result};
use rustc_hash::FxHashMap;

use crate::ir::{
    sig_parts, Expression, ExprId, FuncArena, Function, ImportKind, Literal, Module, UnaryOp,
    ValType,
};
use crate::passes::{auto_drop, refinalize, vacuum};

use super::context::Context;
use super::names;

/// Read-only state shared by the workers.
struct Lookups<'a> {
    func_results: FxHashMap<String, ValType>,
    import_sigs: FxHashMap<String, (Vec<ValType>, ValType)>,
    table_starts: &'a FxHashMap<String, u32>,
    file_count: usize,
}

pub fn run(
    module: &mut Module,
    ctx: &Context,
    debug_info: bool,
    run_optimization_passes: bool,
) -> Result<()> {
    let func_results: FxHashMap<String, ValType> = module
        .functions
        .iter()
        .map(|f| (f.name.clone(), f.result))
        .collect();
    let mut import_sigs = FxHashMap::default();
    for import in module.function_imports() {
        if let ImportKind::Function { sig: Some(sig) } = &import.kind {
            let (result, params) = sig_parts(sig);
            import_sigs.insert(import.name.clone(), (params, result));
        }
    }
    let lookups = Lookups {
        func_results,
        import_sigs,
        table_starts: &ctx.function_table_starts,
        file_count: module.debug_file_names.len(),
    };

    let mut funcs = std::mem::take(&mut module.functions);
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8);
    let chunk_size = funcs.len().div_ceil(threads).max(1);
    let errors: Mutex<Vec<anyhow::Error>> = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for chunk in funcs.chunks_mut(chunk_size) {
            let lookups = &lookups;
            let errors = &errors;
            scope.spawn(move || {
                for func in chunk {
                    if let Err(e) =
                        finalize_function(func, lookups, debug_info, run_optimization_passes)
                    {
                        errors.lock().expect("finalizer poisoned").push(e);
                    }
                }
            });
        }
    });
    module.functions = funcs;
    if let Some(e) = errors.into_inner().expect("finalizer poisoned").pop() {
        return Err(e);
    }
    Ok(())
}

fn finalize_function(
    func: &mut Function,
    lookups: &Lookups<'_>,
    debug_info: bool,
    run_optimization_passes: bool,
) -> Result<()> {
    let Some(body) = func.body else {
        return Ok(());
    };
    finalize_calls(&mut func.arena, body, lookups)?;
    // corrected call types percolate, then unused values get dropped
    refinalize::run(func);
    auto_drop::run(func);
    refinalize::run(func);
    if debug_info {
        apply_debug_info(func, lookups.file_count)?;
    }
    if debug_info || run_optimization_passes {
        vacuum::run(func);
        refinalize::run(func);
    }
    Ok(())
}

fn finalize_calls(arena: &mut FuncArena, id: ExprId, lookups: &Lookups<'_>) -> Result<()> {
    let mut children = Vec::new();
    arena.get(id).for_each_child(|c| children.push(c));
    for child in children {
        finalize_calls(arena, child, lookups)?;
    }

    match arena.get(id).clone() {
        Expression::Call { target, .. } => {
            let Some(&result) = lookups.func_results.get(&target) else {
                bail!("invalid call target: {}", target);
            };
            if let Expression::Call { ty, .. } = arena.get_mut(id) {
                *ty = result;
            }
        }
        Expression::CallImport {
            target,
            mut operands,
            ty,
        } => {
            // table-offset placeholders have no import entry; they are
            // rewritten by their enclosing call_indirect
            let Some((params, import_result)) = lookups.import_sigs.get(&target) else {
                return Ok(());
            };
            // asm.js tolerates ffi overloading; wasm does not. pad
            // missing arguments and widen mismatches to the f64 the
            // merged signature settled on.
            for (i, &param) in params.iter().enumerate() {
                if i >= operands.len() {
                    let zero_ty = if param.is_concrete() { param } else { ValType::I32 };
                    operands.push(arena.const_(Literal::zero(zero_ty)));
                    continue;
                }
                let found = arena.ty(operands[i]);
                if found != param && param == ValType::F64 {
                    operands[i] = match found {
                        ValType::I32 => arena.unary(UnaryOp::F64ConvertI32S, operands[i]),
                        ValType::F32 => arena.unary(UnaryOp::F64PromoteF32, operands[i]),
                        _ => operands[i],
                    };
                }
            }
            let import_result = *import_result;
            if let Expression::CallImport {
                operands: slot,
                ty: ty_slot,
                ..
            } = arena.get_mut(id)
            {
                *slot = operands;
                *ty_slot = import_result;
            }
            // the caller expected the pre-widening type; convert back
            if ty != import_result && import_result == ValType::F64 && ty.is_concrete() {
                let op = match ty {
                    ValType::I32 => UnaryOp::I32TruncF64S,
                    ValType::F32 => UnaryOp::F32DemoteF64,
                    other => bail!("cannot narrow import result to {}", other),
                };
                let call = arena.replace(id, Expression::Nop);
                let inner = arena.alloc(call);
                arena.replace(id, Expression::Unary { op, value: inner });
            }
        }
        Expression::CallIndirect { target, .. } => {
            // replace `target + callImport(tableName)` with the table's
            // concrete start offset
            let Expression::Binary { left, right, .. } = arena.get(target).clone() else {
                return Ok(());
            };
            for side in [right, left] {
                if let Expression::CallImport { target: name, .. } = arena.get(side) {
                    if let Some(&start) = lookups.table_starts.get(name.as_str()) {
                        arena.replace(side, Expression::Const(Literal::I32(start as i32)));
                        break;
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Fold `emscripten_debuginfo(file, line)` calls onto the previous
/// expression as annotations, then erase them.
fn apply_debug_info(func: &mut Function, file_count: usize) -> Result<()> {
    let Some(body) = func.body else {
        return Ok(());
    };
    let mut last: Option<ExprId> = None;
    walk_debug_info(func, body, &mut last, file_count)
}

fn walk_debug_info(
    func: &mut Function,
    id: ExprId,
    last: &mut Option<ExprId>,
    file_count: usize,
) -> Result<()> {
    let mut children = Vec::new();
    func.arena.get(id).for_each_child(|c| children.push(c));
    for child in children {
        walk_debug_info(func, child, last, file_count)?;
    }

    if let Expression::CallImport { target, operands, .. } = func.arena.get(id) {
        if target == names::EMSCRIPTEN_DEBUGINFO {
            let annotated = last.take();
            if let Some(annotated) = annotated {
                let file = debug_const(&func.arena, operands.first().copied())?;
                let line = debug_const(&func.arena, operands.get(1).copied())?;
                if (file as usize) >= file_count {
                    bail!("debug info references unknown file index {}", file);
                }
                func.debug_locations.insert(annotated, (file, line));
            }
            func.arena.replace(id, Expression::Nop);
            return Ok(());
        }
    }
    // consts may be operands of the intrinsic itself; they carry no
    // useful location anyway
    if !matches!(func.arena.get(id), Expression::Const(_)) {
        *last = Some(id);
    }
    Ok(())
}

fn debug_const(arena: &FuncArena, id: Option<ExprId>) -> Result<u32> {
    let Some(id) = id else {
        bail!("malformed debug intrinsic call");
    };
    match arena.get(id) {
        Expression::Const(Literal::I32(v)) => Ok(*v as u32),
        other => bail!("malformed debug intrinsic operand: {:?}", other),
    }
}
