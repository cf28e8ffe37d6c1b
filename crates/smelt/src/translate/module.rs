//! First pass over the module body, and overall orchestration.
//!
//! Top-level `var` statements classify into globals, imports, heap
//! views and function tables; `function` definitions go through the
//! body translator (optionally via the incremental pass pool); the
//! trailing `return { ... }` becomes the export list. Afterwards the
//! inferred import signatures are written out, unused imports dropped,
//! the deferred call fixups run, and the fixed wiring is assembled.

use anyhow::{bail, Result};
use rustc_hash::FxHashMap;

use crate::ast::{self, BinOp, Expr, ModuleItem, UnOp};
use crate::ir::{
    sig_for, Export, ExportKind, Global, GlobalInit, Import, ImportKind, Literal, Module, ValType,
};
use crate::passes::FunctionPassPool;

use super::assembly;
use super::context::{AsmType, Context, MappedGlobal, TrapMode, View};
use super::finalize;
use super::function::translate_function;
use super::names;

/// Configuration for one translation run.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    pub trap_mode: TrapMode,
    pub debug_info: bool,
    pub run_optimization_passes: bool,
    pub wasm_only: bool,
    pub debug: bool,
}

/// Translate a parsed asm.js module into a WASM module.
pub fn build_module(
    ast: &ast::Module,
    options: &TranslateOptions,
    memory_growth: bool,
    debug_file_names: Vec<String>,
) -> Result<Module> {
    let mut ctx = Context::new(options.trap_mode, options.wasm_only, options.debug);
    let mut module = Module::default();
    // aliases like `var I8 = global.Int8Array` used by later `new I8(buffer)`
    let mut array_ctors: FxHashMap<String, String> = FxHashMap::default();
    let mut pool = options.run_optimization_passes.then(FunctionPassPool::new);

    for item in &ast.items {
        match item {
            ModuleItem::Var(decls) => {
                for (name, value) in decls {
                    classify_var(&mut ctx, &mut module, &mut array_ctors, name, value)?;
                }
            }
            ModuleItem::Func(def) => {
                let func = translate_function(&mut ctx, &mut module, def, options.debug_info)?;
                match pool.as_mut() {
                    Some(pool) => pool.submit(func),
                    None => module.add_function(func),
                }
            }
            ModuleItem::Exports(pairs) => {
                process_exports(&mut ctx, &mut module, pairs)?;
            }
        }
    }
    if let Some(pool) = pool {
        for func in pool.finish() {
            module.add_function(func);
        }
    }
    module.debug_file_names = debug_file_names;

    // write inferred signatures to the import table; a function import
    // that was never called has no signature and cannot stay (except in
    // the synthetic asm2wasm namespace)
    let mut to_erase = Vec::new();
    for import in module.imports.iter_mut() {
        let ImportKind::Function { sig } = &mut import.kind else {
            continue;
        };
        if let Some(inferred) = ctx.imported_function_types.get(&import.name) {
            if sig.is_none() {
                *sig = Some(sig_for(inferred.result, &inferred.params));
            }
        } else if import.module != names::ASM2WASM {
            to_erase.push(import.name.clone());
        }
    }
    for name in to_erase {
        log::debug!("removing unused import {}", name);
        module.remove_import(&name);
    }

    finalize::run(
        &mut module,
        &ctx,
        options.debug_info,
        options.run_optimization_passes,
    )?;
    if options.debug_info {
        module.remove_import(names::EMSCRIPTEN_DEBUGINFO);
    }
    assembly::run(&mut module, &ctx, memory_growth)?;
    Ok(module)
}

/// One top-level `var` binding; each recognized shape classifies it
/// (§4.2). Anything else is fatal.
fn classify_var(
    ctx: &mut Context,
    module: &mut Module,
    array_ctors: &mut FxHashMap<String, String>,
    name: &str,
    value: &Expr,
) -> Result<()> {
    match value {
        Expr::Num(n) => {
            if *n != 0.0 {
                bail!("invalid var element: {} = {}", name, value);
            }
            allocate_global(ctx, module, name, ValType::I32);
        }
        Expr::Binary(BinOp::Or, imported, zero) => {
            if !zero.is_zero() {
                bail!("invalid var element: {} = {}", name, value);
            }
            add_import_binding(ctx, module, name, imported, ValType::I32)?;
        }
        Expr::Unary(UnOp::Plus, inner) => match inner.as_ref() {
            Expr::Num(n) if *n == 0.0 => allocate_global(ctx, module, name, ValType::F64),
            Expr::Dot(..) => add_import_binding(ctx, module, name, inner, ValType::F64)?,
            _ => bail!("invalid var element: {} = {}", name, value),
        },
        Expr::Call(callee, args) => {
            // float global: `fround(0)`
            let is_fround = callee
                .as_name()
                .is_some_and(|n| ctx.intrinsics.is(&ctx.intrinsics.fround, n));
            if !is_fround || args.len() != 1 || !args[0].is_zero() {
                bail!("invalid var element: {} = {}", name, value);
            }
            allocate_global(ctx, module, name, ValType::F32);
        }
        Expr::Dot(obj, base) => {
            // may be a typed-array constructor alias; also imported
            if obj.as_name() == Some("global") && view_for_ctor(base).is_some() {
                array_ctors.insert(name.to_string(), base.clone());
            }
            add_import_binding(ctx, module, name, value, ValType::None)?;
        }
        Expr::New(inner) => {
            let Expr::Call(ctor, _buffer) = inner.as_ref() else {
                bail!("invalid view import: {} = {}", name, value);
            };
            let view = match ctor.as_ref() {
                Expr::Dot(_, heap) => view_for_ctor(heap)
                    .ok_or_else(|| anyhow::anyhow!("invalid view import: {}", heap))?,
                Expr::Name(alias) => {
                    let ctor_name = array_ctors
                        .get(alias)
                        .ok_or_else(|| anyhow::anyhow!("invalid short view import: {}", alias))?;
                    view_for_ctor(ctor_name).expect("alias points at a known constructor")
                }
                other => bail!("invalid view import: {}", other),
            };
            if ctx.views.insert(name.to_string(), view).is_some() {
                bail!("duplicate heap view: {}", name);
            }
        }
        Expr::Array(items) => {
            // function tables merge into the one wasm table; each gets a
            // contiguous range starting here
            let start = module.table.names.len() as u32;
            ctx.function_table_starts.insert(name.to_string(), start);
            for item in items {
                let Some(func) = item.as_name() else {
                    bail!("bad function table entry: {}", item);
                };
                module.table.names.push(func.to_string());
            }
            module.table.initial = module.table.names.len() as u32;
            module.table.max = module.table.initial;
        }
        _ => bail!("invalid var element: {} = {}", name, value),
    }
    Ok(())
}

fn allocate_global(ctx: &mut Context, module: &mut Module, name: &str, ty: ValType) {
    ctx.mapped_globals.insert(
        name.to_string(),
        MappedGlobal {
            ty,
            imported: false,
        },
    );
    module.add_global(Global {
        name: name.to_string(),
        ty,
        mutable: true,
        init: GlobalInit::Const(Literal::zero(ty)),
    });
}

/// Register a `module.base` binding. `Math.*` and a couple of `env`
/// names are intercepted into intrinsic slots instead of becoming
/// imports; mutable imported globals get the dual-global lowering.
fn add_import_binding(
    ctx: &mut Context,
    module: &mut Module,
    name: &str,
    imported: &Expr,
    mut ty: ValType,
) -> Result<()> {
    let Expr::Dot(obj, base) = imported else {
        bail!("invalid import: {} = {}", name, imported);
    };

    let module_name = match obj.as_ref() {
        Expr::Dot(inner, mid) => {
            let Some(inner_name) = inner.as_name() else {
                bail!("invalid import: {} = {}", name, imported);
            };
            if mid == "Math" {
                let slot = match base.as_str() {
                    "imul" => Some(&mut ctx.intrinsics.imul),
                    "clz32" => Some(&mut ctx.intrinsics.clz32),
                    "fround" => Some(&mut ctx.intrinsics.fround),
                    "abs" => Some(&mut ctx.intrinsics.abs),
                    "floor" => Some(&mut ctx.intrinsics.floor),
                    "ceil" => Some(&mut ctx.intrinsics.ceil),
                    "sqrt" => Some(&mut ctx.intrinsics.sqrt),
                    "max" => Some(&mut ctx.intrinsics.max),
                    "min" => Some(&mut ctx.intrinsics.min),
                    _ => None,
                };
                if let Some(slot) = slot {
                    if slot.is_some() {
                        bail!("Math.{} imported twice", base);
                    }
                    *slot = Some(name.to_string());
                    return Ok(());
                }
            }
            format!("{}.{}", inner_name, mid)
        }
        Expr::Name(m) => {
            if m == "env" {
                if base == "tempDoublePtr" {
                    if ctx.intrinsics.temp_double_ptr.is_some() {
                        bail!("tempDoublePtr imported twice");
                    }
                    // stays imported as well; only some uses optimize out
                    ctx.intrinsics.temp_double_ptr = Some(name.to_string());
                } else if base == "llvm_cttz_i32" {
                    if ctx.intrinsics.llvm_cttz_i32.is_some() {
                        bail!("llvm_cttz_i32 imported twice");
                    }
                    ctx.intrinsics.llvm_cttz_i32 = Some(name.to_string());
                    return Ok(());
                }
            }
            m.clone()
        }
        other => bail!("invalid import: {} = {}", name, other),
    };

    // NaN and Infinity are doubles no matter the declared coercion
    if module_name == "global" && (base == "NaN" || base == "Infinity") {
        ty = ValType::F64;
    }

    if ty != ValType::None {
        // a global import. asm.js mutates imported values (stack
        // pointer, etc.) but wasm imports are immutable; import an
        // immutable value and shadow it with a mutable global, except
        // for the segment-offset globals which must stay constant
        ctx.mapped_globals.insert(
            name.to_string(),
            MappedGlobal { ty, imported: true },
        );
        let mut import_name = name.to_string();
        if name != names::TABLE_BASE && name != names::MEMORY_BASE {
            import_name = format!("{}$asm2wasm$import", name);
            module.add_global(Global {
                name: name.to_string(),
                ty,
                mutable: true,
                init: GlobalInit::GetGlobal(import_name.clone()),
            });
        }
        module.add_import(Import {
            name: import_name,
            module: module_name,
            base: base.clone(),
            kind: ImportKind::Global { ty },
        });
    } else {
        module.add_import(Import {
            name: name.to_string(),
            module: module_name,
            base: base.clone(),
            kind: ImportKind::Function { sig: None },
        });
    }
    Ok(())
}

fn view_for_ctor(base: &str) -> Option<View> {
    Some(match base {
        "Int8Array" => View::new(1, true, true, AsmType::Int),
        "Int16Array" => View::new(2, true, true, AsmType::Int),
        "Int32Array" => View::new(4, true, true, AsmType::Int),
        "Uint8Array" => View::new(1, true, false, AsmType::Int),
        "Uint16Array" => View::new(2, true, false, AsmType::Int),
        "Uint32Array" => View::new(4, true, false, AsmType::Int),
        "Float32Array" => View::new(4, false, true, AsmType::Float),
        "Float64Array" => View::new(8, false, true, AsmType::Double),
        _ => return None,
    })
}

/// The trailing `return { ... }`. Identifier values export functions,
/// numeric values export freshly-made immutable globals; duplicate keys
/// resolve to the last binding, as asm.js does.
fn process_exports(ctx: &mut Context, module: &mut Module, pairs: &[(String, Expr)]) -> Result<()> {
    let mut exported: FxHashMap<String, usize> = FxHashMap::default();
    for (key, value) in pairs {
        match value {
            Expr::Name(target) => {
                if key == names::EMSCRIPTEN_REPLACE_MEMORY {
                    // asm.js memory growth provides this non-asm helper;
                    // grow_memory replaces it
                    continue;
                }
                if key == names::UDIVMODDI4 {
                    ctx.udivmoddi4 = Some(target.clone());
                } else if key == names::GET_TEMP_RET0 {
                    ctx.get_temp_ret0 = Some(target.clone());
                }
                if let Some(&index) = exported.get(key) {
                    module.exports[index].value = target.clone();
                } else {
                    exported.insert(key.clone(), module.exports.len());
                    module.add_export(Export {
                        name: key.clone(),
                        value: target.clone(),
                        kind: ExportKind::Function,
                    });
                }
            }
            Expr::Num(_) => {
                let Some(number) = value.as_integer() else {
                    bail!("bad numeric export: {} = {}", key, value);
                };
                if exported.contains_key(key) {
                    bail!("duplicate numeric export: {}", key);
                }
                module.add_global(Global {
                    name: key.clone(),
                    ty: ValType::I32,
                    mutable: false,
                    init: GlobalInit::Const(Literal::I32(number as i32)),
                });
                exported.insert(key.clone(), module.exports.len());
                module.add_export(Export {
                    name: key.clone(),
                    value: key.clone(),
                    kind: ExportKind::Global,
                });
            }
            other => bail!("bad export value: {} = {}", key, other),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Expression;
    use crate::parser::parse_module;

    fn build(src: &str) -> Module {
        let ast = parse_module(src).expect("parse failed");
        build_module(&ast, &TranslateOptions::default(), false, Vec::new()).expect("build failed")
    }

    const PRELUDE: &str = "var HEAP8 = new global.Int8Array(buffer); \
         var HEAP32 = new global.Int32Array(buffer); \
         var HEAPF32 = new global.Float32Array(buffer); \
         var HEAPF64 = new global.Float64Array(buffer); \
         var Math_imul = global.Math.imul; \
         var Math_fround = global.Math.fround; ";

    fn module_src(body: &str) -> String {
        format!(
            "function asmModule(global, env, buffer) {{ \"use asm\"; {} {} }}",
            PRELUDE, body
        )
    }

    #[test]
    fn simple_add_function() {
        let m = build(&module_src(
            "function add(x, y) { x = x | 0; y = y | 0; return (x + y) | 0; } \
             return { add: add };",
        ));
        let f = m.get_function("add").unwrap();
        assert_eq!(f.params, vec![ValType::I32, ValType::I32]);
        assert_eq!(f.result, ValType::I32);
        let Expression::Return { value: Some(v) } = f.arena.get(f.body.unwrap()) else {
            panic!("expected return body, got {:?}", f.arena.get(f.body.unwrap()));
        };
        assert!(matches!(
            f.arena.get(*v),
            Expression::Binary {
                op: crate::ir::BinaryOp::I32Add,
                ..
            }
        ));
        assert_eq!(m.exports.len(), 1);
        assert_eq!(m.exports[0].name, "add");
    }

    #[test]
    fn heap_store_shape() {
        let m = build(&module_src(
            "function f(p, v) { p = p | 0; v = v | 0; HEAP32[(p + 4 | 0) >> 2] = v | 0; } \
             return { f: f };",
        ));
        let f = m.get_function("f").unwrap();
        let Expression::Store {
            bytes,
            offset,
            align,
            ptr,
            ..
        } = f.arena.get(f.body.unwrap())
        else {
            panic!("expected store body");
        };
        assert_eq!((*bytes, *offset, *align), (4, 0, 4));
        // the >> 2 was peeled; the pointer is p + 4
        assert!(matches!(
            f.arena.get(*ptr),
            Expression::Binary {
                op: crate::ir::BinaryOp::I32Add,
                ..
            }
        ));
    }

    #[test]
    fn globals_and_dual_global_imports() {
        let m = build(&module_src(
            "var counter = 0; var rate = +0; \
             var STACKTOP = env.STACKTOP | 0; \
             var tableBase = env.tableBase | 0; \
             function f() { counter = (counter + 1) | 0; } \
             return { f: f };",
        ));
        assert!(m.get_global("counter").is_some());
        assert!(m.get_global("rate").is_some());
        // STACKTOP is mutable: immutable import + mutable shadow global
        let shadow = m.get_global("STACKTOP").unwrap();
        assert!(shadow.mutable);
        assert_eq!(
            shadow.init,
            GlobalInit::GetGlobal("STACKTOP$asm2wasm$import".to_string())
        );
        assert!(m.get_import("STACKTOP$asm2wasm$import").is_some());
        // tableBase stays a plain immutable import
        assert!(m.get_import("tableBase").is_some());
        assert!(m.get_global("tableBase").is_none());
    }

    #[test]
    fn unused_function_import_is_removed() {
        let m = build(&module_src(
            "var used = env.used; var unused = env.unused; \
             function f(x) { x = x | 0; used(x | 0); } \
             return { f: f };",
        ));
        assert!(m.get_import("used").is_some());
        assert!(m.get_import("unused").is_none());
    }

    #[test]
    fn import_signature_inference_writes_sigs() {
        let m = build(&module_src(
            "var ext = env.ext; \
             function f(x) { x = x | 0; return ext(x | 0) | 0; } \
             function g(d) { d = +d; ext(d); } \
             return { f: f, g: g };",
        ));
        let import = m.get_import("ext").unwrap();
        // overloaded (i32 vs f64) widens to f64; result stays i32
        assert_eq!(
            import.kind,
            ImportKind::Function {
                sig: Some("id".to_string())
            }
        );
    }

    #[test]
    fn function_tables_merge_with_stable_offsets() {
        let m = build(&module_src(
            "var FUNCTION_TABLE_ii = [a, b]; var FUNCTION_TABLE_dd = [c, c, c, c]; \
             function a(x) { x = x | 0; return x | 0; } \
             function b(x) { x = x | 0; return (x + 1) | 0; } \
             function c(x) { x = +x; return +(x * 2.0); } \
             return { a: a };",
        ));
        assert_eq!(m.table.names, vec!["a", "b", "c", "c", "c", "c"]);
        assert_eq!(m.table.initial, 6);
        assert_eq!(m.table.max, 6);
    }

    #[test]
    fn numeric_exports_become_globals() {
        let m = build(&module_src(
            "function f() {} return { f: f, f: f, answer: 42 };",
        ));
        // duplicate function export keys collapse to the last binding
        assert_eq!(
            m.exports
                .iter()
                .filter(|e| e.kind == ExportKind::Function)
                .count(),
            1
        );
        let answer = m.get_global("answer").unwrap();
        assert!(!answer.mutable);
        assert_eq!(answer.init, GlobalInit::Const(Literal::I32(42)));
        assert!(m
            .exports
            .iter()
            .any(|e| e.name == "answer" && e.kind == ExportKind::Global));
    }

    #[test]
    fn trap_mode_clamp_routes_division_through_a_shim() {
        let ast = parse_module(&module_src(
            "function f(x) { x = x | 0; return ((x | 0) / 0) | 0; } return { f: f };",
        ))
        .unwrap();
        let options = TranslateOptions {
            trap_mode: TrapMode::Clamp,
            ..Default::default()
        };
        let m = build_module(&ast, &options, false, Vec::new()).unwrap();
        assert!(m.get_function("i32s-div").is_some());
        let f = m.get_function("f").unwrap();
        let Expression::Return { value: Some(v) } = f.arena.get(f.body.unwrap()) else {
            panic!("expected return");
        };
        assert!(matches!(
            f.arena.get(*v),
            Expression::Call { target, .. } if target == "i32s-div"
        ));
    }

    #[test]
    fn float_remainder_registers_the_ffi() {
        let m = build(&module_src(
            "function f(a, b) { a = +a; b = +b; return +(a % b); } return { f: f };",
        ));
        let import = m.get_import("f64-rem").unwrap();
        assert_eq!(import.module, "asm2wasm");
        assert_eq!(
            import.kind,
            ImportKind::Function {
                sig: Some("ddd".to_string())
            }
        );
    }

    #[test]
    fn indirect_call_gets_concrete_table_offset() {
        let m = build(&module_src(
            "var FUNCTION_TABLE_x = [z, z]; var FUNCTION_TABLE_ii = [a, a, a, a, a, a, a, a]; \
             function z() {} \
             function a(x) { x = x | 0; return x | 0; } \
             function f(i, x) { i = i | 0; x = x | 0; \
               return FUNCTION_TABLE_ii[(i + 3 | 0) & 7](x | 0) | 0; } \
             return { f: f };",
        ));
        let f = m.get_function("f").unwrap();
        let Expression::Return { value: Some(v) } = f.arena.get(f.body.unwrap()) else {
            panic!("expected return");
        };
        let Expression::CallIndirect { target, sig, .. } = f.arena.get(*v) else {
            panic!("expected call_indirect, got {:?}", f.arena.get(*v));
        };
        assert_eq!(sig, "ii");
        // target + const(start of FUNCTION_TABLE_ii = 2), mask stripped
        let Expression::Binary { op, left, right } = f.arena.get(*target) else {
            panic!("expected offset add");
        };
        assert_eq!(*op, crate::ir::BinaryOp::I32Add);
        assert_eq!(
            f.arena.get(*right),
            &Expression::Const(Literal::I32(2))
        );
        assert!(matches!(
            f.arena.get(*left),
            Expression::Binary {
                op: crate::ir::BinaryOp::I32Add,
                ..
            }
        ));
    }

    #[test]
    fn switch_lowers_to_br_table() {
        let m = build(&module_src(
            "var x0 = env.x0; var x1 = env.x1; var xd = env.xd; \
             function f(x) { x = x | 0; \
               switch (x | 0) { \
                 case 0: x0(); break; \
                 case 1: x1(); break; \
                 default: xd(); \
               } } \
             return { f: f };",
        ));
        let f = m.get_function("f").unwrap();
        let mut found = None;
        fn find_switch(
            arena: &crate::ir::FuncArena,
            id: crate::ir::ExprId,
            found: &mut Option<(Vec<String>, String)>,
        ) {
            if let Expression::Switch {
                targets, default, ..
            } = arena.get(id)
            {
                *found = Some((targets.clone(), default.clone()));
            }
            let mut children = Vec::new();
            arena.get(id).for_each_child(|c| children.push(c));
            for c in children {
                find_switch(arena, c, found);
            }
        }
        find_switch(&f.arena, f.body.unwrap(), &mut found);
        let (targets, default) = found.expect("switch must lower to br_table");
        assert_eq!(targets, vec!["switch-case", "switch-case$1"]);
        assert_eq!(default, "switch-default");
    }
}
