//! Final module wiring, independent of the input: memory and table
//! imports, the `memoryBase`/`tableBase` globals, memory growth, and
//! the i64 rewrite of `__udivmoddi4`.

use anyhow::{bail, Context as _, Result};

use crate::ir::{
    BinaryOp, Expression, Function, Global, GlobalInit, Import, ImportKind, Literal, Module,
    UnaryOp, ValType,
};

use super::context::Context;
use super::names;

/// WebAssembly's page ceiling (4 GiB of 64 KiB pages); used as
/// `memory.max` when the module grows memory.
const MAX_PAGES: u32 = 65536;

pub fn run(module: &mut Module, ctx: &Context, memory_growth: bool) -> Result<()> {
    // memory and table always come from the environment
    module.add_import(Import {
        name: "memory".to_string(),
        module: "env".to_string(),
        base: "memory".to_string(),
        kind: ImportKind::Memory,
    });
    module.memory.imported = true;

    module.add_import(Import {
        name: "table".to_string(),
        module: "env".to_string(),
        base: "table".to_string(),
        kind: ImportKind::Table,
    });
    module.table.imported = true;

    // segment offsets read these; add them unless the source already
    // imported them under their canonical names
    for base in [names::MEMORY_BASE, names::TABLE_BASE] {
        if module.get_import(base).is_none() && module.get_global(base).is_none() {
            module.add_import(Import {
                name: base.to_string(),
                module: "env".to_string(),
                base: base.to_string(),
                kind: ImportKind::Global { ty: ValType::I32 },
            });
        }
    }

    if memory_growth {
        module.memory_growth = true;
        module.memory.max = Some(MAX_PAGES);
    }

    if let (Some(udivmoddi4), Some(get_temp_ret0)) = (&ctx.udivmoddi4, &ctx.get_temp_ret0) {
        rewrite_udivmoddi4(module, udivmoddi4, get_temp_ret0)
            .context("rewriting __udivmoddi4 to i64 form")?;
    }
    Ok(())
}

/// `__udivmoddi4(xl, xh, yl, yh, r)` works on split 64-bit halves; with
/// real i64s available the natural form is far better: recombine, do
/// one `div_u`/`rem_u`, spill the high word through `tempRet0`. The
/// `tempRet0` global is discovered through `getTempRet0`'s body, which
/// survives minification.
fn rewrite_udivmoddi4(module: &mut Module, udivmoddi4: &str, get_temp_ret0: &str) -> Result<()> {
    let temp_ret0 = {
        let getter = module
            .get_function(get_temp_ret0)
            .with_context(|| format!("exported getTempRet0 `{}` not found", get_temp_ret0))?;
        let mut curr = getter
            .body
            .with_context(|| format!("`{}` has no body", get_temp_ret0))?;
        if let Expression::Block { list, .. } = getter.arena.get(curr) {
            curr = *list.last().context("empty getTempRet0 body")?;
        }
        if let Expression::Return { value: Some(v) } = getter.arena.get(curr) {
            curr = *v;
        }
        match getter.arena.get(curr) {
            Expression::GetGlobal { name, .. } => name.clone(),
            other => bail!("unrecognized getTempRet0 body: {:?}", other),
        }
    };

    let result = {
        let old = module
            .get_function(udivmoddi4)
            .with_context(|| format!("exported __udivmoddi4 `{}` not found", udivmoddi4))?;
        old.result
    };

    let mut func = Function::new(udivmoddi4);
    func.result = result;
    let xl = func.add_param("xl", ValType::I32);
    let xh = func.add_param("xh", ValType::I32);
    let yl = func.add_param("yl", ValType::I32);
    let yh = func.add_param("yh", ValType::I32);
    let r = func.add_param("r", ValType::I32);
    let x64 = func.add_var("x64", ValType::I64);
    let y64 = func.add_var("y64", ValType::I64);

    let arena = &mut func.arena;
    let recreate = |arena: &mut crate::ir::FuncArena, lo: u32, hi: u32| {
        let lo = arena.get_local(lo, ValType::I32);
        let lo64 = arena.unary(UnaryOp::I64ExtendI32U, lo);
        let hi = arena.get_local(hi, ValType::I32);
        let hi64 = arena.unary(UnaryOp::I64ExtendI32U, hi);
        let thirty_two = arena.const_(Literal::I64(32));
        let shifted = arena.binary(BinaryOp::I64Shl, hi64, thirty_two);
        arena.binary(BinaryOp::I64Or, lo64, shifted)
    };

    let mut list = Vec::new();
    let x = recreate(arena, xl, xh);
    list.push(arena.set_local(x64, x));
    let y = recreate(arena, yl, yh);
    list.push(arena.set_local(y64, y));

    // if r != 0, *r = x % y
    let r_get = arena.get_local(r, ValType::I32);
    let x_get = arena.get_local(x64, ValType::I64);
    let y_get = arena.get_local(y64, ValType::I64);
    let rem = arena.binary(BinaryOp::I64RemU, x_get, y_get);
    let r_ptr = arena.get_local(r, ValType::I32);
    let store = arena.alloc(Expression::Store {
        bytes: 8,
        offset: 0,
        align: 8,
        ptr: r_ptr,
        value: rem,
        value_ty: ValType::I64,
    });
    list.push(arena.alloc(Expression::If {
        condition: r_get,
        if_true: store,
        if_false: None,
        ty: ValType::None,
    }));

    // x = x / y
    let x_get = arena.get_local(x64, ValType::I64);
    let y_get = arena.get_local(y64, ValType::I64);
    let quotient = arena.binary(BinaryOp::I64DivU, x_get, y_get);
    list.push(arena.set_local(x64, quotient));

    // tempRet0 = high word, return the low word
    let x_get = arena.get_local(x64, ValType::I64);
    let thirty_two = arena.const_(Literal::I64(32));
    let high = arena.binary(BinaryOp::I64ShrU, x_get, thirty_two);
    let high32 = arena.unary(UnaryOp::I32WrapI64, high);
    list.push(arena.alloc(Expression::SetGlobal {
        name: temp_ret0,
        value: high32,
    }));
    let x_get = arena.get_local(x64, ValType::I64);
    list.push(arena.unary(UnaryOp::I32WrapI64, x_get));

    let body = arena.alloc(Expression::Block {
        name: None,
        list,
        ty: ValType::I32,
    });
    func.body = Some(body);

    let slot = module
        .get_function_mut(udivmoddi4)
        .expect("checked above");
    *slot = func;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_wiring_is_added() {
        let mut module = Module::default();
        let ctx = Context::default();
        run(&mut module, &ctx, false).unwrap();
        assert!(module.memory.imported);
        assert!(module.table.imported);
        assert!(module.get_import(names::MEMORY_BASE).is_some());
        assert!(module.get_import(names::TABLE_BASE).is_some());
        assert!(!module.memory_growth);
        assert_eq!(module.memory.max, None);
    }

    #[test]
    fn growth_raises_the_memory_maximum() {
        let mut module = Module::default();
        let ctx = Context::default();
        run(&mut module, &ctx, true).unwrap();
        assert!(module.memory_growth);
        assert_eq!(module.memory.max, Some(MAX_PAGES));
    }

    #[test]
    fn existing_table_base_import_is_kept() {
        let mut module = Module::default();
        module.add_import(Import {
            name: names::TABLE_BASE.to_string(),
            module: "env".to_string(),
            base: names::TABLE_BASE.to_string(),
            kind: ImportKind::Global { ty: ValType::I32 },
        });
        let ctx = Context::default();
        run(&mut module, &ctx, false).unwrap();
        let count = module
            .imports
            .iter()
            .filter(|i| i.name == names::TABLE_BASE)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn udivmoddi4_is_rewritten_to_i64_form() {
        let mut module = Module::default();
        // a minified getter returning the tempRet0 global
        let mut getter = Function::new("Vd");
        getter.result = ValType::I32;
        let get = getter.arena.alloc(Expression::GetGlobal {
            name: "tr0".to_string(),
            ty: ValType::I32,
        });
        let ret = getter.arena.alloc(Expression::Return { value: Some(get) });
        let body = getter.arena.alloc(Expression::Block {
            name: None,
            list: vec![ret],
            ty: ValType::Unreachable,
        });
        getter.body = Some(body);
        module.add_function(getter);

        let mut old = Function::new("Wd");
        old.result = ValType::I32;
        for p in ["a", "b", "c", "d", "e"] {
            old.add_param(p, ValType::I32);
        }
        let zero = old.arena.const_(Literal::I32(0));
        old.body = Some(zero);
        module.add_function(old);
        module.add_global(Global {
            name: "tr0".to_string(),
            ty: ValType::I32,
            mutable: true,
            init: GlobalInit::Const(Literal::I32(0)),
        });

        let mut ctx = Context::default();
        ctx.udivmoddi4 = Some("Wd".to_string());
        ctx.get_temp_ret0 = Some("Vd".to_string());
        run(&mut module, &ctx, false).unwrap();

        let rebuilt = module.get_function("Wd").unwrap();
        assert_eq!(rebuilt.params, vec![ValType::I32; 5]);
        assert_eq!(rebuilt.vars, vec![ValType::I64, ValType::I64]);
        // the body now sets tempRet0 to the high word
        let Expression::Block { list, .. } = rebuilt.arena.get(rebuilt.body.unwrap()) else {
            panic!("expected block body");
        };
        assert!(list.iter().any(|&id| matches!(
            rebuilt.arena.get(id),
            Expression::SetGlobal { name, .. } if name == "tr0"
        )));
    }
}
