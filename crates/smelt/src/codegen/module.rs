//! Module encoding: section construction and index-space layout.
//!
//! Memory and table are imports, so only type, import, function,
//! global, export, element, code and name sections appear. Signatures
//! are interned into the type section; the element segment (one, at
//! `tableBase`) holds the merged function table. When memory growth was
//! detected, an exported `__growWasmMemory` helper is appended here,
//! at the instruction level, since the expression IR has no grow node.

use anyhow::{bail, Context as _, Result};
use rustc_hash::FxHashMap;
use wasm_encoder::{
    CodeSection, ConstExpr, ElementSection, Elements, EntityType,
    ExportKind as WasmExportKind, ExportSection, FunctionSection, GlobalSection, GlobalType,
    ImportSection, Instruction, MemoryType, NameMap, NameSection, RefType, TableType, TypeSection,
};

use crate::ir::{
    sig_for, sig_parts, ExportKind, Expression, Function, GlobalInit, ImportKind, Literal, Module,
    ValType,
};
use crate::translate::names;

use super::instruction::InstrEmitter;

pub fn val_type(ty: ValType) -> wasm_encoder::ValType {
    match ty {
        ValType::I32 => wasm_encoder::ValType::I32,
        ValType::I64 => wasm_encoder::ValType::I64,
        ValType::F32 => wasm_encoder::ValType::F32,
        ValType::F64 => wasm_encoder::ValType::F64,
        other => panic!("{} has no encoding", other),
    }
}

/// Resolved index spaces, shared with the instruction emitter.
pub struct Layout {
    function_indices: FxHashMap<String, u32>,
    global_indices: FxHashMap<String, u32>,
    sig_indices: FxHashMap<String, u32>,
    sigs: Vec<String>,
}

impl Layout {
    pub fn function_index(&self, name: &str) -> Result<u32> {
        self.function_indices
            .get(name)
            .copied()
            .with_context(|| format!("call to unknown function `{}`", name))
    }

    pub fn global_index(&self, name: &str) -> Result<u32> {
        self.global_indices
            .get(name)
            .copied()
            .with_context(|| format!("access to unknown global `{}`", name))
    }

    pub fn sig_index(&self, sig: &str) -> Result<u32> {
        self.sig_indices
            .get(sig)
            .copied()
            .with_context(|| format!("uninterned signature `{}`", sig))
    }

    fn intern(&mut self, sig: &str) -> u32 {
        if let Some(&index) = self.sig_indices.get(sig) {
            return index;
        }
        let index = self.sigs.len() as u32;
        self.sigs.push(sig.to_string());
        self.sig_indices.insert(sig.to_string(), index);
        index
    }
}

fn function_sig(func: &Function) -> String {
    sig_for(func.result, &func.params)
}

fn build_layout(module: &Module) -> Result<Layout> {
    let mut layout = Layout {
        function_indices: FxHashMap::default(),
        global_indices: FxHashMap::default(),
        sig_indices: FxHashMap::default(),
        sigs: Vec::new(),
    };

    let mut func_index = 0u32;
    let mut global_index = 0u32;
    for import in &module.imports {
        match &import.kind {
            ImportKind::Function { sig } => {
                let Some(sig) = sig else {
                    bail!("import `{}` has no inferred signature", import.name);
                };
                layout.intern(sig);
                layout.function_indices.insert(import.name.clone(), func_index);
                func_index += 1;
            }
            ImportKind::Global { .. } => {
                layout
                    .global_indices
                    .insert(import.name.clone(), global_index);
                global_index += 1;
            }
            ImportKind::Memory | ImportKind::Table => {}
        }
    }
    for func in &module.functions {
        layout.intern(&function_sig(func));
        layout.function_indices.insert(func.name.clone(), func_index);
        func_index += 1;
    }
    for global in &module.globals {
        layout.global_indices.insert(global.name.clone(), global_index);
        global_index += 1;
    }
    // indirect-call signatures referenced from function bodies
    for func in &module.functions {
        for node in func.arena.iter_nodes() {
            if let Expression::CallIndirect { sig, .. } = node {
                layout.intern(sig);
            }
        }
    }
    if module.memory_growth {
        layout.intern("ii");
    }
    Ok(layout)
}

pub fn encode(module: &Module) -> Result<Vec<u8>> {
    let layout = build_layout(module)?;
    let mut out = wasm_encoder::Module::new();

    // types
    let mut types = TypeSection::new();
    for sig in &layout.sigs {
        let (result, params) = sig_parts(sig);
        let params: Vec<wasm_encoder::ValType> = params.iter().map(|&t| val_type(t)).collect();
        let results: Vec<wasm_encoder::ValType> = if result.is_concrete() {
            vec![val_type(result)]
        } else {
            vec![]
        };
        types.ty().function(params, results);
    }
    out.section(&types);

    // imports, in declaration order
    let mut imports = ImportSection::new();
    for import in &module.imports {
        let entity = match &import.kind {
            ImportKind::Function { sig } => {
                let sig = sig.as_ref().expect("checked in build_layout");
                EntityType::Function(layout.sig_index(sig)?)
            }
            ImportKind::Global { ty } => EntityType::Global(GlobalType {
                val_type: val_type(*ty),
                mutable: false,
                shared: false,
            }),
            ImportKind::Memory => EntityType::Memory(MemoryType {
                minimum: module.memory.initial as u64,
                maximum: module.memory.max.map(|m| m as u64),
                memory64: false,
                shared: false,
                page_size_log2: None,
            }),
            ImportKind::Table => EntityType::Table(TableType {
                element_type: RefType::FUNCREF,
                minimum: module.table.initial as u64,
                maximum: Some(module.table.max as u64),
                table64: false,
                shared: false,
            }),
        };
        imports.import(&import.module, &import.base, entity);
    }
    out.section(&imports);

    // function declarations
    let mut functions = FunctionSection::new();
    for func in &module.functions {
        functions.function(layout.sig_index(&function_sig(func))?);
    }
    if module.memory_growth {
        functions.function(layout.sig_index("ii")?);
    }
    out.section(&functions);

    // globals
    let mut globals = GlobalSection::new();
    for global in &module.globals {
        let init = match &global.init {
            GlobalInit::Const(lit) => match *lit {
                Literal::I32(v) => ConstExpr::i32_const(v),
                Literal::I64(v) => ConstExpr::i64_const(v),
                Literal::F32(v) => ConstExpr::f32_const(v.into()),
                Literal::F64(v) => ConstExpr::f64_const(v.into()),
            },
            GlobalInit::GetGlobal(name) => ConstExpr::global_get(layout.global_index(name)?),
        };
        globals.global(
            GlobalType {
                val_type: val_type(global.ty),
                mutable: global.mutable,
                shared: false,
            },
            &init,
        );
    }
    out.section(&globals);

    // exports
    let mut exports = ExportSection::new();
    for export in &module.exports {
        match export.kind {
            ExportKind::Function => {
                let index = layout
                    .function_index(&export.value)
                    .with_context(|| format!("export `{}`", export.name))?;
                exports.export(&export.name, WasmExportKind::Func, index);
            }
            ExportKind::Global => {
                let index = layout
                    .global_index(&export.value)
                    .with_context(|| format!("export `{}`", export.name))?;
                exports.export(&export.name, WasmExportKind::Global, index);
            }
        }
    }
    if module.memory_growth {
        // the helper is the last function
        let helper_index =
            module.function_imports().count() as u32 + module.functions.len() as u32;
        exports.export(names::GROW_WASM_MEMORY, WasmExportKind::Func, helper_index);
    }
    out.section(&exports);

    // the one element segment, at tableBase
    if !module.table.names.is_empty() {
        let mut elements = ElementSection::new();
        let offset = ConstExpr::global_get(layout.global_index(names::TABLE_BASE)?);
        let indices: Vec<u32> = module
            .table
            .names
            .iter()
            .map(|name| layout.function_index(name))
            .collect::<Result<_>>()?;
        elements.active(None, &offset, Elements::Functions(indices.into()));
        out.section(&elements);
    }

    // code
    let mut code = CodeSection::new();
    for func in &module.functions {
        let locals = local_runs(func);
        let mut body = wasm_encoder::Function::new(locals);
        let mut emitter = InstrEmitter {
            func,
            layout: &layout,
            out: &mut body,
            labels: Vec::new(),
        };
        emitter
            .emit_body()
            .with_context(|| format!("encoding function `{}`", func.name))?;
        code.function(&body);
    }
    if module.memory_growth {
        let mut body = wasm_encoder::Function::new(vec![]);
        body.instruction(&Instruction::LocalGet(0));
        body.instruction(&Instruction::MemoryGrow(0));
        body.instruction(&Instruction::End);
        code.function(&body);
    }
    out.section(&code);

    // function names, for debuggers
    let mut name_section = NameSection::new();
    let mut func_names = NameMap::new();
    let mut index = 0u32;
    for import in module.function_imports() {
        func_names.append(index, &import.name);
        index += 1;
    }
    for func in &module.functions {
        func_names.append(index, &func.name);
        index += 1;
    }
    if module.memory_growth {
        func_names.append(index, names::GROW_WASM_MEMORY);
    }
    name_section.functions(&func_names);
    out.section(&name_section);

    Ok(out.finish())
}

/// Group consecutive same-typed locals into (count, type) runs; wasm
/// declares locals that way.
fn local_runs(func: &Function) -> Vec<(u32, wasm_encoder::ValType)> {
    let mut runs: Vec<(u32, wasm_encoder::ValType)> = Vec::new();
    for &ty in &func.vars {
        let encoded = val_type(ty);
        match runs.last_mut() {
            Some((count, t)) if *t == encoded => *count += 1,
            _ => runs.push((1, encoded)),
        }
    }
    runs
}
