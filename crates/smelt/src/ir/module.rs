//! Module-level IR: functions, imports, exports, globals, the single
//! indirect-call table, and memory configuration.
//!
//! The module is append-only during translation; the finalizer and the
//! assembly step are the only later mutators. Functions own their
//! expression arenas exclusively, which is what makes the
//! function-parallel passes safe.

use rustc_hash::FxHashMap;

use super::expr::{ExprId, FuncArena, Name};
use super::types::{Literal, ValType};

/// A function of the output module.
#[derive(Debug, Clone, Default)]
pub struct Function {
    pub name: Name,
    pub params: Vec<ValType>,
    pub result: ValType,
    /// Locals beyond the parameters.
    pub vars: Vec<ValType>,
    /// Names of params then vars, parallel to the local index space.
    pub local_names: Vec<Name>,
    pub body: Option<ExprId>,
    pub arena: FuncArena,
    /// Source locations folded out of debug intrinsics:
    /// expression -> (file index, line number).
    pub debug_locations: FxHashMap<ExprId, (u32, u32)>,
}

impl Function {
    pub fn new(name: impl Into<Name>) -> Self {
        Function {
            name: name.into(),
            result: ValType::None,
            ..Default::default()
        }
    }

    pub fn num_locals(&self) -> usize {
        self.params.len() + self.vars.len()
    }

    pub fn local_type(&self, index: u32) -> ValType {
        let i = index as usize;
        if i < self.params.len() {
            self.params[i]
        } else {
            self.vars[i - self.params.len()]
        }
    }

    pub fn local_index(&self, name: &str) -> Option<u32> {
        self.local_names.iter().position(|n| n == name).map(|i| i as u32)
    }

    pub fn add_param(&mut self, name: impl Into<Name>, ty: ValType) -> u32 {
        debug_assert!(self.vars.is_empty(), "params must be added before vars");
        self.params.push(ty);
        self.local_names.push(name.into());
        (self.params.len() - 1) as u32
    }

    pub fn add_var(&mut self, name: impl Into<Name>, ty: ValType) -> u32 {
        self.vars.push(ty);
        self.local_names.push(name.into());
        (self.num_locals() - 1) as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// Signature is filled in by the call finalizer once inference is
    /// complete.
    Function { sig: Option<String> },
    Global { ty: ValType },
    Memory,
    Table,
}

/// `name` is the internal binding; `(module, base)` the external pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub name: Name,
    pub module: Name,
    pub base: Name,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Function,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    /// External name.
    pub name: Name,
    /// Internal name of the exported function or global.
    pub value: Name,
    pub kind: ExportKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    Const(Literal),
    /// Initialized from an imported global (the dual-global lowering for
    /// mutable asm.js imports).
    GetGlobal(Name),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: Name,
    pub ty: ValType,
    pub mutable: bool,
    pub init: GlobalInit,
}

/// The single indirect-call table: one element segment starting at the
/// `tableBase` global, holding every source-level function table
/// back-to-back.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub names: Vec<Name>,
    pub initial: u32,
    pub max: u32,
    pub imported: bool,
}

/// Linear memory configuration. asm.js modules always import memory.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    pub imported: bool,
    pub initial: u32,
    pub max: Option<u32>,
}

/// The WASM module being built.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
    pub globals: Vec<Global>,
    pub table: Table,
    pub memory: Memory,
    /// Install the exported grow-memory helper during encoding.
    pub memory_growth: bool,
    /// Debug file-name table, moved over from the preprocessor.
    pub debug_file_names: Vec<String>,
}

impl Module {
    pub fn add_function(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn add_import(&mut self, import: Import) {
        self.imports.push(import);
    }

    pub fn get_import(&self, name: &str) -> Option<&Import> {
        self.imports.iter().find(|i| i.name == name)
    }

    pub fn get_import_mut(&mut self, name: &str) -> Option<&mut Import> {
        self.imports.iter_mut().find(|i| i.name == name)
    }

    pub fn remove_import(&mut self, name: &str) {
        self.imports.retain(|i| i.name != name);
    }

    pub fn add_global(&mut self, global: Global) {
        self.globals.push(global);
    }

    pub fn get_global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn add_export(&mut self, export: Export) {
        self.exports.push(export);
    }

    /// Function imports in declaration order; their positions are the
    /// low end of the function index space.
    pub fn function_imports(&self) -> impl Iterator<Item = &Import> {
        self.imports
            .iter()
            .filter(|i| matches!(i.kind, ImportKind::Function { .. }))
    }

    /// Index of a callable name in the function index space (imports
    /// first, then defined functions).
    pub fn function_index(&self, name: &str) -> Option<u32> {
        let mut index = 0u32;
        for import in self.function_imports() {
            if import.name == name {
                return Some(index);
            }
            index += 1;
        }
        for func in &self.functions {
            if func.name == name {
                return Some(index);
            }
            index += 1;
        }
        None
    }
}
