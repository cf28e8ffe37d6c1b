//! Per-run translator state.
//!
//! Every registry the translation consults lives here, scoped to one
//! run: mapped globals, heap views, function-table starts, inferred
//! import signatures, and the set of already-synthesized helpers.
//! Nothing is process-global, so concurrent runs never share state.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{Name, ValType};

/// How arithmetic that can trap in WebAssembly is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrapMode {
    /// Emit the raw operation; the runtime may trap.
    #[default]
    Allow,
    /// Saturate / zero through synthesized helper functions.
    Clamp,
    /// Emulate JavaScript semantics precisely through an ffi import.
    Js,
}

/// Asm.js-side types. `Int64` only occurs in wasm-only builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsmType {
    Int,
    Double,
    Float,
    Int64,
    #[default]
    None,
}

impl AsmType {
    pub fn to_wasm(self) -> ValType {
        match self {
            AsmType::Int => ValType::I32,
            AsmType::Double => ValType::F64,
            AsmType::Float => ValType::F32,
            AsmType::Int64 => ValType::I64,
            AsmType::None => ValType::None,
        }
    }

    pub fn from_wasm(ty: ValType) -> AsmType {
        match ty {
            ValType::I32 => AsmType::Int,
            ValType::F64 => AsmType::Double,
            ValType::F32 => AsmType::Float,
            ValType::I64 => AsmType::Int64,
            _ => AsmType::None,
        }
    }
}

/// A module-scope variable binding.
#[derive(Debug, Clone)]
pub struct MappedGlobal {
    pub ty: ValType,
    /// If true this is an import: reads must see the imported value,
    /// not a zero initializer.
    pub imported: bool,
}

/// A typed-array heap view (`HEAP8`, `HEAPF32`, ...).
#[derive(Debug, Clone, Copy)]
pub struct View {
    pub bytes: u8,
    pub integer: bool,
    pub signed: bool,
    pub ty: AsmType,
}

impl View {
    pub fn new(bytes: u8, integer: bool, signed: bool, ty: AsmType) -> Self {
        View {
            bytes,
            integer,
            signed,
            ty,
        }
    }

    /// The WASM type a load/store through this view moves.
    pub fn wasm_type(&self) -> ValType {
        match (self.bytes, self.integer) {
            (8, false) => ValType::F64,
            (4, false) => ValType::F32,
            (8, true) => ValType::I64,
            _ => ValType::I32,
        }
    }
}

/// Tentative signature of an imported function, grown by observing call
/// sites. Parameter positions widen one-way: `none -> concrete -> f64`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportSig {
    pub params: Vec<ValType>,
    pub result: ValType,
}

impl ImportSig {
    pub fn new(params: Vec<ValType>, result: ValType) -> Self {
        ImportSig { params, result }
    }

    /// Merge one observed call site into this signature. asm.js permits
    /// ffi overloading; WASM does not, so conflicting observations widen
    /// to f64 (a JS double can carry anything i32 or f32 can).
    pub fn merge(&mut self, observed: &ImportSig) {
        for (i, &ty) in observed.params.iter().enumerate() {
            if i < self.params.len() {
                if self.params[i] == ValType::None {
                    self.params[i] = ty;
                } else if self.params[i] != ty && ty != ValType::None {
                    self.params[i] = ValType::F64;
                }
            } else {
                self.params.push(ty);
            }
        }
        if self.result == ValType::None {
            self.result = observed.result;
        } else if self.result != observed.result && observed.result != ValType::None {
            self.result = ValType::F64;
        }
    }
}

/// Names of `Math.*` and friends that are intercepted rather than
/// imported; the source may bind them to arbitrary (minified) names.
#[derive(Debug, Default)]
pub struct IntrinsicNames {
    pub imul: Option<Name>,
    pub clz32: Option<Name>,
    pub fround: Option<Name>,
    pub abs: Option<Name>,
    pub floor: Option<Name>,
    pub ceil: Option<Name>,
    pub sqrt: Option<Name>,
    pub max: Option<Name>,
    pub min: Option<Name>,
    pub llvm_cttz_i32: Option<Name>,
    /// Kept as an import too: only some uses optimize out.
    pub temp_double_ptr: Option<Name>,
}

impl IntrinsicNames {
    pub fn is(&self, slot: &Option<Name>, name: &str) -> bool {
        slot.as_deref() == Some(name)
    }
}

/// All run-scoped translation state.
#[derive(Debug, Default)]
pub struct Context {
    pub trap_mode: TrapMode,
    pub wasm_only: bool,
    pub debug: bool,

    pub mapped_globals: FxHashMap<Name, MappedGlobal>,
    pub views: FxHashMap<Name, View>,
    /// Source table name -> starting offset in the merged table.
    pub function_table_starts: FxHashMap<Name, u32>,
    /// Inferred signatures of asm.js ffi imports.
    pub imported_function_types: FxHashMap<Name, ImportSig>,
    /// Helpers and synthetic imports created at most once per run.
    pub added_functions: FxHashSet<Name>,

    pub intrinsics: IntrinsicNames,

    /// Possibly-minified names, detected via their exports.
    pub udivmoddi4: Option<Name>,
    pub get_temp_ret0: Option<Name>,
}

impl Context {
    pub fn new(trap_mode: TrapMode, wasm_only: bool, debug: bool) -> Self {
        Context {
            trap_mode,
            wasm_only,
            debug,
            ..Default::default()
        }
    }

    /// Record a call-site observation for an import (§4.4).
    pub fn note_imported_call(&mut self, name: &str, observed: ImportSig) {
        match self.imported_function_types.get_mut(name) {
            Some(sig) => sig.merge(&observed),
            None => {
                self.imported_function_types.insert(name.to_string(), observed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(params: &[ValType], result: ValType) -> ImportSig {
        ImportSig::new(params.to_vec(), result)
    }

    #[test]
    fn first_observation_is_stored() {
        let mut ctx = Context::default();
        ctx.note_imported_call("f", sig(&[ValType::I32], ValType::F64));
        assert_eq!(
            ctx.imported_function_types["f"],
            sig(&[ValType::I32], ValType::F64)
        );
    }

    #[test]
    fn none_learns_concrete() {
        let mut merged = sig(&[ValType::None], ValType::None);
        merged.merge(&sig(&[ValType::F32], ValType::I32));
        assert_eq!(merged, sig(&[ValType::F32], ValType::I32));
    }

    #[test]
    fn conflicts_widen_to_f64() {
        let mut merged = sig(&[ValType::I32], ValType::I32);
        merged.merge(&sig(&[ValType::F32], ValType::F32));
        assert_eq!(merged, sig(&[ValType::F64], ValType::F64));
    }

    #[test]
    fn extra_params_extend() {
        let mut merged = sig(&[ValType::I32], ValType::None);
        merged.merge(&sig(&[ValType::I32, ValType::F64], ValType::None));
        assert_eq!(merged.params, vec![ValType::I32, ValType::F64]);
    }

    #[test]
    fn none_result_does_not_demote() {
        let mut merged = sig(&[], ValType::I32);
        merged.merge(&sig(&[], ValType::None));
        assert_eq!(merged.result, ValType::I32);
    }

    #[test]
    fn merging_is_order_independent() {
        let observations = [
            sig(&[ValType::I32, ValType::None], ValType::None),
            sig(&[ValType::F32], ValType::I32),
            sig(&[ValType::I32], ValType::I32),
        ];
        // all permutations of the three observations converge
        let perms: &[[usize; 3]] = &[
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut results = Vec::new();
        for p in perms {
            let mut acc = ImportSig::default();
            acc.merge(&observations[p[0]]);
            acc.merge(&observations[p[1]]);
            acc.merge(&observations[p[2]]);
            results.push(acc);
        }
        for r in &results[1..] {
            assert_eq!(*r, results[0]);
        }
        assert_eq!(results[0], sig(&[ValType::F64, ValType::None], ValType::I32));
    }

    #[test]
    fn view_value_types() {
        assert_eq!(
            View::new(1, true, true, AsmType::Int).wasm_type(),
            ValType::I32
        );
        assert_eq!(
            View::new(4, false, true, AsmType::Float).wasm_type(),
            ValType::F32
        );
        assert_eq!(
            View::new(8, false, true, AsmType::Double).wasm_type(),
            ValType::F64
        );
    }
}
