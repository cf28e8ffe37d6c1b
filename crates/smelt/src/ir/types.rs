//! Core IR value and operator types.
//!
//! Value types follow the WebAssembly MVP: four numeric types plus the
//! two pseudo-types the translator needs while inferring (`None` for
//! "no value / not yet known", `Unreachable` for control transfers).
//! Signatures are interned as strings in the result-first convention
//! (`"ii"` = `(i32) -> i32`, `"ddd"` = `(f64, f64) -> f64`, `"v"` =
//! `() -> ()`).

use std::fmt;

/// WebAssembly value types, plus the translator's pseudo-types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    /// No value; also the "unknown" state during signature inference.
    #[default]
    None,
    /// Control transfer; produced by `return`, `br`, `br_table`.
    Unreachable,
}

impl ValType {
    /// True for the four numeric types.
    pub fn is_concrete(self) -> bool {
        matches!(
            self,
            ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValType::F32 | ValType::F64)
    }

    /// One-letter signature code.
    pub fn sig_char(self) -> char {
        match self {
            ValType::I32 => 'i',
            ValType::I64 => 'j',
            ValType::F32 => 'f',
            ValType::F64 => 'd',
            ValType::None => 'v',
            ValType::Unreachable => 'v',
        }
    }

    pub fn from_sig_char(c: char) -> ValType {
        match c {
            'i' => ValType::I32,
            'j' => ValType::I64,
            'f' => ValType::F32,
            'd' => ValType::F64,
            'v' => ValType::None,
            _ => panic!("bad signature char: {}", c),
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValType::I32 => "i32",
            ValType::I64 => "i64",
            ValType::F32 => "f32",
            ValType::F64 => "f64",
            ValType::None => "none",
            ValType::Unreachable => "unreachable",
        };
        write!(f, "{}", s)
    }
}

/// Build a signature string: result first, then parameters.
pub fn sig_for(result: ValType, params: &[ValType]) -> String {
    let mut sig = String::with_capacity(params.len() + 1);
    sig.push(result.sig_char());
    for p in params {
        sig.push(p.sig_char());
    }
    sig
}

/// Split a signature string back into (result, params).
pub fn sig_parts(sig: &str) -> (ValType, Vec<ValType>) {
    let mut chars = sig.chars();
    let result = ValType::from_sig_char(chars.next().expect("empty signature"));
    let params = chars.map(ValType::from_sig_char).collect();
    (result, params)
}

/// A constant value; the variant encodes the type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Literal {
    pub fn ty(self) -> ValType {
        match self {
            Literal::I32(_) => ValType::I32,
            Literal::I64(_) => ValType::I64,
            Literal::F32(_) => ValType::F32,
            Literal::F64(_) => ValType::F64,
        }
    }

    /// Zero of the given concrete type.
    pub fn zero(ty: ValType) -> Literal {
        match ty {
            ValType::I32 => Literal::I32(0),
            ValType::I64 => Literal::I64(0),
            ValType::F32 => Literal::F32(0.0),
            ValType::F64 => Literal::F64(0.0),
            other => panic!("no zero literal for {}", other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Literal::I32(v) => v,
            other => panic!("expected i32 literal, found {:?}", other),
        }
    }
}

/// Unary operators of the subset of WebAssembly the translator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    // i32
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Eqz,

    // i64
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Eqz,

    // floats
    F32Neg,
    F32Abs,
    F32Ceil,
    F32Floor,
    F32Sqrt,
    F64Neg,
    F64Abs,
    F64Ceil,
    F64Floor,
    F64Sqrt,

    // int width changes
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,

    // float -> int truncations (trapping in wasm)
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,

    // int -> float conversions
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,

    // float precision
    F32DemoteF64,
    F64PromoteF32,

    // bitcasts
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
}

impl UnaryOp {
    /// The value type this operation produces.
    pub fn result_type(self) -> ValType {
        use UnaryOp::*;
        match self {
            I32Clz | I32Ctz | I32Popcnt | I32Eqz | I64Eqz | I32WrapI64 | I32TruncF32S
            | I32TruncF32U | I32TruncF64S | I32TruncF64U | I32ReinterpretF32 => ValType::I32,
            I64Clz | I64Ctz | I64Popcnt | I64ExtendI32S | I64ExtendI32U | I64TruncF32S
            | I64TruncF32U | I64TruncF64S | I64TruncF64U | I64ReinterpretF64 => ValType::I64,
            F32Neg | F32Abs | F32Ceil | F32Floor | F32Sqrt | F32ConvertI32S | F32ConvertI32U
            | F32ConvertI64S | F32ConvertI64U | F32DemoteF64 | F32ReinterpretI32 => ValType::F32,
            F64Neg | F64Abs | F64Ceil | F64Floor | F64Sqrt | F64ConvertI32S | F64ConvertI32U
            | F64ConvertI64S | F64ConvertI64U | F64PromoteF32 | F64ReinterpretI64 => ValType::F64,
        }
    }
}

/// Binary operators of the subset of WebAssembly the translator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // i32 arithmetic and bitwise
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,

    // i32 comparisons
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // i64 arithmetic and bitwise
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,

    // i64 comparisons
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // f32
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Le,
    F32Gt,
    F32Ge,

    // f64
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Le,
    F64Gt,
    F64Ge,
}

impl BinaryOp {
    /// The value type this operation produces. All comparisons produce
    /// i32 regardless of operand type.
    pub fn result_type(self) -> ValType {
        use BinaryOp::*;
        match self {
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU => ValType::I32,
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
            | I64Xor | I64Shl | I64ShrS | I64ShrU => ValType::I64,
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => ValType::F32,
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => ValType::F64,
            // every comparison
            _ => ValType::I32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sig_round_trip() {
        assert_eq!(sig_for(ValType::F64, &[ValType::F64, ValType::F64]), "ddd");
        assert_eq!(sig_for(ValType::I32, &[ValType::F64]), "id");
        assert_eq!(sig_for(ValType::None, &[]), "v");

        let (result, params) = sig_parts("idf");
        assert_eq!(result, ValType::I32);
        assert_eq!(params, vec![ValType::F64, ValType::F32]);
    }

    #[test]
    fn literal_types() {
        assert_eq!(Literal::I32(1).ty(), ValType::I32);
        assert_eq!(Literal::F64(0.5).ty(), ValType::F64);
        assert_eq!(Literal::zero(ValType::F32), Literal::F32(0.0));
    }

    #[test]
    fn comparison_results_are_i32() {
        assert_eq!(BinaryOp::I64LtS.result_type(), ValType::I32);
        assert_eq!(BinaryOp::F64Eq.result_type(), ValType::I32);
        assert_eq!(BinaryOp::F32Ge.result_type(), ValType::I32);
        assert_eq!(BinaryOp::I64Add.result_type(), ValType::I64);
    }

    #[test]
    fn unary_result_types() {
        assert_eq!(UnaryOp::I64Eqz.result_type(), ValType::I32);
        assert_eq!(UnaryOp::F64PromoteF32.result_type(), ValType::F64);
        assert_eq!(UnaryOp::I32TruncF64S.result_type(), ValType::I32);
        assert_eq!(UnaryOp::F32ReinterpretI32.result_type(), ValType::F32);
    }
}
