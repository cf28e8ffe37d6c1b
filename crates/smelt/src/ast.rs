//! asm.js AST.
//!
//! The parser produces this tree; the translator consumes it. Only the
//! shapes emscripten actually emits are representable; anything else is
//! rejected during parsing or translation.
//!
//! `Display` prints a compact JavaScript-ish rendering, used when a fatal
//! diagnostic needs to dump the offending node.

use std::fmt;

/// Binary operators of the asm.js subset, in source spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,    // +
    Sub,    // -
    Mul,    // *
    Div,    // /
    Mod,    // %
    Or,     // |
    And,    // &
    Xor,    // ^
    Shl,    // <<
    Shr,    // >>
    ShrU,   // >>>
    Eq,     // ==
    Ne,     // !=
    Lt,     // <
    Le,     // <=
    Gt,     // >
    Ge,     // >=
    LogAnd, // && (parsed, rejected by the translator)
    LogOr,  // ||
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Or => "|",
            BinOp::And => "&",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::ShrU => ">>>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
        }
    }
}

/// Prefix operators: `+e`, `-e`, `~e`, `!e`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Plus,
    Minus,
    BitNot,
    LogNot,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Plus => "+",
            UnOp::Minus => "-",
            UnOp::BitNot => "~",
            UnOp::LogNot => "!",
        }
    }
}

/// An asm.js expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal. asm.js has no other literal kinds in expression
    /// position (strings only appear as directives).
    Num(f64),
    Name(String),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    /// `target = value`; target is a `Name` or a `Sub`.
    Assign(Box<Expr>, Box<Expr>),
    /// `callee(args)`; callee is a `Name` or a `Sub` (function-pointer call).
    Call(Box<Expr>, Vec<Expr>),
    /// `base[index]`: heap view access or function-table lookup.
    Sub(Box<Expr>, Box<Expr>),
    /// `obj.field`, possibly nested (`global.Math.imul`).
    Dot(Box<Expr>, String),
    /// `new ctor(args)`: typed-array heap view construction.
    New(Box<Expr>),
    /// `cond ? then : else`.
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Comma expression `(a, b)`.
    Seq(Box<Expr>, Box<Expr>),
    /// `[f, g, ...]`: function-table literal.
    Array(Vec<Expr>),
    /// `{ key: value, ... }`: the export object.
    Object(Vec<(String, Expr)>),
}

impl Expr {
    /// Integer value of a numeric literal, if it is one and is integral.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Expr::Num(n) if n.fract() == 0.0 && n.abs() < 9.0e18 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(name) => Some(name),
            _ => None,
        }
    }

    /// True for `Num(0)` exactly (the int-global initializer shape).
    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Num(n) if *n == 0.0)
    }
}

/// An asm.js statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    /// `var a = init, b = init;`
    Var(Vec<(String, Expr)>),
    Expr(Expr),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    For {
        init: Option<Expr>,
        cond: Option<Expr>,
        inc: Option<Expr>,
        body: Box<Stmt>,
    },
    Label(String, Box<Stmt>),
    Break(Option<String>),
    Continue(Option<String>),
    Return(Option<Expr>),
    Switch(Expr, Vec<SwitchCase>),
    /// Lone `;`.
    Empty,
}

/// One `case k:`/`default:` arm; `value` is `None` for the default.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// A `function name(params) { ... }` definition. The first
/// `params.len()` body statements are the parameter type coercions
/// (`x = x | 0;` etc.), exactly as written in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// A top-level item of the asm.js module body.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleItem {
    /// Top-level `var` statement: imports, globals, views, tables.
    Var(Vec<(String, Expr)>),
    Func(FuncDef),
    /// Trailing `return { ... };` export object.
    Exports(Vec<(String, Expr)>),
}

/// A parsed asm.js module: the outer `function (global, env, buffer)`
/// with its directive and body items.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub directive: String,
    pub items: Vec<ModuleItem>,
}

// Display renders enough JavaScript to recognize the node in a
// diagnostic; it is not a pretty-printer and does not try to
// re-parenthesize by precedence.

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1.0e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Expr::Name(name) => write!(f, "{}", name),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::Unary(op, e) => write!(f, "{}({})", op.symbol(), e),
            Expr::Assign(t, v) => write!(f, "{} = {}", t, v),
            Expr::Call(callee, args) => {
                write!(f, "{}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::Sub(base, index) => write!(f, "{}[{}]", base, index),
            Expr::Dot(obj, field) => write!(f, "{}.{}", obj, field),
            Expr::New(e) => write!(f, "new {}", e),
            Expr::Conditional(c, t, e) => write!(f, "({} ? {} : {})", c, t, e),
            Expr::Seq(a, b) => write!(f, "({}, {})", a, b),
            Expr::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expr::Object(pairs) => {
                write!(f, "{{ ")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, " }}")
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Block(_) => write!(f, "{{ ... }}"),
            Stmt::Var(decls) => {
                write!(f, "var ")?;
                for (i, (name, init)) in decls.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, init)?;
                }
                write!(f, ";")
            }
            Stmt::Expr(e) => write!(f, "{};", e),
            Stmt::If(c, ..) => write!(f, "if ({}) ...", c),
            Stmt::While(c, _) => write!(f, "while ({}) ...", c),
            Stmt::DoWhile(_, c) => write!(f, "do ... while ({});", c),
            Stmt::For { .. } => write!(f, "for (...) ..."),
            Stmt::Label(name, s) => write!(f, "{}: {}", name, s),
            Stmt::Break(Some(l)) => write!(f, "break {};", l),
            Stmt::Break(None) => write!(f, "break;"),
            Stmt::Continue(Some(l)) => write!(f, "continue {};", l),
            Stmt::Continue(None) => write!(f, "continue;"),
            Stmt::Return(Some(e)) => write!(f, "return {};", e),
            Stmt::Return(None) => write!(f, "return;"),
            Stmt::Switch(c, _) => write!(f, "switch ({}) ...", c),
            Stmt::Empty => write!(f, ";"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_literals_round_trip() {
        assert_eq!(Expr::Num(42.0).as_integer(), Some(42));
        assert_eq!(Expr::Num(-1.0).as_integer(), Some(-1));
        assert_eq!(Expr::Num(0.5).as_integer(), None);
    }

    #[test]
    fn display_dumps_recognizable_source() {
        let e = Expr::Binary(
            BinOp::Or,
            Box::new(Expr::Name("x".into())),
            Box::new(Expr::Num(0.0)),
        );
        assert_eq!(e.to_string(), "(x | 0)");

        let s = Stmt::Return(Some(e));
        assert_eq!(s.to_string(), "return (x | 0);");
    }

    #[test]
    fn heap_access_display() {
        let e = Expr::Sub(
            Box::new(Expr::Name("HEAP32".into())),
            Box::new(Expr::Binary(
                BinOp::Shr,
                Box::new(Expr::Name("p".into())),
                Box::new(Expr::Num(2.0)),
            )),
        );
        assert_eq!(e.to_string(), "HEAP32[(p >> 2)]");
    }
}
