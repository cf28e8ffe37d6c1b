//! Recursive-descent parser for the asm.js subset.
//!
//! asm.js is a tiny slice of JavaScript: one outer function, `var`
//! declarations, straight-line statements, and expressions over numbers.
//! The grammar here accepts exactly what emscripten emits; constructs
//! outside the subset fail here or later in translation.

mod lexer;

pub use lexer::{tokenize, Token, TokenKind};

use crate::ast::{BinOp, Expr, FuncDef, Module, ModuleItem, Stmt, SwitchCase, UnOp};
use anyhow::{bail, Context, Result};

/// Parse a complete asm.js module. The preprocessor has already removed
/// any outer `Module["asm"] = (...)` envelope, so the source starts at
/// the `function` keyword.
pub fn parse_module(source: &str) -> Result<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let module = parser.module()?;
    Ok(module)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek2(&self) -> &TokenKind {
        let i = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[i].kind
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), TokenKind::Punct(q) if *q == p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            bail!(
                "expected `{}` at line {}, found {:?}",
                p,
                self.line(),
                self.peek()
            )
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), TokenKind::Ident(name) if name == kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            bail!(
                "expected `{}` at line {}, found {:?}",
                kw,
                self.line(),
                self.peek()
            )
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        let line = self.line();
        match self.advance() {
            TokenKind::Ident(name) => Ok(name),
            other => bail!("expected identifier at line {}, found {:?}", line, other),
        }
    }

    // ── module structure ────────────────────────────────────────────────

    fn module(&mut self) -> Result<Module> {
        self.expect_keyword("function")?;
        let name = match self.peek() {
            TokenKind::Ident(_) => Some(self.expect_ident()?),
            _ => None,
        };
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")") {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        self.expect_punct("{")?;

        let directive = match self.advance() {
            TokenKind::Str(s) if s == "use asm" || s == "almost asm" => s,
            other => bail!("expected \"use asm\" directive, found {:?}", other),
        };
        self.expect_punct(";")?;

        let mut items = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_keyword("var") {
                let decls = self.var_decls()?;
                items.push(ModuleItem::Var(decls));
            } else if self.eat_keyword("function") {
                items.push(ModuleItem::Func(self.func_def()?));
            } else if self.eat_keyword("return") {
                let expr = self.expression().context("bad export object")?;
                self.eat_punct(";");
                match expr {
                    Expr::Object(pairs) => items.push(ModuleItem::Exports(pairs)),
                    other => bail!("module return must be an export object, found {}", other),
                }
            } else {
                bail!(
                    "unexpected top-level token at line {}: {:?}",
                    self.line(),
                    self.peek()
                );
            }
        }
        Ok(Module {
            name,
            params,
            directive,
            items,
        })
    }

    fn var_decls(&mut self) -> Result<Vec<(String, Expr)>> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect_punct("=")?;
            let init = self.assign_expr()?;
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(";")?;
        Ok(decls)
    }

    fn func_def(&mut self) -> Result<FuncDef> {
        let name = self.expect_ident()?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")") {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            body.push(self.statement()?);
        }
        Ok(FuncDef { name, params, body })
    }

    // ── statements ──────────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt> {
        if self.eat_punct("{") {
            let mut stmts = Vec::new();
            while !self.eat_punct("}") {
                stmts.push(self.statement()?);
            }
            return Ok(Stmt::Block(stmts));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.eat_keyword("var") {
            return Ok(Stmt::Var(self.var_decls()?));
        }
        if self.eat_keyword("if") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let then = Box::new(self.statement()?);
            let otherwise = if self.eat_keyword("else") {
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            return Ok(Stmt::If(cond, then, otherwise));
        }
        if self.eat_keyword("while") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt::While(cond, body));
        }
        if self.eat_keyword("do") {
            let body = Box::new(self.statement()?);
            self.expect_keyword("while")?;
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            self.eat_punct(";");
            return Ok(Stmt::DoWhile(body, cond));
        }
        if self.eat_keyword("for") {
            self.expect_punct("(")?;
            let init = if self.eat_punct(";") {
                None
            } else {
                let e = self.expression()?;
                self.expect_punct(";")?;
                Some(e)
            };
            let cond = if self.eat_punct(";") {
                None
            } else {
                let e = self.expression()?;
                self.expect_punct(";")?;
                Some(e)
            };
            let inc = if self.eat_punct(")") {
                None
            } else {
                let e = self.expression()?;
                self.expect_punct(")")?;
                Some(e)
            };
            let body = Box::new(self.statement()?);
            return Ok(Stmt::For {
                init,
                cond,
                inc,
                body,
            });
        }
        if self.eat_keyword("return") {
            if self.eat_punct(";") {
                return Ok(Stmt::Return(None));
            }
            let e = self.expression()?;
            self.eat_punct(";");
            return Ok(Stmt::Return(Some(e)));
        }
        if self.eat_keyword("break") {
            let label = match self.peek() {
                TokenKind::Ident(_) => Some(self.expect_ident()?),
                _ => None,
            };
            self.eat_punct(";");
            return Ok(Stmt::Break(label));
        }
        if self.eat_keyword("continue") {
            let label = match self.peek() {
                TokenKind::Ident(_) => Some(self.expect_ident()?),
                _ => None,
            };
            self.eat_punct(";");
            return Ok(Stmt::Continue(label));
        }
        if self.eat_keyword("switch") {
            return self.switch_stmt();
        }
        // labeled statement: ident ':' ...
        if matches!(self.peek(), TokenKind::Ident(_))
            && matches!(self.peek2(), TokenKind::Punct(":"))
        {
            let label = self.expect_ident()?;
            self.expect_punct(":")?;
            let inner = Box::new(self.statement()?);
            return Ok(Stmt::Label(label, inner));
        }
        let e = self.expression()?;
        self.eat_punct(";");
        Ok(Stmt::Expr(e))
    }

    fn switch_stmt(&mut self) -> Result<Stmt> {
        self.expect_punct("(")?;
        let value = self.expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let case_value = if self.eat_keyword("case") {
                Some(self.assign_expr()?)
            } else if self.eat_keyword("default") {
                None
            } else {
                bail!("expected `case` or `default` at line {}", self.line());
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            loop {
                match self.peek() {
                    TokenKind::Ident(name) if name == "case" || name == "default" => break,
                    TokenKind::Punct("}") => break,
                    _ => body.push(self.statement()?),
                }
            }
            cases.push(SwitchCase {
                value: case_value,
                body,
            });
        }
        Ok(Stmt::Switch(value, cases))
    }

    // ── expressions, lowest precedence first ────────────────────────────

    fn expression(&mut self) -> Result<Expr> {
        let mut e = self.assign_expr()?;
        while self.eat_punct(",") {
            let rhs = self.assign_expr()?;
            e = Expr::Seq(Box::new(e), Box::new(rhs));
        }
        Ok(e)
    }

    fn assign_expr(&mut self) -> Result<Expr> {
        let target = self.conditional()?;
        if self.eat_punct("=") {
            match target {
                Expr::Name(_) | Expr::Sub(..) => {}
                other => bail!("bad assignment target: {}", other),
            }
            let value = self.assign_expr()?;
            return Ok(Expr::Assign(Box::new(target), Box::new(value)));
        }
        Ok(target)
    }

    fn conditional(&mut self) -> Result<Expr> {
        let cond = self.binary(0)?;
        if self.eat_punct("?") {
            let then = self.assign_expr()?;
            self.expect_punct(":")?;
            let otherwise = self.assign_expr()?;
            return Ok(Expr::Conditional(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    /// Binary operators by precedence level, lowest first.
    fn binary(&mut self, level: usize) -> Result<Expr> {
        const LEVELS: &[&[(&str, BinOp)]] = &[
            &[("||", BinOp::LogOr)],
            &[("&&", BinOp::LogAnd)],
            &[("|", BinOp::Or)],
            &[("^", BinOp::Xor)],
            &[("&", BinOp::And)],
            &[("==", BinOp::Eq), ("!=", BinOp::Ne)],
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            &[(">>>", BinOp::ShrU), ("<<", BinOp::Shl), (">>", BinOp::Shr)],
            &[("+", BinOp::Add), ("-", BinOp::Sub)],
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(level + 1)?;
        'outer: loop {
            for (sym, op) in LEVELS[level] {
                if self.eat_punct(sym) {
                    let right = self.binary(level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        for (sym, op) in [
            ("+", UnOp::Plus),
            ("-", UnOp::Minus),
            ("~", UnOp::BitNot),
            ("!", UnOp::LogNot),
        ] {
            if self.eat_punct(sym) {
                let e = self.unary()?;
                return Ok(Expr::Unary(op, Box::new(e)));
            }
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut e = self.primary()?;
        loop {
            if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.assign_expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct(")")?;
                }
                e = Expr::Call(Box::new(e), args);
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                e = Expr::Sub(Box::new(e), Box::new(index));
            } else if self.eat_punct(".") {
                let field = self.expect_ident()?;
                e = Expr::Dot(Box::new(e), field);
            } else {
                return Ok(e);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        if self.eat_keyword("new") {
            let e = self.postfix()?;
            return Ok(Expr::New(Box::new(e)));
        }
        if self.eat_punct("(") {
            let e = self.expression()?;
            self.expect_punct(")")?;
            return Ok(e);
        }
        if self.eat_punct("[") {
            let mut items = Vec::new();
            if !self.eat_punct("]") {
                loop {
                    items.push(self.assign_expr()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
            }
            return Ok(Expr::Array(items));
        }
        if self.eat_punct("{") {
            let mut pairs = Vec::new();
            if !self.eat_punct("}") {
                loop {
                    let line = self.line();
                    let key = match self.advance() {
                        TokenKind::Ident(name) => name,
                        TokenKind::Str(name) => name,
                        other => bail!("bad export key at line {}: {:?}", line, other),
                    };
                    self.expect_punct(":")?;
                    let value = self.assign_expr()?;
                    pairs.push((key, value));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
            }
            return Ok(Expr::Object(pairs));
        }
        let line = self.line();
        match self.advance() {
            TokenKind::Num(n) => Ok(Expr::Num(n)),
            TokenKind::Ident(name) => Ok(Expr::Name(name)),
            other => bail!("unexpected token at line {}: {:?}", line, other),
        }
    }
}
