//! Tokenizer for the asm.js subset.
//!
//! Comments are skipped here; `//@line` annotations are gone by this
//! point (the preprocessor rewrites them into intrinsic calls before
//! parsing).

use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Num(f64),
    Ident(String),
    /// String literal contents (directives like `use asm`).
    Str(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

/// Multi-character punctuators, longest first so `>>>` wins over `>>`.
const PUNCTS: &[&str] = &[
    ">>>", "===", "!==", "<<", ">>", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", "{",
    "}", ";", ",", ".", ":", "?", "=", "+", "-", "*", "/", "%", "|", "&", "^", "~", "!", "<", ">",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line: u32 = 1;

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        // comments
        if c == b'/' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'/' {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            if bytes[i + 1] == b'*' {
                i += 2;
                loop {
                    if i + 1 >= bytes.len() {
                        bail!("unterminated block comment at line {}", line);
                    }
                    if bytes[i] == b'\n' {
                        line += 1;
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                continue;
            }
        }
        // numbers: decimal, hex, fraction, exponent, leading dot
        if c.is_ascii_digit() || (c == b'.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit())
        {
            let start = i;
            if c == b'0' && i + 1 < bytes.len() && (bytes[i + 1] | 0x20) == b'x' {
                i += 2;
                while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let text = &source[start + 2..i];
                let value = u64::from_str_radix(text, 16)
                    .map_err(|_| anyhow::anyhow!("bad hex literal at line {}", line))?;
                tokens.push(Token {
                    kind: TokenKind::Num(value as f64),
                    line,
                });
                continue;
            }
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'.' {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < bytes.len() && (bytes[i] | 0x20) == b'e' {
                i += 1;
                if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                    i += 1;
                }
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text = &source[start..i];
            let value: f64 = text
                .parse()
                .map_err(|_| anyhow::anyhow!("bad number `{}` at line {}", text, line))?;
            tokens.push(Token {
                kind: TokenKind::Num(value),
                line,
            });
            continue;
        }
        // identifiers
        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(source[start..i].to_string()),
                line,
            });
            continue;
        }
        // strings
        if c == b'"' || c == b'\'' {
            let quote = c;
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i] != quote {
                if bytes[i] == b'\n' {
                    bail!("unterminated string at line {}", line);
                }
                i += 1;
            }
            if i >= bytes.len() {
                bail!("unterminated string at line {}", line);
            }
            tokens.push(Token {
                kind: TokenKind::Str(source[start..i].to_string()),
                line,
            });
            i += 1;
            continue;
        }
        // punctuators
        let rest = &source[i..];
        let mut matched = None;
        for p in PUNCTS {
            if rest.starts_with(p) {
                matched = Some(*p);
                break;
            }
        }
        match matched {
            Some(p) => {
                tokens.push(Token {
                    kind: TokenKind::Punct(p),
                    line,
                });
                i += p.len();
            }
            None => bail!("unexpected character `{}` at line {}", c as char, line),
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("0 42 3.5 .25 1e3 0x10"),
            vec![
                TokenKind::Num(0.0),
                TokenKind::Num(42.0),
                TokenKind::Num(3.5),
                TokenKind::Num(0.25),
                TokenKind::Num(1000.0),
                TokenKind::Num(16.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn shift_operators_longest_match() {
        assert_eq!(
            kinds("a >>> b >> c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(">>>"),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(">>"),
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("x // trailing\n/* block\n */ y"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Ident("y".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn directive_string() {
        assert_eq!(
            kinds("\"use asm\";"),
            vec![
                TokenKind::Str("use asm".into()),
                TokenKind::Punct(";"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn line_tracking() {
        let tokens = tokenize("a\nb\n\nc").unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 4);
    }
}
