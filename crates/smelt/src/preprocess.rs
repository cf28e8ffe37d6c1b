//! Textual preparation of asm.js source before parsing.
//!
//! Three rewrites happen here, all working on the raw bytes:
//!
//! 1. emcc `--separate-asm` output wraps the module in
//!    `Module["asm"] = (function(...){ ... });`: strip the envelope so
//!    the buffer starts at `function`.
//! 2. The memory-growth helper is detected (it is the only place the
//!    token `true` can appear, since the asm.js subset has no booleans)
//!    and commented out; the caller learns about it via
//!    [`Preprocessor::memory_growth`].
//! 3. With debug info enabled, `//@line N "file"` comments become
//!    `emscripten_debuginfo(fileIndex,N);` calls, plus a fake import
//!    after the `"use asm"` directive so the rewritten module still
//!    parses as asm.js. The file table lives here and is handed to the
//!    translator later.

use anyhow::{bail, Result};
use rustc_hash::FxHashMap;

/// Marker emitted by emscripten between the module prologue and the
/// function definitions. The growth-helper scan is bounded to the
/// prologue as an optimization.
const START_FUNCS: &str = "// EMSCRIPTEN_START_FUNCS";

/// The growth helper is the only function that can contain this.
const GROWTH_SIGN: &str = "return true;";

pub const DEBUGINFO_INTRINSIC: &str = "emscripten_debuginfo";

/// Upper bound on the rewritten buffer: `1.25x + 100` of the input.
const SCALE_FACTOR: f64 = 1.25;
const ADD_FACTOR: usize = 100;

#[derive(Debug, Default)]
pub struct Preprocessor {
    pub debug_info: bool,
    pub memory_growth: bool,
    /// Distinct source file names, in order of first appearance.
    pub file_names: Vec<String>,
    file_indices: FxHashMap<String, u32>,
}

impl Preprocessor {
    pub fn new(debug_info: bool) -> Self {
        Preprocessor {
            debug_info,
            ..Default::default()
        }
    }

    /// Run all rewrites. The envelope strip and growth excision work in
    /// place; debug-info injection replaces the buffer with a larger one.
    pub fn process(&mut self, input: String) -> Result<String> {
        let mut text = strip_envelope(input);
        self.excise_growth_helper(&mut text)?;
        if self.debug_info {
            text = self.inject_debug_intrinsics(&text)?;
        }
        Ok(text)
    }

    fn file_index(&mut self, file: &str) -> u32 {
        if let Some(&index) = self.file_indices.get(file) {
            return index;
        }
        let index = self.file_names.len() as u32;
        self.file_names.push(file.to_string());
        self.file_indices.insert(file.to_string(), index);
        index
    }

    /// Find the growth helper in the module prologue and overwrite it
    /// with a block comment (the opening `fu` becomes `/*`, the closing
    /// brace is absorbed into `*/`).
    fn excise_growth_helper(&mut self, text: &mut String) -> Result<()> {
        let prologue_end = text.find(START_FUNCS).unwrap_or(text.len());
        let sign = match text[..prologue_end].find(GROWTH_SIGN) {
            Some(pos) => pos,
            None => return Ok(()),
        };
        self.memory_growth = true;

        // walk backwards: body brace, parameter list, function name,
        // `function` keyword
        let mut start = sign;
        for stop in [b'{', b'(', b' ', b'f'] {
            while start > 0 && text.as_bytes()[start] != stop {
                start -= 1;
            }
        }
        if !text[start..].starts_with("function ") {
            bail!("memory growth helper not in the expected shape");
        }
        let end = match text[sign..].find('}') {
            Some(off) => sign + off,
            None => bail!("memory growth helper has no closing brace"),
        };
        if end < start + 5 {
            bail!("memory growth helper is too short to excise");
        }
        // `fu` -> `/*`; the closing brace is absorbed into `*/`
        text.replace_range(start..start + 2, "/*");
        text.replace_range(end - 1..end + 1, "*/");
        Ok(())
    }

    /// Rewrite `//@line N "file"` comments into intrinsic calls and add
    /// the fake import after the directive.
    fn inject_debug_intrinsics(&mut self, input: &str) -> Result<String> {
        let upper_bound = (input.len() as f64 * SCALE_FACTOR) as usize + ADD_FACTOR;
        let mut out = Vec::with_capacity(upper_bound);
        let bytes = input.as_bytes();
        let mut i = 0;
        let mut seen_use_asm = false;
        while i < bytes.len() {
            if out.len() + ADD_FACTOR >= upper_bound {
                bail!("debug info rewrite overflowed its sized buffer");
            }
            // all markers are ASCII, so byte-wise scanning stays on
            // char boundaries as long as we only split at marker hits
            if !bytes[i].is_ascii() {
                out.push(bytes[i]);
                i += 1;
                continue;
            }
            let rest = &input[i..];
            if rest.starts_with("//@line") {
                // //@line 4 "tests/hello_world.c"
                let after = &rest[8..];
                let line_end = after
                    .find(' ')
                    .ok_or_else(|| anyhow::anyhow!("malformed //@line annotation"))?;
                let line = &after[..line_end];
                let file_start = after[line_end..]
                    .find('"')
                    .map(|p| line_end + p + 1)
                    .ok_or_else(|| anyhow::anyhow!("malformed //@line annotation"))?;
                let file_end = after[file_start..]
                    .find('"')
                    .map(|p| file_start + p)
                    .ok_or_else(|| anyhow::anyhow!("malformed //@line annotation"))?;
                let file = &after[file_start..file_end];
                let index = self.file_index(file);
                out.extend_from_slice(DEBUGINFO_INTRINSIC.as_bytes());
                out.push(b'(');
                out.extend_from_slice(index.to_string().as_bytes());
                out.push(b',');
                out.extend_from_slice(line.as_bytes());
                out.extend_from_slice(b");");
                i += 8 + file_end + 1;
            } else if !seen_use_asm && (rest.starts_with("asm'") || rest.starts_with("asm\"")) {
                // keep the tail of the directive, then add the fake import
                seen_use_asm = true;
                out.extend_from_slice(&bytes[i..i + 5]);
                i += 5;
                out.extend_from_slice(b"\n var ");
                out.extend_from_slice(DEBUGINFO_INTRINSIC.as_bytes());
                out.extend_from_slice(b" = env.");
                out.extend_from_slice(DEBUGINFO_INTRINSIC.as_bytes());
                out.push(b';');
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        if out.len() >= upper_bound {
            bail!("debug info rewrite overflowed its sized buffer");
        }
        Ok(String::from_utf8(out).expect("rewrite preserves utf-8"))
    }
}

/// Strip `Module["asm"] = (function(...){ ... });` down to the function
/// expression itself. Detected by the leading `M`; the trailing `);` (and
/// anything else after the last `}`) is cut.
fn strip_envelope(input: String) -> String {
    if !input.starts_with('M') {
        return input;
    }
    let start = match input.find('f') {
        Some(pos) => pos,
        None => return input,
    };
    let end = match input.rfind('}') {
        Some(pos) => pos,
        None => return input,
    };
    input[start..=end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = "function m(global, env, buffer) { \"use asm\"; return {}; }";

    #[test]
    fn clean_input_is_identity() {
        let mut pp = Preprocessor::new(false);
        let out = pp.process(PLAIN.to_string()).unwrap();
        assert_eq!(out, PLAIN);
        assert!(!pp.memory_growth);
    }

    #[test]
    fn preprocessing_is_idempotent_without_debug_info() {
        let mut pp = Preprocessor::new(false);
        let once = pp.process(PLAIN.to_string()).unwrap();
        let mut pp2 = Preprocessor::new(false);
        let twice = pp2.process(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strips_module_envelope() {
        let wrapped = format!("Module[\"asm\"] = ({});", PLAIN);
        let mut pp = Preprocessor::new(false);
        let out = pp.process(wrapped).unwrap();
        assert_eq!(out, PLAIN);
    }

    #[test]
    fn detects_and_excises_growth_helper() {
        let src = "function m(global, env, buffer) { \"use asm\"; \
                   function _emscripten_replace_memory(newBuffer) { HEAP8 = new Int8Array(newBuffer); return true; } \
                   // EMSCRIPTEN_START_FUNCS\n \
                   function f() {} return {}; }";
        let mut pp = Preprocessor::new(false);
        let out = pp.process(src.to_string()).unwrap();
        assert!(pp.memory_growth);
        // the helper is commented out in place: `fu` -> `/*`, and the
        // closing brace is absorbed into `*/`
        assert!(out.contains("/*nction _emscripten_replace_memory"));
        assert!(out.contains("*/"));
        // the marker itself survives
        assert!(out.contains(START_FUNCS));
        // the lexer now skips the whole helper
        let tokens = crate::parser::tokenize(&out).unwrap();
        assert!(!tokens
            .iter()
            .any(|t| matches!(&t.kind, crate::parser::TokenKind::Ident(s) if s == "true")));
    }

    #[test]
    fn growth_scan_is_bounded_to_prologue() {
        // `return true;` after the marker is not growth code (and in real
        // input cannot occur at all); the bounded scan must not see it
        let src = "function m() { \"use asm\"; // EMSCRIPTEN_START_FUNCS\n \
                   function g() { return true; } return {}; }";
        let mut pp = Preprocessor::new(false);
        let out = pp.process(src.to_string()).unwrap();
        assert!(!pp.memory_growth);
        assert!(out.contains("return true;"));
    }

    #[test]
    fn line_comments_become_intrinsics() {
        let src = "function m(global, env) { \"use asm\"; \
                   function f() { g(); //@line 4 \"src/a.c\"\n h(); //@line 9 \"src/b.c\"\n } \
                   return { f: f }; }";
        let mut pp = Preprocessor::new(true);
        let out = pp.process(src.to_string()).unwrap();
        assert!(out.contains("emscripten_debuginfo(0,4);"));
        assert!(out.contains("emscripten_debuginfo(1,9);"));
        assert!(out.contains("var emscripten_debuginfo = env.emscripten_debuginfo;"));
        assert_eq!(pp.file_names, vec!["src/a.c", "src/b.c"]);
    }

    #[test]
    fn repeated_files_share_an_index() {
        let src = "function m(global, env) { \"use asm\"; \
                   function f() { g(); //@line 1 \"a.c\"\n h(); //@line 2 \"a.c\"\n } \
                   return { f: f }; }";
        let mut pp = Preprocessor::new(true);
        let out = pp.process(src.to_string()).unwrap();
        assert!(out.contains("emscripten_debuginfo(0,1);"));
        assert!(out.contains("emscripten_debuginfo(0,2);"));
        assert_eq!(pp.file_names.len(), 1);
    }

    #[test]
    fn rewritten_module_still_parses() {
        let src = "function m(global, env) { \"use asm\"; \
                   function f() { return; //@line 3 \"a.c\"\n } \
                   return { f: f }; }";
        let mut pp = Preprocessor::new(true);
        let out = pp.process(src.to_string()).unwrap();
        crate::parser::parse_module(&out).expect("rewritten source must parse");
    }
}
