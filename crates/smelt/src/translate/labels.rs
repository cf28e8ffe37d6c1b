//! Scoped label uniquification.
//!
//! Nested asm.js labels may reuse source names; WASM labels inside one
//! function must be unique. Each push maps a source name to a fresh
//! unique name (a `$N` suffix after the first use) and each pop restores
//! the previous mapping, so `sourceToUnique` always sees the innermost
//! binding.

use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct NameMapper {
    counts: FxHashMap<String, u32>,
    scopes: FxHashMap<String, Vec<String>>,
}

impl NameMapper {
    pub fn new() -> Self {
        NameMapper::default()
    }

    /// Enter a scope for `source`; returns the unique label to emit.
    pub fn push(&mut self, source: &str) -> String {
        let count = self.counts.entry(source.to_string()).or_insert(0);
        let unique = if *count == 0 {
            source.to_string()
        } else {
            format!("{}${}", source, *count)
        };
        *count += 1;
        self.scopes
            .entry(source.to_string())
            .or_default()
            .push(unique.clone());
        unique
    }

    /// Leave the innermost scope for `source`.
    pub fn pop(&mut self, source: &str) {
        let stack = self
            .scopes
            .get_mut(source)
            .expect("popping a label that was never pushed");
        stack.pop().expect("label scope underflow");
    }

    /// The unique name currently bound to `source`, if any.
    pub fn to_unique(&self, source: &str) -> Option<&str> {
        self.scopes
            .get(source)
            .and_then(|stack| stack.last())
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_keeps_the_source_name() {
        let mut mapper = NameMapper::new();
        assert_eq!(mapper.push("while-out"), "while-out");
        assert_eq!(mapper.to_unique("while-out"), Some("while-out"));
    }

    #[test]
    fn reuse_gets_a_suffix_and_restores_on_pop() {
        let mut mapper = NameMapper::new();
        assert_eq!(mapper.push("L"), "L");
        assert_eq!(mapper.push("L"), "L$1");
        assert_eq!(mapper.to_unique("L"), Some("L$1"));
        mapper.pop("L");
        assert_eq!(mapper.to_unique("L"), Some("L"));
        mapper.pop("L");
        assert_eq!(mapper.to_unique("L"), None);
    }

    #[test]
    fn suffixes_never_repeat_within_a_function() {
        let mut mapper = NameMapper::new();
        assert_eq!(mapper.push("x"), "x");
        mapper.pop("x");
        // a sibling scope must not reuse the plain name
        assert_eq!(mapper.push("x"), "x$1");
        mapper.pop("x");
        assert_eq!(mapper.push("x"), "x$2");
    }
}
