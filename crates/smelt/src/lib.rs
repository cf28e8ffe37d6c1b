//! smelt — asm.js to WebAssembly translator.
//!
//! This crate ingests an emscripten-produced asm.js module as text and
//! emits the equivalent WebAssembly binary: a textual preprocessor, a
//! parser for the asm.js subset, a two-pass AST translator into a WASM
//! expression tree, a deferred call-finalization pass, and binary
//! encoding.

pub mod ast;
pub mod codegen;
pub mod ir;
pub mod parser;
pub mod passes;
pub mod preprocess;
pub mod translate;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use preprocess::Preprocessor;
pub use translate::{TranslateOptions, TrapMode};

/// Translate asm.js source text to a validated WebAssembly binary.
///
/// This is the main entry point for the translation pipeline: it
/// preprocesses the text, parses it, builds and finalizes the WASM
/// module, encodes it, and validates the result.
///
/// # Example
/// ```no_run
/// use smelt::{translate, TranslateOptions};
///
/// let source = std::fs::read_to_string("module.asm.js").unwrap();
/// let wasm = translate(source, &TranslateOptions::default()).unwrap();
/// std::fs::write("module.wasm", wasm).unwrap();
/// ```
pub fn translate(source: String, options: &TranslateOptions) -> Result<Vec<u8>> {
    let module = translate_to_ir(source, options)?;
    encode_and_validate(&module)
}

/// Run the pipeline up to (and including) module assembly, returning
/// the IR instead of bytes. Useful for inspecting translation results.
pub fn translate_to_ir(source: String, options: &TranslateOptions) -> Result<ir::Module> {
    let mut preprocessor = Preprocessor::new(options.debug_info);
    let text = preprocessor.process(source).context("preprocessing failed")?;
    let ast = parser::parse_module(&text).context("failed to parse asm.js module")?;
    let file_names = std::mem::take(&mut preprocessor.file_names);
    translate::build_module(&ast, options, preprocessor.memory_growth, file_names)
        .context("translation failed")
}

/// Encode an IR module and check it against the validator; a failure
/// here is a translator bug, not an input error.
pub fn encode_and_validate(module: &ir::Module) -> Result<Vec<u8>> {
    let bytes = codegen::encode(module).context("failed to encode module")?;
    wasmparser::Validator::new()
        .validate_all(&bytes)
        .context("generated module failed validation")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_module_translates_and_validates() {
        let source =
            "function m(global, env, buffer) { \"use asm\"; function f() {} return { f: f }; }";
        let wasm = translate(source.to_string(), &TranslateOptions::default()).unwrap();
        assert_eq!(&wasm[0..4], b"\0asm");
    }

    #[test]
    fn unparsable_input_is_an_error() {
        let err = translate("not asm.js".to_string(), &TranslateOptions::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("parse"));
    }
}
