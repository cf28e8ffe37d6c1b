use anyhow::{Context, Result};
use clap::Parser;
use smelt::{translate, TranslateOptions, TrapMode};
use std::fs;
use std::path::PathBuf;

/// smelt — asm.js to WebAssembly translator.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input asm.js module (.js)
    input: PathBuf,

    /// Output WebAssembly binary (.wasm)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// How trapping arithmetic is handled
    #[arg(long, default_value = "allow", value_parser = ["allow", "clamp", "js"])]
    trap_mode: String,

    /// Rewrite //@line annotations into source-location debug info
    #[arg(long)]
    debug_info: bool,

    /// Run the optimization passes after translation
    #[arg(long)]
    opts: bool,

    /// Enable the wasm-only intrinsics (i64 sentinels, raw load/store)
    #[arg(long)]
    wasm_only: bool,

    /// Diagnostic logging; disables cross-function validation in passes
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    eprintln!(
        "smelt: translating {} (trap-mode={})",
        cli.input.display(),
        cli.trap_mode,
    );

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;

    let options = TranslateOptions {
        trap_mode: match cli.trap_mode.as_str() {
            "clamp" => TrapMode::Clamp,
            "js" => TrapMode::Js,
            _ => TrapMode::Allow,
        },
        debug_info: cli.debug_info,
        run_optimization_passes: cli.opts,
        wasm_only: cli.wasm_only,
        debug: cli.debug,
    };

    let wasm = translate(source, &options).context("translation failed")?;

    let output_path = cli
        .output
        .unwrap_or_else(|| cli.input.with_extension("wasm"));
    fs::write(&output_path, &wasm)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    eprintln!(
        "smelt: wrote {} ({} bytes)",
        output_path.display(),
        wasm.len()
    );
    Ok(())
}
