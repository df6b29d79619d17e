//! `schemec` CLI: `build` a source file to C (and optionally
//! link an executable), `dump` any pipeline stage for inspection, or
//! `run` a program end-to-end.

use std::path::PathBuf;
use std::process::{self, Command};

use clap::{Parser, Subcommand, ValueEnum};

use schemec::config::CompilerConfig;
use schemec::errors::{CompileError, CompileResult};
use schemec::{closure, codegen, contract, freevars, sexpr, translate};

#[derive(Parser)]
#[command(name = "schemec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CPS-based compiler for a Scheme-family language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile a source file to C, optionally linking an executable with `cc`.
    Build {
        input: PathBuf,
        /// Where to write the generated C source. Defaults to `<input>.c`.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Link an executable with `cc` after emitting C.
        #[arg(long)]
        link: Option<PathBuf>,
        /// Emit a `main` that drives the trampoline. Implied
        /// when `--link` is given.
        #[arg(long)]
        emit_main: bool,
    },
    /// Print one stage of the compilation pipeline for a source file.
    Dump {
        input: PathBuf,
        #[arg(value_enum)]
        stage: Stage,
    },
    /// Build, link, and run a program, printing what it writes to stdout.
    Run { input: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Stage {
    /// The reader's raw S-expression forms.
    Ast,
    /// The CPS graph immediately after translation.
    Cps,
    /// Variable-information facts over the translated graph.
    Varinfo,
    /// The CPS graph after contraction reaches its fixed point.
    Contracted,
    /// Free-variable sets computed over the closure-converted graph.
    Freevars,
    /// The graph after closure conversion.
    Closure,
    /// The final emitted C source.
    C,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cmd: Cmd) -> CompileResult<()> {
    match cmd {
        Cmd::Build { input, output, link, emit_main } => build(&input, output, link, emit_main),
        Cmd::Dump { input, stage } => dump(&input, stage),
        Cmd::Run { input } => run_program(&input),
    }
}

fn read_source(input: &PathBuf) -> CompileResult<String> {
    std::fs::read_to_string(input).map_err(CompileError::Io)
}

fn build(input: &PathBuf, output: Option<PathBuf>, link: Option<PathBuf>, emit_main: bool) -> CompileResult<()> {
    let src = read_source(input)?;
    let config = CompilerConfig::new().with_emit_main(emit_main || link.is_some());
    let c_src = schemec::compile(&src, &config)?;

    let c_path = output.unwrap_or_else(|| input.with_extension("c"));
    std::fs::write(&c_path, &c_src)?;
    tracing::info!(path = %c_path.display(), "wrote C source");

    if let Some(exe_path) = link {
        link_executable(&c_path, &exe_path)?;
        tracing::info!(path = %exe_path.display(), "linked executable");
    }
    Ok(())
}

/// Writes the embedded `schemec-runtime` staticlib to a temp file and
/// invokes `cc` against the emitted C and that archive — the emitted C
/// links against the runtime ABI.
#[cfg(feature = "schemec-runtime")]
fn link_executable(c_path: &std::path::Path, exe_path: &PathBuf) -> CompileResult<()> {
    let runtime_a = std::env::temp_dir().join(format!("libschemec_runtime-{}.a", process::id()));
    std::fs::write(&runtime_a, schemec::RUNTIME_STATICLIB)?;

    let status = Command::new("cc")
        .arg(c_path)
        .arg(&runtime_a)
        .arg("-o")
        .arg(exe_path)
        .status()
        .map_err(CompileError::Io)?;
    let _ = std::fs::remove_file(&runtime_a);

    if !status.success() {
        return Err(CompileError::Translate(format!("cc exited with status {status}")));
    }
    Ok(())
}

#[cfg(not(feature = "schemec-runtime"))]
fn link_executable(_c_path: &std::path::Path, _exe_path: &PathBuf) -> CompileResult<()> {
    Err(CompileError::Translate("linking requires the schemec-runtime feature".into()))
}

fn run_program(input: &PathBuf) -> CompileResult<()> {
    let exe_path = std::env::temp_dir().join(format!("schemec-run-{}", process::id()));
    build(input, None, Some(exe_path.clone()), true)?;
    let status = Command::new(&exe_path).status().map_err(CompileError::Io)?;
    let _ = std::fs::remove_file(&exe_path);
    if !status.success() {
        return Err(CompileError::Translate(format!("program exited with status {status}")));
    }
    Ok(())
}

fn dump(input: &PathBuf, stage: Stage) -> CompileResult<()> {
    let src = read_source(input)?;
    let datums = sexpr::read_all(&src).map_err(|e| CompileError::Read(e.0))?;
    if matches!(stage, Stage::Ast) {
        println!("{datums:#?}");
        return Ok(());
    }

    sexpr::intern_symbol_names(&datums);
    let mut graph = translate::translate_program(&datums)?;
    if matches!(stage, Stage::Cps) {
        println!("{graph:#?}");
        return Ok(());
    }
    if matches!(stage, Stage::Varinfo) {
        let analysis = schemec::varinfo::analyze(&graph, graph.entry);
        println!("{:#?}", analysis.global);
        return Ok(());
    }

    contract::optimize(&mut graph);
    if matches!(stage, Stage::Contracted) {
        println!("{graph:#?}");
        return Ok(());
    }

    closure::convert(&mut graph);
    if matches!(stage, Stage::Closure) {
        println!("{graph:#?}");
        return Ok(());
    }
    if matches!(stage, Stage::Freevars) {
        let fv = freevars::analyze(&graph, graph.entry);
        let mut labels: Vec<_> = graph.labels().collect();
        labels.sort_by_key(|l| l.0);
        for label in labels {
            println!("{label}: {:?}", fv.of(label));
        }
        return Ok(());
    }

    let config = CompilerConfig::new().with_emit_main(true);
    let c_src = codegen::render(&graph, &config)?;
    println!("{c_src}");
    Ok(())
}
