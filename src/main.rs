use std::io::BufWriter;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::Context as _;
use bffpp::{BfInterpreter, Importer, Program, Registry, builtins};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "bffpp", version)]
#[command(about = "Run a Brainfuck program with subroutines, imports and host calls")]
struct Args {
    /// Path to the program source
    source: PathBuf,

    /// Number of cells on the tape
    #[arg(long = "tape-size", default_value = "30000")]
    tape_size: NonZeroUsize,

    /// Do not register the built-in host functions
    #[arg(long = "no-builtins")]
    no_builtins: bool,
}

/// `RUST_LOG` overrides the default `warn` filter. Logs go to stderr so they
/// never mix with program output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut importer = Importer::new();
    let source = importer
        .load(&args.source)
        .context("source read failed")?;
    let program = Program::parse(&source).context("program load failed")?;

    let mut registry = Registry::new();
    if !args.no_builtins {
        builtins::register_all(&mut registry);
    }
    info!(
        files = importer.loaded().count(),
        externals = registry.len(),
        "starting"
    );

    let stdin = std::io::stdin();
    let stdin = stdin.lock();
    let stdout = BufWriter::new(std::io::stdout().lock());
    let interpreter = BfInterpreter::from_program(program, &registry, stdin, stdout)
        .with_tape_size(args.tape_size);
    interpreter.execute().context("execution failure")?;
    Ok(())
}
