//! Kiln CLI: the command-line interface for the bytecode-cache precompiler.
//!
//! Provides `kiln compile` for turning sources into cache blobs (in process
//! or through an alternate runtime), `kiln run` for validating and executing
//! compiled files, and `kiln version` for reporting the engine identity.

#![warn(missing_docs)]

mod compile;
mod pipeline;
mod run;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use kiln_config::{KilnConfig, LogLevel};
use tracing::level_filters::LevelFilter;

/// Kiln: precompile scripts to engine code caches.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln bytecode-cache precompiler")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile sources to cache blobs.
    Compile(CompileArgs),
    /// Validate and run a compiled file.
    Run(RunArgs),
    /// Print the engine identity.
    Version,
}

/// Arguments for the `kiln compile` subcommand.
#[derive(Parser, Debug)]
pub struct CompileArgs {
    /// Source files. Reads stdin when empty.
    pub files: Vec<PathBuf>,

    /// Gzip the blobs.
    #[arg(long)]
    pub compress: bool,

    /// Compile as a plain script instead of wrapping in the module envelope.
    #[arg(long)]
    pub no_module: bool,

    /// Named runtime from `kiln.toml` to compile with.
    #[arg(long, conflicts_with = "runtime_path")]
    pub runtime: Option<String>,

    /// Path of an alternate runtime executable to compile with.
    #[arg(long)]
    pub runtime_path: Option<PathBuf>,

    /// Output path (single input file only).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Read source from stdin and write the blob to stdout.
    #[arg(long, conflicts_with = "files")]
    pub stdin: bool,
}

/// Arguments for the `kiln run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// The compiled file.
    pub file: PathBuf,

    /// Run as a script and print the last expression value.
    #[arg(long)]
    pub expr: bool,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };

    let result = pipeline::load_settings(&global).and_then(|config| {
        init_logging(&global, &config);
        match cli.command {
            Command::Compile(ref args) => compile::run(args, &global, &config),
            Command::Run(ref args) => run::run(args, &config),
            Command::Version => print_version(&config),
        }
    });

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// The log filter for this invocation. Flags win over `[log] level`.
fn log_filter(global: &GlobalArgs, config: &KilnConfig) -> LevelFilter {
    if global.quiet {
        return LevelFilter::ERROR;
    }
    if global.verbose {
        return LevelFilter::DEBUG;
    }
    match config.log.level {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

/// Installs the stderr subscriber. Stdout carries blob bytes in stdin mode.
fn init_logging(global: &GlobalArgs, config: &KilnConfig) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(log_filter(global, config))
        .with_target(false)
        .init();
}

fn print_version(config: &KilnConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let identity = pipeline::resolve_identity(config);
    println!("kiln {}", env!("CARGO_PKG_VERSION"));
    println!("engine line: {}", identity.line);
    println!("engine build: {}", identity.build);
    println!("cache format: {}", config.engine.format);
    Ok(0)
}
