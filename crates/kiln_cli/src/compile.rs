//! `kiln compile`: source files or stdin to cache blobs.

use kiln_cache::CompileOptions;
use kiln_common::SourceUnit;
use kiln_config::{resolve_runtime, KilnConfig};
use kiln_engine::Engine;
use kiln_runtime::{compile_file, compile_for_target, CompileFileParams, RuntimeTarget};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::pipeline::build_engine;
use crate::{CompileArgs, GlobalArgs};

/// Runs `kiln compile`.
///
/// With `--stdin`, or with no files, the source is read from stdin and the
/// blob is written to stdout. This is the mode a parent uses when it drives
/// this binary as an alternate runtime.
pub fn run(
    args: &CompileArgs,
    global: &GlobalArgs,
    config: &KilnConfig,
) -> Result<i32, Box<dyn std::error::Error>> {
    let engine = build_engine(config)?;
    let target = select_target(args, config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if args.stdin || args.files.is_empty() {
        runtime.block_on(compile_stdin(&engine, args, config, &target))?;
        return Ok(0);
    }
    if args.output.is_some() && args.files.len() > 1 {
        return Err("--output requires exactly one input file".into());
    }

    let mut failures = 0usize;
    for file in &args.files {
        let params = CompileFileParams {
            filename: file.clone(),
            output: args.output.clone(),
            compile_as_module: config.compile.module && !args.no_module,
            strip_shebang: config.compile.strip_shebang,
            compress: args.compress || config.compile.compress,
            target: target.clone(),
            extension: config.compile.extension.clone(),
        };
        match runtime.block_on(compile_file(&engine, &params)) {
            Ok(output) => {
                if !global.quiet {
                    println!("{} -> {}", file.display(), output.display());
                }
            }
            Err(e) => {
                eprintln!("error: {}: {e}", file.display());
                failures += 1;
            }
        }
    }

    if failures > 0 {
        if !global.quiet {
            eprintln!("{failures} of {} file(s) failed", args.files.len());
        }
        return Ok(1);
    }
    Ok(0)
}

/// Picks the engine that produces blobs for this invocation.
pub fn select_target(
    args: &CompileArgs,
    config: &KilnConfig,
) -> Result<RuntimeTarget, Box<dyn std::error::Error>> {
    Ok(match (&args.runtime, &args.runtime_path) {
        (Some(name), _) => resolve_runtime(config, name)?,
        (None, Some(path)) => RuntimeTarget::alternate(path),
        (None, None) => RuntimeTarget::Current,
    })
}

async fn compile_stdin(
    engine: &Engine,
    args: &CompileArgs,
    config: &KilnConfig,
    target: &RuntimeTarget,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut text = String::new();
    tokio::io::stdin().read_to_string(&mut text).await?;

    let unit = SourceUnit::new(text)
        .with_module(config.compile.module && !args.no_module)
        .with_strip_shebang(config.compile.strip_shebang);
    let options = CompileOptions {
        compress: args.compress || config.compile.compress,
    };
    let blob = compile_for_target(engine, &unit, target, options).await?;

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&blob).await?;
    stdout.flush().await?;
    Ok(())
}
