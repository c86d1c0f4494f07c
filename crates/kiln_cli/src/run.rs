//! `kiln run`: validate and execute a compiled file.

use kiln_config::KilnConfig;
use kiln_loader::Loader;

use crate::pipeline::build_engine;
use crate::RunArgs;

/// Runs `kiln run`.
///
/// By default the file is loaded as a module through the loader, so it can
/// `require` its neighbours. With `--expr` it is run as a plain script and
/// the value of its last expression is printed.
pub fn run(args: &RunArgs, config: &KilnConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let loader = Loader::new(build_engine(config)?);

    if args.expr {
        let bytes = std::fs::read(&args.file)
            .map_err(|e| format!("failed to read {}: {e}", args.file.display()))?;
        let script = loader.load(&bytes, &args.file.display().to_string())?;
        let value = loader.engine().run_in_this_context(&script)?;
        println!("{}", value.inspect());
    } else {
        loader.require(&args.file)?;
    }
    Ok(0)
}
