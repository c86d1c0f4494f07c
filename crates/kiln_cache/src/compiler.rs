//! The compiler adapter: source unit in, cache blob out.

use kiln_common::{Compile, KilnError, KilnResult, SourceUnit};
use tracing::debug;

use crate::compress::compress;

/// Options applied after the engine has produced a blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Gzip the blob for transport.
    pub compress: bool,
}

/// Applies shebang stripping and module wrapping as the unit requests.
pub fn prepare_source<E: Compile>(engine: &E, unit: &SourceUnit) -> String {
    let text = unit.prepared_text();
    if unit.wrap_as_module {
        engine.wrap_module(text)
    } else {
        text.to_string()
    }
}

/// Compiles `unit` with the in-process engine.
///
/// Performs no filesystem I/O. A failure from the engine's compile primitive
/// is passed through as `CompileError` without interpretation.
pub fn compile<E: Compile>(
    engine: &E,
    unit: &SourceUnit,
    options: CompileOptions,
) -> KilnResult<Vec<u8>> {
    let source = prepare_source(engine, unit);
    let blob = engine.produce_cache(&source).map_err(KilnError::compile)?;
    debug!(
        bytes = blob.len(),
        module = unit.wrap_as_module,
        compress = options.compress,
        "produced cache blob"
    );
    if options.compress {
        compress(&blob)
    } else {
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::ErrorKind;
    use kiln_engine::{BuildIdentity, Engine, EngineFlags};

    fn engine() -> Engine {
        Engine::with_flags(BuildIdentity::current(), EngineFlags::code_cache())
    }

    #[test]
    fn module_units_are_wrapped() {
        let engine = engine();
        let prepared = prepare_source(&engine, &SourceUnit::new("#!/usr/bin/env kiln\nexports.x = 1"));
        assert!(prepared.starts_with("(function (exports, require, module"));
        assert!(prepared.contains("\nexports.x = 1"));
        assert!(!prepared.contains("#!"));
    }

    #[test]
    fn script_units_are_verbatim() {
        let engine = engine();
        let unit = SourceUnit::script("43;");
        assert_eq!(prepare_source(&engine, &unit), "43;");
    }

    #[test]
    fn syntax_errors_are_compile_errors() {
        let err = compile(&engine(), &SourceUnit::script("let = ;"), CompileOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CompileError);
        assert!(err.to_string().contains("SyntaxError"));
    }

    #[test]
    fn compressed_output_is_gzip() {
        let blob = compile(
            &engine(),
            &SourceUnit::script("1 + 1"),
            CompileOptions { compress: true },
        )
        .unwrap();
        assert_eq!(&blob[..2], &[0x1f, 0x8b]);
        assert!(!crate::recognize(&blob));
    }

    #[test]
    fn output_is_deterministic() {
        let engine = engine();
        let unit = SourceUnit::script("let a = [1, 2]; a.join('+')");
        let a = compile(&engine, &unit, CompileOptions::default()).unwrap();
        let b = compile(&engine, &unit, CompileOptions::default()).unwrap();
        assert_eq!(a, b);
    }
}
