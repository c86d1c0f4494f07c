//! Compiling a source file to a compiled file next to it.

use std::path::{Path, PathBuf};

use kiln_cache::CompileOptions;
use kiln_common::{Compile, KilnError, KilnResult, SourceUnit};
use tracing::info;

use crate::pipeline::compile_for_target;
use crate::target::RuntimeTarget;

/// Extension of compiled files.
pub const DEFAULT_EXTENSION: &str = "xxc";

/// Parameters for [`compile_file`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileFileParams {
    /// The source file.
    pub filename: PathBuf,
    /// Where to write the blob. Defaults to the source path with its
    /// extension replaced by [`extension`](Self::extension).
    pub output: Option<PathBuf>,
    /// Wrap the source in the module envelope.
    pub compile_as_module: bool,
    /// Remove a leading `#!` line.
    pub strip_shebang: bool,
    /// Gzip the blob.
    pub compress: bool,
    /// The engine that produces the blob.
    pub target: RuntimeTarget,
    /// Output extension, without the dot.
    pub extension: String,
}

impl CompileFileParams {
    /// Parameters with defaults: module, shebang stripped, uncompressed,
    /// current engine, `.xxc`.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            output: None,
            compile_as_module: true,
            strip_shebang: true,
            compress: false,
            target: RuntimeTarget::Current,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    /// The path the blob is written to.
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => self.filename.with_extension(&self.extension),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> KilnError {
    KilnError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads, compiles, and writes one file. Returns the output path.
pub async fn compile_file<E: Compile>(engine: &E, params: &CompileFileParams) -> KilnResult<PathBuf> {
    let output = params.output_path();
    if output == params.filename {
        return Err(io_error(
            &output,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "output path would overwrite the source file",
            ),
        ));
    }
    let text = tokio::fs::read_to_string(&params.filename)
        .await
        .map_err(|e| io_error(&params.filename, e))?;

    let unit = SourceUnit::new(text)
        .with_module(params.compile_as_module)
        .with_strip_shebang(params.strip_shebang);
    let options = CompileOptions {
        compress: params.compress,
    };
    let blob = compile_for_target(engine, &unit, &params.target, options).await?;

    tokio::fs::write(&output, &blob)
        .await
        .map_err(|e| io_error(&output, e))?;
    info!(
        input = %params.filename.display(),
        output = %output.display(),
        bytes = blob.len(),
        "wrote compiled file"
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_cache::CacheCodec;
    use kiln_common::ErrorKind;
    use kiln_engine::{BuildIdentity, Engine, EngineFlags, Value};

    fn engine() -> Engine {
        Engine::with_flags(BuildIdentity::current(), EngineFlags::code_cache())
    }

    #[test]
    fn default_output_replaces_extension() {
        let params = CompileFileParams::new("src/app.js");
        assert_eq!(params.output_path(), PathBuf::from("src/app.xxc"));
        let bare = CompileFileParams::new("tool");
        assert_eq!(bare.output_path(), PathBuf::from("tool.xxc"));
    }

    #[tokio::test]
    async fn writes_a_loadable_module() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("answer.js");
        std::fs::write(&src, "#!/usr/bin/env kiln\nmodule.exports = 6 * 7 + 1;\n").unwrap();

        let engine = engine();
        let out = compile_file(&engine, &CompileFileParams::new(&src))
            .await
            .unwrap();
        assert_eq!(out, dir.path().join("answer.xxc"));

        let bytes = std::fs::read(&out).unwrap();
        let script = CacheCodec::new(&engine)
            .validate(&bytes, out.to_str().unwrap())
            .unwrap();
        let wrapper = engine.run_in_this_context(&script).unwrap();
        let module = Value::object(kiln_engine::Object::new());
        engine
            .call(&wrapper, Value::Undefined, &[Value::Undefined, Value::Undefined, module.clone()])
            .unwrap();
        let exports = module.as_object().unwrap().borrow().get("exports").cloned();
        assert_eq!(exports.and_then(|v| v.as_number()), Some(43.0));
    }

    #[tokio::test]
    async fn explicit_output_and_compression() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.js");
        std::fs::write(&src, "1 + 1").unwrap();
        let mut params = CompileFileParams::new(&src);
        params.output = Some(dir.path().join("out.bin"));
        params.compress = true;
        params.compile_as_module = false;

        let out = compile_file(&engine(), &params).await.unwrap();
        let bytes = std::fs::read(out).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn missing_input_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let params = CompileFileParams::new(dir.path().join("nope.js"));
        let err = compile_file(&engine(), &params).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(!dir.path().join("nope.xxc").exists());
    }

    #[tokio::test]
    async fn refuses_to_overwrite_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("already.xxc");
        std::fs::write(&src, "1").unwrap();
        let err = compile_file(&engine(), &CompileFileParams::new(&src))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(std::fs::read_to_string(&src).unwrap(), "1");
    }
}
