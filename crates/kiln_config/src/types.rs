//! Configuration types deserialized from `kiln.toml`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use kiln_common::FormatVersion;
use serde::Deserialize;

/// The top-level configuration parsed from `kiln.toml`.
///
/// Every table is optional; an empty file yields the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct KilnConfig {
    /// Defaults for `kiln compile`.
    #[serde(default)]
    pub compile: CompileConfig,
    /// Engine identity and flag overrides.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Named alternate runtimes.
    #[serde(default)]
    pub runtimes: BTreeMap<String, RuntimeConfig>,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// Compile defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Gzip blobs.
    pub compress: bool,
    /// Wrap sources in the module envelope.
    pub module: bool,
    /// Remove a leading `#!` line.
    pub strip_shebang: bool,
    /// Output extension, without the dot.
    pub extension: String,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            compress: false,
            module: true,
            strip_shebang: true,
            extension: "xxc".to_string(),
        }
    }
}

/// Engine settings. Unset identity fields fall back to the built-in identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine line override.
    pub line: Option<String>,
    /// Build name override.
    pub build: Option<String>,
    /// Header layout of produced blobs.
    pub format: FormatVersion,
    /// Defer function compilation. Blobs produced this way cannot run
    /// their functions once restored.
    pub lazy_compilation: bool,
    /// Drop compiled function bodies after each call.
    pub flush_bytecode: bool,
}

/// A named alternate runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the runtime executable.
    pub path: PathBuf,
    /// Arguments placed before the fixed compile arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Logging settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// The maximum level logged.
    pub level: LogLevel,
}

/// A log verbosity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages.
    #[default]
    Info,
    /// Debugging detail.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// The lowercase name, as accepted in `kiln.toml`.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
