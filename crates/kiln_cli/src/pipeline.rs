//! Shared helpers for CLI commands.
//!
//! Contains configuration discovery, engine identity resolution, and the
//! engine construction every command goes through.

use std::env;
use std::path::{Path, PathBuf};

use kiln_config::{load_config, load_config_file, KilnConfig, CONFIG_FILE};
use kiln_engine::identity::DEFAULT_BUILD;
use kiln_engine::{BuildIdentity, Engine, EngineFlags, ENGINE_LINE};
use kiln_runtime::RUN_AS_HOST_ENV;

use crate::GlobalArgs;

/// Overrides the engine build name.
pub const ENGINE_BUILD_ENV: &str = "KILN_ENGINE_BUILD";

/// Overrides the engine line.
pub const ENGINE_LINE_ENV: &str = "KILN_ENGINE_LINE";

/// Whether this process was launched as an alternate runtime by a parent.
pub fn run_as_host() -> bool {
    env::var(RUN_AS_HOST_ENV).is_ok_and(|v| v == "1")
}

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).is_file() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Loads the configuration for this invocation.
///
/// `--config` names a file explicitly. Otherwise the nearest `kiln.toml`
/// is used if there is one. A bare host never reads configuration.
pub fn load_settings(global: &GlobalArgs) -> Result<KilnConfig, Box<dyn std::error::Error>> {
    if run_as_host() {
        return Ok(KilnConfig::default());
    }
    if let Some(ref path) = global.config {
        return Ok(load_config_file(path)?);
    }
    match find_project_root(&env::current_dir()?) {
        Some(root) => Ok(load_config(&root)?),
        None => Ok(KilnConfig::default()),
    }
}

/// The engine identity: environment first, then `[engine]`, then built-in.
pub fn resolve_identity(config: &KilnConfig) -> BuildIdentity {
    let pick = |var: &str, configured: &Option<String>, fallback: &str| {
        env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| configured.clone())
            .unwrap_or_else(|| fallback.to_string())
    };
    BuildIdentity::new(
        pick(ENGINE_LINE_ENV, &config.engine.line, ENGINE_LINE),
        pick(ENGINE_BUILD_ENV, &config.engine.build, DEFAULT_BUILD),
    )
}

/// The process-wide engine flags requested by the configuration.
pub fn engine_flags(config: &KilnConfig) -> EngineFlags {
    EngineFlags {
        lazy_compilation: config.engine.lazy_compilation,
        flush_bytecode: config.engine.flush_bytecode,
    }
}

/// Sets the process-wide flags and builds the engine.
pub fn build_engine(config: &KilnConfig) -> Result<Engine, Box<dyn std::error::Error>> {
    kiln_engine::initialize(engine_flags(config))?;
    Ok(Engine::new(resolve_identity(config)).with_format(config.engine.format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::load_config_from_str;

    #[test]
    fn finds_config_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "").unwrap();
        let nested = dir.path().join("src").join("lib");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn identity_from_config() {
        let config = load_config_from_str("[engine]\nline = \"2.0\"\nbuild = \"custom\"\n").unwrap();
        let identity = resolve_identity(&config);
        // Environment overrides are exercised by the integration tests.
        if env::var(ENGINE_LINE_ENV).is_err() {
            assert_eq!(identity.line, "2.0");
        }
        if env::var(ENGINE_BUILD_ENV).is_err() {
            assert_eq!(identity.build, "custom");
        }
    }

    #[test]
    fn default_flags_keep_bodies() {
        assert_eq!(engine_flags(&KilnConfig::default()), EngineFlags::code_cache());
    }
}
