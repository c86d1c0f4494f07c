//! Runtime resolution: turning a named `[runtimes.*]` entry into a target.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use kiln_runtime::{AlternateRuntime, RuntimeTarget};

/// Resolves a named runtime from the configuration.
///
/// The path is taken as written. Whether it exists is checked when a compile
/// request runs, not here.
pub fn resolve_runtime(config: &KilnConfig, name: &str) -> Result<RuntimeTarget, ConfigError> {
    let runtime = config
        .runtimes
        .get(name)
        .ok_or_else(|| ConfigError::UnknownRuntime(name.to_string()))?;

    let mut alternate = AlternateRuntime::new(&runtime.path).with_args(runtime.args.iter().cloned());
    for (key, value) in &runtime.env {
        alternate = alternate.with_env(key, value);
    }
    Ok(RuntimeTarget::Alternate(alternate))
}
