//! Locating and loading the server configuration file.

use std::path::{Path, PathBuf};

use toolclient::ServersConfig;

use crate::error::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TOOLWIRE_CONFIG";

/// Files tried, in order, in the current directory.
const DEFAULT_FILES: [&str; 2] = ["toolwire.toml", "toolwire.json"];

/// Pick the config file: explicit flag, then `$TOOLWIRE_CONFIG`, then the
/// first default file present in `dir`.
pub fn resolve_path(explicit: Option<&Path>, env: Option<PathBuf>, dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path);
    }

    DEFAULT_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| Error::ConfigNotFound {
            searched: DEFAULT_FILES.iter().map(|name| dir.join(name)).collect(),
        })
}

/// Resolve and load the configuration for this invocation.
pub fn load(explicit: Option<&Path>) -> Result<ServersConfig> {
    let cwd = std::env::current_dir()?;
    let path = resolve_path(explicit, std::env::var_os(CONFIG_ENV).map(PathBuf::from), &cwd)?;
    tracing::debug!(path = %path.display(), "loading server config");
    Ok(ServersConfig::load(&path)?)
}
