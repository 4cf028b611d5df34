//! Configuration file resolution
//!
//! Resolves the pipeline configuration file following the priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. OS-dependent default location (fallback)
//!
//! The file itself is TOML; parsing into the typed configuration struct
//! lives in the ETL crate, this module only locates and reads it.

use crate::{Error, Result};
use std::path::PathBuf;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "ORRERY_CONFIG";

/// Resolve the configuration file path
///
/// Returns `None` when no candidate exists; the pipeline then runs on
/// compiled defaults.
pub fn resolve_config_path(cli_arg: Option<&str>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: OS-dependent default
    let default = default_config_path();
    if default.exists() {
        Some(default)
    } else {
        None
    }
}

/// Default configuration file location for the platform
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("orrery").join("orrery.toml"))
        .unwrap_or_else(|| PathBuf::from("./orrery.toml"))
}

/// Read and parse a TOML configuration file into a typed struct
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read config failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config failed ({}): {}", path.display(), e)))
}

/// Default data directory (holds the SQLite database)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("orrery"))
        .unwrap_or_else(|| PathBuf::from("./orrery_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(serde::Deserialize)]
    struct Probe {
        name: String,
    }

    #[test]
    fn test_cli_arg_wins() {
        let path = resolve_config_path(Some("/tmp/explicit.toml"));
        assert_eq!(path, Some(PathBuf::from("/tmp/explicit.toml")));
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"orrery\"").unwrap();
        let probe: Probe = load_toml(file.path()).unwrap();
        assert_eq!(probe.name, "orrery");
    }

    #[test]
    fn test_load_toml_missing_file() {
        let result: Result<Probe> = load_toml(std::path::Path::new("/nonexistent/orrery.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
