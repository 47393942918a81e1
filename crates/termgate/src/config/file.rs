//! File-based configuration loading.

use std::path::{Path, PathBuf};

use super::GatewayConfig;
use crate::error::{GatewayError, Result};

/// File name searched for when no path is given.
pub const DEFAULT_FILE_NAME: &str = "termgate.toml";

/// Configuration file loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Search paths.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader with no search paths.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loader searching the working directory, then `/etc/termgate`.
    #[must_use]
    pub fn standard() -> Self {
        Self::new().add_path(".").add_path("/etc/termgate")
    }

    /// Add a search path.
    #[must_use]
    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Find a config file, trying `name` and then `name.toml` in each search
    /// path.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            let path = search_path.join(name);
            if path.is_file() {
                return Some(path);
            }

            let path = search_path.join(format!("{name}.toml"));
            if path.is_file() {
                return Some(path);
            }
        }

        None
    }

    /// Load a config file.
    pub fn load(&self, path: &Path) -> Result<GatewayConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("cannot read {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("{}: {e}", path.display())))
    }

    /// Load the default file if one is found, otherwise return defaults.
    pub fn load_default(&self) -> Result<GatewayConfig> {
        match self.find(DEFAULT_FILE_NAME) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                self.load(&path)
            }
            None => Ok(GatewayConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_file_in_search_path() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("termgate.toml"), "").unwrap();

        let loader = ConfigLoader::new().add_path(first.path()).add_path(second.path());
        assert_eq!(
            loader.find("termgate"),
            Some(second.path().join("termgate.toml"))
        );
        assert_eq!(loader.find("other"), None);
    }

    #[test]
    fn load_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[session]\ncommand = \"/bin/cat\"\n").unwrap();

        let config = ConfigLoader::new().load(&path).unwrap();
        assert_eq!(config.session.command, "/bin/cat");
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[session\n").unwrap();

        let err = ConfigLoader::new().load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn missing_default_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new().add_path(dir.path()).load_default().unwrap();
        assert_eq!(config, GatewayConfig::default());
    }
}
