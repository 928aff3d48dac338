//! Dev server configuration.

use crate::build::DEFAULT_NODE_TARGET;
use crate::entries::{discover_entries, Entry, EntryError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration or resolving entries.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error(transparent)]
    Entries(#[from] EntryError),
}

/// Configuration for the dev server and the build command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Prefix every function route is served under.
    pub base_path: String,
    /// Entry file or directory of entries.
    pub entry: PathBuf,
    /// Only entries whose file matches are kept.
    pub include: Option<String>,
    /// Entries whose file matches are dropped.
    pub exclude: Option<String>,
    /// Node version bundles target.
    pub node_target: String,
    /// Custom bundler configuration file.
    pub bundler_config: Option<PathBuf>,
    /// Output directory for production builds.
    pub target_dir: PathBuf,
    /// Rebuild on source change.
    pub watch: bool,
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Whether to answer `/_health`.
    pub enable_health: bool,
    /// `process.env` for every function.
    pub env: BTreeMap<String, String>,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            base_path: "/".to_string(),
            entry: PathBuf::from("functions"),
            include: None,
            exclude: None,
            node_target: DEFAULT_NODE_TARGET.to_string(),
            bundler_config: None,
            target_dir: PathBuf::from("lambda"),
            watch: true,
            max_body_size: 6 * 1024 * 1024, // 6MB
            enable_health: true,
            env: BTreeMap::new(),
        }
    }
}

impl DevConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file; missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Set the host address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the base path.
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Set the entry file or directory.
    pub fn entry(mut self, entry: impl Into<PathBuf>) -> Self {
        self.entry = entry.into();
        self
    }

    /// Enable or disable rebuilding on change.
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Discover entries under `entry`, applying the include/exclude filters.
    pub fn entries(&self) -> Result<Vec<Entry>, ConfigError> {
        let include = compile_pattern(self.include.as_deref())?;
        let exclude = compile_pattern(self.exclude.as_deref())?;
        Ok(discover_entries(&self.entry, include.as_ref(), exclude.as_ref())?)
    }
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>, ConfigError> {
    pattern
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_and_builders() {
        let config = DevConfig::new()
            .host("127.0.0.1")
            .port(3000)
            .base_path("/api")
            .env("STAGE", "dev");

        assert_eq!(config.bind_addr(), "127.0.0.1:3000");
        assert_eq!(config.base_path, "/api");
        assert_eq!(config.env["STAGE"], "dev");
        assert!(config.watch);
        assert_eq!(config.node_target, DEFAULT_NODE_TARGET);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = DevConfig::from_toml(
            r#"
            port = 8000
            base_path = "/.netlify/functions"

            [env]
            GREETING = "hi"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.base_path, "/.netlify/functions");
        assert_eq!(config.env["GREETING"], "hi");
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(DevConfig::from_toml("prot = 1").is_err());
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = DevConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "port = \"x\"").unwrap();
        assert!(matches!(
            DevConfig::from_file(&bad).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn test_entries_with_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "").unwrap();
        fs::write(dir.path().join("b.js"), "").unwrap();

        let config = DevConfig::new().entry(dir.path());
        assert_eq!(config.entries().unwrap().len(), 2);

        let mut filtered = config.clone();
        filtered.exclude = Some(r"b\.js$".to_string());
        let entries = filtered.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request_path, "/a");

        let mut invalid = config;
        invalid.include = Some("(".to_string());
        assert!(matches!(
            invalid.entries().unwrap_err(),
            ConfigError::Pattern { .. }
        ));
    }
}
