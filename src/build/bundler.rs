//! The seam between the compilation driver and whatever bundles the code.

use crate::build::output::OutputFileSystem;
use crate::entries::Entry;
use async_trait::async_trait;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// A module as reported by one compilation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStats {
    /// Bundler-assigned, path-like key of the module.
    pub identifier: String,
    /// Compiled source text.
    pub source: String,
}

/// Raw report of one compilation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleStats {
    pub hash: String,
    pub modules: Vec<ModuleStats>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Inputs every bundler receives.
#[derive(Debug, Clone)]
pub struct BundlerOptions {
    pub entries: Vec<Entry>,
    /// Development build.
    pub dev: bool,
    /// Node version the output targets.
    pub node_target: String,
    /// Optional bundler configuration file overriding the defaults.
    pub custom_config: Option<PathBuf>,
    /// Directory bundles are emitted into.
    pub target_dir: PathBuf,
}

/// Fatal bundler failures; no stats were produced.
#[derive(Debug, Error)]
pub enum BundlerError {
    #[error("failed to read bundler config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid bundler config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid bundler config: {0}")]
    InvalidConfig(String),
    #[error("failed to watch sources: {0}")]
    Watch(#[from] notify::Error),
    #[error("bundler task failed: {0}")]
    Task(String),
    #[error("bundler stopped before producing a result")]
    Closed,
}

/// Compiles entries, once or continuously.
#[async_trait]
pub trait Bundler: Send + Sync + 'static {
    /// Redirect emitted artifacts.
    fn set_output_file_system(&mut self, fs: Arc<dyn OutputFileSystem>);

    /// Run a single compilation cycle.
    async fn run(&self) -> Result<BundleStats, BundlerError>;

    /// Start continuous compilation. The first cycle is delivered as soon as
    /// it completes; later cycles follow source changes.
    fn watch(&self) -> Result<WatchStream, BundlerError>;
}

/// Cycles produced by a watching bundler.
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<Result<BundleStats, BundlerError>>,
    _guard: Option<Box<dyn Any + Send>>,
}

impl WatchStream {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<BundleStats, BundlerError>>) -> Self {
        Self { rx, _guard: None }
    }

    /// Keep `guard` (typically a file watcher) alive as long as the stream.
    pub fn with_guard(mut self, guard: impl Any + Send) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }

    /// Wait for the next cycle; `None` once the bundler has stopped.
    pub async fn next(&mut self) -> Option<Result<BundleStats, BundlerError>> {
        self.rx.recv().await
    }
}
