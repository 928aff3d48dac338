//! Compilation driver: runs a bundler once or in watch mode and turns each
//! raw cycle report into a [`Compilation`] or a [`BuildError`].

use crate::build::bundler::{BundleStats, Bundler, BundlerError, BundlerOptions};
use crate::build::fs_bundler::FsBundler;
use crate::build::output::MemoryFs;
use crate::entries::Entry;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default Node version compiled bundles target.
pub const DEFAULT_NODE_TARGET: &str = "18";

/// Callback invoked for every successful compilation cycle.
pub type CycleCallback = Box<dyn FnMut(&Compilation) + Send>;

/// A compiled module associated with the cycle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledModule {
    pub identifier: String,
    pub source: String,
}

/// Result of a successful compilation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compilation {
    pub entries: Vec<Entry>,
    pub hash: String,
    pub modules: Vec<CompiledModule>,
    pub warnings: Vec<String>,
}

impl Compilation {
    /// The module compiled from `entry`: the first whose identifier contains
    /// the entry file.
    pub fn module_for(&self, entry: &Entry) -> Option<&CompiledModule> {
        self.modules
            .iter()
            .find(|module| module.identifier.contains(&entry.file))
    }
}

/// Why a cycle (or the whole build) failed.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The bundler failed before producing any stats.
    #[error("bundler error: {source}")]
    Bundler {
        entries: Vec<Entry>,
        #[source]
        source: BundlerError,
    },
    /// The cycle completed with compilation errors.
    #[error("compilation failed with {} error(s)", errors.len())]
    Compilation {
        entries: Vec<Entry>,
        errors: Vec<String>,
        hash: Option<String>,
    },
}

impl BuildError {
    pub fn entries(&self) -> &[Entry] {
        match self {
            BuildError::Bundler { entries, .. } => entries,
            BuildError::Compilation { entries, .. } => entries,
        }
    }
}

/// Build configuration.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub entries: Vec<Entry>,
    /// Development build: artifacts stay in memory.
    pub dev: bool,
    pub node_target: String,
    /// Custom bundler configuration file.
    pub custom_config: Option<PathBuf>,
    pub target_dir: PathBuf,
    /// Keep compiling as sources change.
    pub watch: bool,
}

impl BuildOptions {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            dev: false,
            node_target: DEFAULT_NODE_TARGET.to_string(),
            custom_config: None,
            target_dir: PathBuf::from("lambda"),
            watch: false,
        }
    }

    pub fn dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn node_target(mut self, node_target: impl Into<String>) -> Self {
        self.node_target = node_target.into();
        self
    }

    pub fn custom_config(mut self, path: Option<PathBuf>) -> Self {
        self.custom_config = path;
        self
    }

    pub fn target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = dir.into();
        self
    }

    fn bundler_options(&self) -> BundlerOptions {
        BundlerOptions {
            entries: self.entries.clone(),
            dev: self.dev,
            node_target: self.node_target.clone(),
            custom_config: self.custom_config.clone(),
            target_dir: self.target_dir.clone(),
        }
    }
}

/// Outcome of the first cycle, plus the task delivering later ones in watch
/// mode.
pub struct BuildSession {
    pub result: Result<Compilation, BuildError>,
    pub watch: Option<JoinHandle<()>>,
}

impl BuildSession {
    /// Treat a failed first cycle as fatal: stop watching and return the
    /// error. On success the watch task keeps running detached.
    pub fn abort_on_error(self) -> Result<Compilation, BuildError> {
        if self.result.is_err() {
            if let Some(watch) = self.watch {
                debug!("Stopping compilation watch after failed initial build");
                watch.abort();
            }
        }
        self.result
    }
}

/// Build with the built-in file-system bundler.
pub async fn run(
    options: BuildOptions,
    on_cycle: Option<CycleCallback>,
) -> Result<Compilation, BuildError> {
    start(options, on_cycle).await.result
}

/// Build with any bundler.
///
/// In one-shot mode the result of the single cycle is returned. In watch mode
/// the first cycle settles the returned result; every later cycle is handled
/// in a background task and only reaches `on_cycle` when it succeeds. The
/// watch keeps running even when the first cycle fails.
/// `on_cycle` is also called for a successful first cycle, before this
/// function returns.
pub async fn run_with<B: Bundler>(
    bundler: B,
    options: BuildOptions,
    on_cycle: Option<CycleCallback>,
) -> Result<Compilation, BuildError> {
    start_with(bundler, options, on_cycle).await.result
}

/// Like [`run`], keeping a handle on the watch task.
pub async fn start(options: BuildOptions, on_cycle: Option<CycleCallback>) -> BuildSession {
    let bundler = match FsBundler::new(options.bundler_options()) {
        Ok(bundler) => bundler,
        Err(source) => {
            error!(error = %source, "Build error");
            return BuildSession {
                result: Err(BuildError::Bundler {
                    entries: options.entries,
                    source,
                }),
                watch: None,
            };
        }
    };

    start_with(bundler, options, on_cycle).await
}

/// Like [`run_with`], keeping a handle on the watch task.
pub async fn start_with<B: Bundler>(
    mut bundler: B,
    options: BuildOptions,
    mut on_cycle: Option<CycleCallback>,
) -> BuildSession {
    if options.dev {
        bundler.set_output_file_system(Arc::new(MemoryFs::new()));
    }

    let entries = options.entries;

    if !options.watch {
        let report = bundler.run().await;
        return BuildSession {
            result: settle(&entries, report, on_cycle.as_mut()),
            watch: None,
        };
    }

    let mut stream = match bundler.watch() {
        Ok(stream) => stream,
        Err(source) => {
            error!(error = %source, "Build error");
            return BuildSession {
                result: Err(BuildError::Bundler { entries, source }),
                watch: None,
            };
        }
    };

    let first = stream.next().await.unwrap_or(Err(BundlerError::Closed));
    let result = settle(&entries, first, on_cycle.as_mut());

    let watch = tokio::spawn(async move {
        while let Some(report) = stream.next().await {
            // failures are logged by settle; the last good state keeps serving
            let _ = settle(&entries, report, on_cycle.as_mut());
        }
        debug!("Compilation watch ended");
    });

    BuildSession {
        result,
        watch: Some(watch),
    }
}

/// Normalize one cycle: log errors and warnings, then deliver or reject.
fn settle(
    entries: &[Entry],
    report: Result<BundleStats, BundlerError>,
    on_cycle: Option<&mut CycleCallback>,
) -> Result<Compilation, BuildError> {
    let stats = match report {
        Ok(stats) => stats,
        Err(source) => {
            error!(error = %source, "Bundler error");
            return Err(BuildError::Bundler {
                entries: entries.to_vec(),
                source,
            });
        }
    };

    let BundleStats {
        hash,
        modules,
        warnings,
        errors,
    } = stats;

    for err in &errors {
        error!("Compilation error: {}", err);
    }
    for warning in &warnings {
        warn!("Compilation warning: {}", warning);
    }

    if !errors.is_empty() {
        return Err(BuildError::Compilation {
            entries: entries.to_vec(),
            errors,
            hash: Some(hash),
        });
    }

    info!("Built {}", hash);

    let compilation = Compilation {
        entries: entries.to_vec(),
        hash,
        modules: modules
            .into_iter()
            .map(|module| CompiledModule {
                identifier: module.identifier,
                source: module.source,
            })
            .collect(),
        warnings,
    };

    if let Some(callback) = on_cycle {
        callback(&compilation);
    }

    Ok(compilation)
}
