//! Built-in bundler: reads entry files, optionally pipes them through an
//! external compile command, and watches their directories for changes.

use crate::build::bundler::{BundleStats, Bundler, BundlerError, BundlerOptions, ModuleStats, WatchStream};
use crate::build::output::{DiskFs, OutputFileSystem};
use crate::entries::Entry;
use async_trait::async_trait;
use notify::{EventKind, RecursiveMode, Watcher};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Delay between the first change event and the rebuild it triggers.
pub const DEFAULT_AGGREGATE_TIMEOUT: Duration = Duration::from_millis(300);

const HASH_LENGTH: usize = 20;

/// Custom bundler configuration, read from a TOML file.
///
/// ```toml
/// command = ["esbuild", "{file}", "--bundle", "--platform=node", "--target=node{node}"]
/// banner = "/* built by lambda-dev */"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundlerConfig {
    /// Compile command; its stdout becomes the module source. `{file}`,
    /// `{node}` and `{target}` are substituted in every argument.
    pub command: Vec<String>,
    /// Text prepended to every module.
    pub banner: Option<String>,
}

impl BundlerConfig {
    pub fn load(path: &Path) -> Result<Self, BundlerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| BundlerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| BundlerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;

        if config
            .command
            .first()
            .map_or(false, |program| program.trim().is_empty())
        {
            return Err(BundlerError::InvalidConfig(
                "command program must not be empty".to_string(),
            ));
        }

        Ok(config)
    }
}

/// File-system bundler.
pub struct FsBundler {
    options: Arc<BundlerOptions>,
    config: Arc<BundlerConfig>,
    output: Arc<dyn OutputFileSystem>,
    aggregate_timeout: Duration,
}

impl FsBundler {
    /// Create a bundler writing to disk, loading the custom config if set.
    pub fn new(options: BundlerOptions) -> Result<Self, BundlerError> {
        let config = match &options.custom_config {
            Some(path) => BundlerConfig::load(path)?,
            None => BundlerConfig::default(),
        };

        Ok(Self {
            options: Arc::new(options),
            config: Arc::new(config),
            output: Arc::new(DiskFs),
            aggregate_timeout: DEFAULT_AGGREGATE_TIMEOUT,
        })
    }

    /// Set how long change events are collected before a rebuild.
    pub fn aggregate_timeout(mut self, timeout: Duration) -> Self {
        self.aggregate_timeout = timeout;
        self
    }

    fn compile_task(&self) -> impl std::future::Future<Output = Result<BundleStats, BundlerError>> {
        compile_blocking(
            self.options.clone(),
            self.config.clone(),
            self.output.clone(),
        )
    }
}

#[async_trait]
impl Bundler for FsBundler {
    fn set_output_file_system(&mut self, fs: Arc<dyn OutputFileSystem>) {
        self.output = fs;
    }

    async fn run(&self) -> Result<BundleStats, BundlerError> {
        self.compile_task().await
    }

    fn watch(&self) -> Result<WatchStream, BundlerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<()>();

        let target_dir = absolute(&self.options.target_dir);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if is_source_change(&event, &target_dir) => {
                    let _ = change_tx.send(());
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "File watcher error"),
            }
        })?;

        for dir in watch_dirs(&self.options.entries) {
            debug!(dir = %dir.display(), "Watching directory");
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        }

        let options = self.options.clone();
        let config = self.config.clone();
        let output = self.output.clone();
        let aggregate_timeout = self.aggregate_timeout;

        tokio::spawn(async move {
            loop {
                let report =
                    compile_blocking(options.clone(), config.clone(), output.clone()).await;
                if tx.send(report).is_err() {
                    break;
                }

                if change_rx.recv().await.is_none() {
                    break;
                }
                tokio::time::sleep(aggregate_timeout).await;
                while change_rx.try_recv().is_ok() {}
            }
            debug!("Watch loop stopped");
        });

        Ok(WatchStream::new(rx).with_guard(watcher))
    }
}

async fn compile_blocking(
    options: Arc<BundlerOptions>,
    config: Arc<BundlerConfig>,
    output: Arc<dyn OutputFileSystem>,
) -> Result<BundleStats, BundlerError> {
    tokio::task::spawn_blocking(move || compile(&options, &config, output.as_ref()))
        .await
        .map_err(|err| BundlerError::Task(err.to_string()))
}

/// Run one compilation cycle over every entry.
pub fn compile(
    options: &BundlerOptions,
    config: &BundlerConfig,
    output: &dyn OutputFileSystem,
) -> BundleStats {
    let mut stats = BundleStats::default();

    for entry in &options.entries {
        let source = match compile_entry(entry, options, config) {
            Ok(source) => source,
            Err(message) => {
                stats.errors.push(message);
                continue;
            }
        };

        let source = match &config.banner {
            Some(banner) => format!("{}\n{}", banner, source),
            None => source,
        };

        if source.trim().is_empty() {
            stats
                .warnings
                .push(format!("{}: module is empty", entry.file));
        }

        let out_path = options.target_dir.join(format!("{}.js", entry.name()));
        if let Err(err) = output.write_file(&out_path, source.as_bytes()) {
            stats.errors.push(format!(
                "{}: failed to emit {}: {}",
                entry.file,
                out_path.display(),
                err
            ));
        }

        stats.modules.push(ModuleStats {
            identifier: module_identifier(entry),
            source,
        });
    }

    stats.hash = hash_modules(&stats.modules);
    stats
}

fn compile_entry(
    entry: &Entry,
    options: &BundlerOptions,
    config: &BundlerConfig,
) -> Result<String, String> {
    let Some((program, args)) = config.command.split_first() else {
        if is_typescript(&entry.file) {
            return Err(format!(
                "{}: TypeScript entry requires a compile command in the bundler config",
                entry.file
            ));
        }
        return std::fs::read_to_string(&entry.file).map_err(|err| {
            format!(
                "Module not found: Error: Can't resolve '{}': {}",
                entry.file, err
            )
        });
    };

    let target = options.target_dir.display().to_string();
    let substitute = |arg: &str| {
        arg.replace("{file}", &entry.file)
            .replace("{node}", &options.node_target)
            .replace("{target}", &target)
    };
    let args: Vec<String> = args.iter().map(|arg| substitute(arg)).collect();

    let output = Command::new(substitute(program))
        .args(&args)
        .output()
        .map_err(|err| format!("{}: failed to run `{}`: {}", entry.file, program, err))?;

    if !output.status.success() {
        return Err(format!(
            "{}: `{} {}` failed with {}: {}",
            entry.file,
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn is_typescript(file: &str) -> bool {
    Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| matches!(ext, "ts" | "mts" | "cts"))
}

/// Absolute path of the entry file, joined lexically so the identifier
/// always contains `entry.file` verbatim. `..` and symlinks are kept.
fn module_identifier(entry: &Entry) -> String {
    let file = Path::new(&entry.file);
    if file.is_absolute() {
        return entry.file.clone();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(file).to_string_lossy().to_string())
        .unwrap_or_else(|_| entry.file.clone())
}

fn hash_modules(modules: &[ModuleStats]) -> String {
    let mut hasher = Sha256::new();
    for module in modules {
        hasher.update(module.identifier.as_bytes());
        hasher.update([0u8]);
        hasher.update(module.source.as_bytes());
        hasher.update([0u8]);
    }
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(HASH_LENGTH);
    hash
}

fn watch_dirs(entries: &[Entry]) -> BTreeSet<PathBuf> {
    entries
        .iter()
        .map(|entry| match Path::new(&entry.file).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        })
        .collect()
}

fn is_source_change(event: &notify::Event, target_dir: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| !path.starts_with(target_dir))
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
