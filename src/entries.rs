//! Function entries and their discovery on disk.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const ENTRY_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts"];

/// One logical function: a source file and the request path it answers on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Source file, without leading `./` components.
    pub file: String,
    /// Request path relative to the server base path, always starting with `/`.
    pub request_path: String,
}

impl Entry {
    /// Create an entry, normalizing both fields.
    pub fn new(file: impl AsRef<Path>, request_path: impl AsRef<str>) -> Self {
        let request_path = request_path.as_ref();
        let request_path = if request_path.starts_with('/') {
            request_path.to_string()
        } else {
            format!("/{}", request_path)
        };

        Self {
            file: clean_path(file.as_ref()),
            request_path,
        }
    }

    /// The file stem, used to name emitted bundles.
    pub fn name(&self) -> String {
        let path = Path::new(&self.file);
        let stem = if path.file_stem().and_then(|s| s.to_str()) == Some("index") {
            path.parent().and_then(|p| p.file_name())
        } else {
            path.file_stem()
        };
        stem.and_then(|s| s.to_str())
            .unwrap_or("bundle")
            .to_string()
    }
}

/// Errors raised while discovering entries.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("failed to read entry path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no function entries found in {0}")]
    Empty(PathBuf),
    #[error("request path {request_path} is claimed by both {first} and {second}")]
    DuplicateRoute {
        request_path: String,
        first: String,
        second: String,
    },
}

/// Find the entries under `path`.
///
/// A file is a single entry. In a directory every direct child with a
/// function extension is an entry, as is every child directory holding an
/// `index.js`. `include` and `exclude` filter on the entry file path.
pub fn discover_entries(
    path: &Path,
    include: Option<&Regex>,
    exclude: Option<&Regex>,
) -> Result<Vec<Entry>, EntryError> {
    let metadata = std::fs::metadata(path).map_err(|source| EntryError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries = if metadata.is_file() {
        vec![entry_for_file(path)]
    } else {
        scan_directory(path)?
    };

    entries.retain(|entry| {
        include.map_or(true, |re| re.is_match(&entry.file))
            && !exclude.map_or(false, |re| re.is_match(&entry.file))
    });

    if entries.is_empty() {
        return Err(EntryError::Empty(path.to_path_buf()));
    }

    entries.sort_by(|a, b| a.request_path.cmp(&b.request_path));
    validate_entries(&entries)?;
    Ok(entries)
}

/// Reject duplicate request paths and warn about ambiguous module matching.
///
/// Compiled modules are matched to entries by substring containment of the
/// entry file, so an entry file contained in another entry's file may bind to
/// the wrong module.
pub fn validate_entries(entries: &[Entry]) -> Result<(), EntryError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for (idx, entry) in entries.iter().enumerate() {
        if !seen.insert(&entry.request_path) {
            let first = entries[..idx]
                .iter()
                .find(|e| e.request_path == entry.request_path)
                .map(|e| e.file.clone())
                .unwrap_or_default();
            return Err(EntryError::DuplicateRoute {
                request_path: entry.request_path.clone(),
                first,
                second: entry.file.clone(),
            });
        }
    }

    for entry in entries {
        for other in entries {
            if entry.file != other.file && other.file.contains(&entry.file) {
                warn!(
                    entry = %entry.file,
                    other = %other.file,
                    "Entry file is a substring of another entry; compiled modules may be matched ambiguously"
                );
            }
        }
    }

    Ok(())
}

fn scan_directory(dir: &Path) -> Result<Vec<Entry>, EntryError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| EntryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries = Vec::new();
    for item in read_dir {
        let item = item.map_err(|source| EntryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = item.path();

        if path.is_dir() {
            let index = path.join("index.js");
            if index.is_file() {
                let name = item.file_name().to_string_lossy().to_string();
                entries.push(Entry::new(&index, name));
            }
        } else if has_entry_extension(&path) {
            entries.push(entry_for_file(&path));
        }
    }

    Ok(entries)
}

fn entry_for_file(path: &Path) -> Entry {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Entry::new(path, stem)
}

fn has_entry_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ENTRY_EXTENSIONS.contains(&ext))
}

fn clean_path(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect::<PathBuf>()
        .to_string_lossy()
        .to_string()
}
