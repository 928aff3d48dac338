//! Where bundles are written.
//!
//! Development builds keep artifacts in memory; only the module sources
//! reported with each cycle matter to the dev server.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Destination for emitted bundle files.
pub trait OutputFileSystem: Send + Sync {
    /// Write `contents` to `path`, creating parent directories as needed.
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// Writes bundles to disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFs;

impl OutputFileSystem for DiskFs {
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)
    }
}

/// Keeps bundles in memory.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<HashMap<PathBuf, Bytes>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a written file.
    pub fn read_file(&self, path: &Path) -> Option<Bytes> {
        self.files.read().get(path).cloned()
    }

    /// Paths of every stored file, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl OutputFileSystem for MemoryFs {
    fn write_file(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.files
            .write()
            .insert(path.to_path_buf(), Bytes::copy_from_slice(contents));
        Ok(())
    }
}
