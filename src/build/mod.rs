//! Compilation of function entries into bundles.

pub mod bundler;
pub mod driver;
pub mod fs_bundler;
pub mod output;

pub use bundler::{BundleStats, Bundler, BundlerError, BundlerOptions, ModuleStats, WatchStream};
pub use driver::{
    run, run_with, start, start_with, BuildError, BuildOptions, BuildSession, Compilation,
    CompiledModule, CycleCallback,
    DEFAULT_NODE_TARGET,
};
pub use fs_bundler::{BundlerConfig, FsBundler};
pub use output::{DiskFs, MemoryFs, OutputFileSystem};
