//! Dev server runtime: configuration and server assembly.

mod config;
mod server;

pub use config::{ConfigError, DevConfig};
pub use server::{build_bundles, DevServer, ServeError};
