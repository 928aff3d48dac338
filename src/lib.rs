//! # lambda-dev - Local Emulator for Serverless HTTP Functions
//!
//! lambda-dev compiles function entry points into bundles and, in
//! development mode, serves them over HTTP. Every request is dispatched to
//! the most recently compiled source of its function, loaded as a fresh
//! module in a throwaway JavaScript runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  cycles   ┌────────────────────┐  swap   ┌─────────────┐
//! │   Bundler    │ ────────▶ │ Compilation Driver │ ──────▶ │ Route Table │
//! │ (watch/once) │           └────────────────────┘         │   Manager   │
//! └──────────────┘                                          └─────────────┘
//!                                                                  │
//!                                      registers once              ▼
//! ┌──────────────┐  request  ┌────────────────────┐  lookup  ┌─────────────┐
//! │    Router    │ ────────▶ │     Dispatcher     │ ───────▶ │ Route Table │
//! └──────────────┘           └────────────────────┘          └─────────────┘
//!                                      │
//!                                      ▼
//!                          ┌──────────────────────┐
//!                          │  Invocation Bridge   │  event, {}, callback
//!                          │  (fresh JsRuntime)   │ ─────────────────────▶ handler
//!                          └──────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lambda_dev::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = DevConfig::new().entry("functions").base_path("/api").port(9000);
//!     let entries = config.entries()?;
//!
//!     // Initial build; routes are live once this returns.
//!     let server = DevServer::create(config, entries).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Function Contract
//!
//! A function is a CommonJS module exporting `handler(event, context, callback)`.
//! It may answer by calling `callback(err, response)` or by returning a
//! promise; whichever happens first produces the HTTP response:
//!
//! ```js
//! exports.handler = async (event) => ({
//!   statusCode: 200,
//!   headers: { "content-type": "text/plain" },
//!   body: `hello ${event.queryStringParameters.name}`,
//! });
//! ```

pub mod build;
pub mod control_plane;
pub mod entries;
pub mod function;
pub mod http;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::build::{BuildError, BuildOptions, Bundler, Compilation};
    pub use crate::control_plane::{RouteTable, RouteTableManager};
    pub use crate::entries::{discover_entries, Entry};
    pub use crate::function::{create_handler, DenoRuntime, LambdaError, LambdaRuntime};
    pub use crate::http::{HttpRequest, HttpResponse, RequestHandler, RouteRegistrar, Router};
    pub use crate::runtime::{build_bundles, DevConfig, DevServer, ServeError};
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use entries::Entry;
pub use runtime::{DevConfig, DevServer};
