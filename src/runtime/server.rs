//! Dev server: compiles the entries in watch mode and serves them.

use crate::build::{self, BuildError, BuildOptions, Bundler, Compilation};
use crate::control_plane::{RouteTable, RouteTableManager};
use crate::entries::Entry;
use crate::function::{DenoRuntime, LambdaRuntime};
use crate::http::{BodyError, HttpRequest, HttpResponse, Router};
use crate::runtime::{ConfigError, DevConfig};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Fatal errors that keep the server from reaching or keeping its serving
/// state.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("invalid bind address {addr}: {source}")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[from] std::io::Error),
}

/// Local emulator server.
///
/// Construction runs the initial build; once it returns, every entry's route
/// is registered and answers with the freshly compiled function. Later
/// rebuilds swap handlers in place.
pub struct DevServer {
    config: Arc<DevConfig>,
    router: Router,
    table: RouteTable,
    compilation: Compilation,
}

impl DevServer {
    /// Build `entries` with the file-system bundler and run functions in
    /// deno_core.
    pub async fn create(config: DevConfig, entries: Vec<Entry>) -> Result<Self, ServeError> {
        let runtime = Arc::new(DenoRuntime::new().with_env(config.env.clone()));
        Self::create_with_runtime(config, entries, runtime).await
    }

    /// Like [`DevServer::create`] with a custom function runtime.
    pub async fn create_with_runtime(
        config: DevConfig,
        entries: Vec<Entry>,
        runtime: Arc<dyn LambdaRuntime>,
    ) -> Result<Self, ServeError> {
        let (router, manager) = route_manager(&config, runtime);
        let table = manager.table();
        let options = dev_build_options(&config, entries);

        // a failed initial build is fatal, so its watch must not outlive it
        let compilation = build::start(options, Some(manager.into_callback()))
            .await
            .abort_on_error()?;
        Ok(Self::assemble(config, router, table, compilation))
    }

    /// Like [`DevServer::create_with_runtime`] with a custom bundler.
    pub async fn create_with_bundler<B: Bundler>(
        config: DevConfig,
        entries: Vec<Entry>,
        bundler: B,
        runtime: Arc<dyn LambdaRuntime>,
    ) -> Result<Self, ServeError> {
        let (router, manager) = route_manager(&config, runtime);
        let table = manager.table();
        let options = dev_build_options(&config, entries);

        let compilation = build::start_with(bundler, options, Some(manager.into_callback()))
            .await
            .abort_on_error()?;
        Ok(Self::assemble(config, router, table, compilation))
    }

    fn assemble(
        config: DevConfig,
        router: Router,
        table: RouteTable,
        compilation: Compilation,
    ) -> Self {
        Self {
            config: Arc::new(config),
            router,
            table,
            compilation,
        }
    }

    pub fn config(&self) -> &DevConfig {
        &self.config
    }

    /// Routes registered with the HTTP layer.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Handlers currently behind the registered routes.
    pub fn route_table(&self) -> RouteTable {
        self.table.clone()
    }

    /// The initial compilation.
    pub fn compilation(&self) -> &Compilation {
        &self.compilation
    }

    /// Bind the configured address and serve.
    pub async fn run(self) -> Result<(), ServeError> {
        let bind_addr = self.config.bind_addr();
        let addr: SocketAddr = bind_addr.parse().map_err(|source| ServeError::Addr {
            addr: bind_addr.clone(),
            source,
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;

        self.serve(listener).await
    }

    /// Serve connections from `listener` until accepting fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServeError> {
        let addr = listener.local_addr()?;
        info!("Serving... listening on {}", addr);

        let router = self.router;
        let config = self.config;

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);

            let router = router.clone();
            let config = config.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let router = router.clone();
                    let config = config.clone();
                    async move { handle_request(req, router, config, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

fn route_manager(
    config: &DevConfig,
    runtime: Arc<dyn LambdaRuntime>,
) -> (Router, RouteTableManager<Router>) {
    let router = Router::new();
    let manager = RouteTableManager::new(&config.base_path, router.clone(), runtime)
        .with_origin(format!("http://localhost:{}", config.port));
    (router, manager)
}

fn dev_build_options(config: &DevConfig, entries: Vec<Entry>) -> BuildOptions {
    BuildOptions::new(entries)
        .dev(true)
        .watch(config.watch)
        .node_target(config.node_target.clone())
        .custom_config(config.bundler_config.clone())
        .target_dir(config.target_dir.clone())
}

/// Production build: compile `entries` once and write bundles to disk.
pub async fn build_bundles(
    config: &DevConfig,
    entries: Vec<Entry>,
) -> Result<Compilation, ServeError> {
    let options = BuildOptions::new(entries)
        .node_target(config.node_target.clone())
        .custom_config(config.bundler_config.clone())
        .target_dir(config.target_dir.clone());

    Ok(build::run(options, None).await?)
}

async fn handle_request(
    req: Request<Incoming>,
    router: Router,
    config: Arc<DevConfig>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    debug!("Handling request: {} {} from {}", method, path, remote_addr);

    if config.enable_health && path == "/_health" {
        return Ok(HttpResponse::text(200, "OK").into_hyper());
    }

    let request = match HttpRequest::from_hyper(req, config.max_body_size).await {
        Ok(request) => request,
        Err(err @ BodyError::TooLarge { .. }) => {
            warn!("Rejecting {} {}: {}", method, path, err);
            return Ok(HttpResponse::text(413, err.to_string()).into_hyper());
        }
        Err(err) => {
            warn!("Failed to read request {} {}: {}", method, path, err);
            return Ok(HttpResponse::text(400, err.to_string()).into_hyper());
        }
    };

    let response = router.dispatch(request).await;
    debug!("{} {} -> {}", method, path, response.status);
    Ok(response.into_hyper())
}
