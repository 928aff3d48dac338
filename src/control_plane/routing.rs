//! Route table and its manager.
//!
//! The table maps an absolute route path to the handler built from the most
//! recent successful compilation. The HTTP layer never sees those handlers
//! directly: each route is registered once with a [`Dispatcher`] that looks
//! the current handler up on every request, so rebuilds swap behavior without
//! touching registrations.

use crate::build::{Compilation, CycleCallback};
use crate::function::{create_handler, LambdaRuntime};
use crate::http::{HttpRequest, HttpResponse, RequestHandler, RouteRegistrar};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type Handlers = HashMap<String, Arc<dyn RequestHandler>>;

/// Normalize a base path: leading `/` added, trailing `/` removed. The root
/// path normalizes to the empty string.
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Absolute route path for an entry. `request_path` always starts with `/`.
pub fn route_path(base_path: &str, request_path: &str) -> String {
    format!("{}{}", normalize_base_path(base_path), request_path)
}

/// Shared map from route path to the currently active handler.
#[derive(Clone)]
pub struct RouteTable {
    handlers: Arc<ArcSwap<Handlers>>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            handlers: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler currently active at `path`.
    pub fn get(&self, path: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.load().get(path).cloned()
    }

    /// Active paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.handlers.load().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.load().is_empty()
    }

    /// Install every update in a single swap. Paths not mentioned keep their
    /// handler.
    fn replace(&self, updates: Vec<(String, Arc<dyn RequestHandler>)>) {
        let mut next = Handlers::clone(&self.handlers.load_full());
        next.extend(updates);
        self.handlers.store(Arc::new(next));
    }
}

/// Stable per-route handler registered with the HTTP layer.
pub struct Dispatcher {
    path: String,
    table: RouteTable,
}

impl Dispatcher {
    pub fn new(path: impl Into<String>, table: RouteTable) -> Self {
        Self {
            path: path.into(),
            table,
        }
    }
}

#[async_trait]
impl RequestHandler for Dispatcher {
    async fn handle(&self, request: HttpRequest) -> HttpResponse {
        match self.table.get(&self.path) {
            Some(handler) => handler.handle(request).await,
            None => {
                warn!(route = %self.path, "No compiled function for route");
                HttpResponse::text(502, format!("Function for {} has not been compiled", self.path))
            }
        }
    }
}

/// Lifecycle of a [`RouteTableManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No successful compilation seen yet; nothing registered.
    Uninitialized,
    /// Routes registered; later cycles only swap handlers.
    Serving,
}

/// Applies successful compilations to the route table.
pub struct RouteTableManager<R: RouteRegistrar> {
    base_path: String,
    origin: String,
    table: RouteTable,
    registrar: R,
    runtime: Arc<dyn LambdaRuntime>,
    state: ManagerState,
}

impl<R: RouteRegistrar> RouteTableManager<R> {
    pub fn new(base_path: &str, registrar: R, runtime: Arc<dyn LambdaRuntime>) -> Self {
        Self {
            base_path: normalize_base_path(base_path),
            origin: String::new(),
            table: RouteTable::new(),
            registrar,
            runtime,
            state: ManagerState::Uninitialized,
        }
    }

    /// Prefix for the route URLs logged when serving starts, e.g.
    /// `http://localhost:9000`.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Handle to the table this manager writes.
    pub fn table(&self) -> RouteTable {
        self.table.clone()
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn registrar(&self) -> &R {
        &self.registrar
    }

    /// Apply one successful compilation. Returns the number of routes whose
    /// handler was replaced.
    ///
    /// An entry without a matching module keeps its previous handler. Routes
    /// are registered with the HTTP layer on the first call only.
    pub fn apply(&mut self, compilation: &Compilation) -> usize {
        let mut updates: Vec<(String, Arc<dyn RequestHandler>)> =
            Vec::with_capacity(compilation.entries.len());

        for entry in &compilation.entries {
            let path = route_path(&self.base_path, &entry.request_path);
            match compilation.module_for(entry) {
                Some(module) => {
                    let handler: Arc<dyn RequestHandler> =
                        create_handler(module.source.as_str(), entry.file.as_str(), self.runtime.clone());
                    updates.push((path, handler));
                }
                None => error!(
                    entry = %entry.file,
                    hash = %compilation.hash,
                    "No compiled module matches entry"
                ),
            }
        }

        let updated = updates.len();
        self.table.replace(updates);
        debug!(hash = %compilation.hash, updated, "Route table updated");

        if self.state == ManagerState::Uninitialized {
            for entry in &compilation.entries {
                let path = route_path(&self.base_path, &entry.request_path);
                let dispatcher = Arc::new(Dispatcher::new(path.clone(), self.table.clone()));
                self.registrar.register_route(&path, dispatcher);
                info!("Serving Function {}{}", self.origin, path);
            }
            self.state = ManagerState::Serving;
        }

        updated
    }
}

impl<R: RouteRegistrar + 'static> RouteTableManager<R> {
    /// Turn the manager into a compilation cycle callback.
    pub fn into_callback(mut self) -> CycleCallback {
        Box::new(move |compilation: &Compilation| {
            self.apply(compilation);
        })
    }
}
