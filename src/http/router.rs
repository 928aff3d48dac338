//! Path-keyed route set served by the HTTP layer.

use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Anything that can answer a request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: HttpRequest) -> HttpResponse;
}

/// Registration surface of the HTTP layer.
///
/// Routes are registered once; replacing a registered handler is not part of
/// the contract.
pub trait RouteRegistrar: Send + Sync {
    fn register_route(&self, path: &str, handler: Arc<dyn RequestHandler>);
}

impl<T: RouteRegistrar + ?Sized> RouteRegistrar for Arc<T> {
    fn register_route(&self, path: &str, handler: Arc<dyn RequestHandler>) {
        (**self).register_route(path, handler)
    }
}

/// Exact-match router. Cloning shares the underlying route set.
#[derive(Clone, Default)]
pub struct Router {
    routes: Arc<RwLock<HashMap<String, Arc<dyn RequestHandler>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.routes.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Find the handler for `path`, ignoring one trailing `/`.
    pub fn lookup(&self, path: &str) -> Option<Arc<dyn RequestHandler>> {
        let routes = self.routes.read();
        routes.get(path).cloned().or_else(|| {
            path.strip_suffix('/')
                .filter(|p| !p.is_empty())
                .and_then(|p| routes.get(p).cloned())
        })
    }

    /// Route a request; unmatched paths answer 404.
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        match self.lookup(&request.path) {
            Some(handler) => handler.handle(request).await,
            None => {
                debug!(method = %request.method, path = %request.path, "No route matched");
                HttpResponse::text(
                    404,
                    format!("Cannot {} {}", request.method, request.path),
                )
            }
        }
    }
}

impl RouteRegistrar for Router {
    fn register_route(&self, path: &str, handler: Arc<dyn RequestHandler>) {
        if self
            .routes
            .write()
            .insert(path.to_string(), handler)
            .is_some()
        {
            warn!(path = %path, "Route registered more than once");
        }
    }
}
