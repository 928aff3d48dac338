//! HTTP types: buffered requests and responses, and the route set.

mod request;
mod response;
mod router;

pub use request::{BodyError, HttpRequest};
pub use response::HttpResponse;
pub use router::{RequestHandler, RouteRegistrar, Router};
