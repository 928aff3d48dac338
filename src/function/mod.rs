//! Function invocation: the event contract, the runtime seam and the bridge
//! that turns compiled source into a request handler.

pub mod bridge;
pub mod event;
pub mod handler;
pub mod runtime;

pub use bridge::{create_handler, LambdaHandler};
pub use event::{Event, LambdaResponse};
pub use handler::LambdaError;
pub use runtime::{Completion, DenoRuntime, JsFunctionError, LambdaRuntime};
