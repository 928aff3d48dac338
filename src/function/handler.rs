//! Invocation errors and their HTTP rendering.

use crate::http::HttpResponse;
use thiserror::Error;

/// Why an invocation did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LambdaError {
    /// The compiled source could not be loaded as a module.
    #[error("{0}")]
    Load(String),
    /// The function reported an error through its callback, a rejected
    /// promise or a throw.
    #[error("{message}")]
    Function {
        message: String,
        stack: Option<String>,
    },
    /// The function completed with something that is not a response.
    #[error("invalid function response: {0}")]
    InvalidResponse(String),
    /// The event could not be handed to the runtime.
    #[error("failed to build event: {0}")]
    Event(String),
    /// The invocation task itself failed.
    #[error("invocation task failed: {0}")]
    Runtime(String),
}

impl LambdaError {
    /// Stack trace, when the function provided one.
    pub fn stack(&self) -> Option<&str> {
        match self {
            LambdaError::Function { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

impl From<&LambdaError> for HttpResponse {
    fn from(err: &LambdaError) -> Self {
        HttpResponse::text(500, format!("Function invocation failed: {}", err))
    }
}

impl From<LambdaError> for HttpResponse {
    fn from(err: LambdaError) -> Self {
        HttpResponse::from(&err)
    }
}
