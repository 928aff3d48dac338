//! Execution of compiled function source.

use crate::function::{Event, LambdaError};
use async_trait::async_trait;
use lambda_dev_js::JsInvoke;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use lambda_dev_js::{JsCompletion as Completion, JsFunctionError};

/// Loads compiled source as a fresh module and runs its handler once.
///
/// `Err` means the module could not be run at all; errors the function
/// reports itself come back as [`Completion::Error`].
#[async_trait]
pub trait LambdaRuntime: Send + Sync {
    async fn invoke(
        &self,
        source: Arc<str>,
        module_name: &str,
        event: &Event,
    ) -> Result<Completion, LambdaError>;
}

/// Runs functions in a new deno_core isolate per invocation.
#[derive(Debug, Clone, Default)]
pub struct DenoRuntime {
    env: BTreeMap<String, String>,
}

impl DenoRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the contents of `process.env`.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

#[async_trait]
impl LambdaRuntime for DenoRuntime {
    async fn invoke(
        &self,
        source: Arc<str>,
        module_name: &str,
        event: &Event,
    ) -> Result<Completion, LambdaError> {
        let request = JsInvoke {
            source,
            module_name: module_name.to_string(),
            event: serde_json::to_value(event).map_err(|err| LambdaError::Event(err.to_string()))?,
            env: serde_json::to_value(&self.env)
                .map_err(|err| LambdaError::Event(err.to_string()))?,
        };

        tokio::task::spawn_blocking(move || lambda_dev_js::invoke(&request))
            .await
            .map_err(|err| LambdaError::Runtime(err.to_string()))?
            .map_err(|err| LambdaError::Load(format!("{:#}", err)))
    }
}
