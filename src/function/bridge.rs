//! Bridges HTTP requests into the event/context/callback convention of
//! compiled functions.

use crate::function::{Completion, Event, LambdaError, LambdaResponse, LambdaRuntime};
use crate::http::{HttpRequest, HttpResponse, RequestHandler};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Request handler bound to one compiled source text.
///
/// Every request loads the source again as a fresh module; nothing is cached
/// between requests.
pub struct LambdaHandler {
    source: Arc<str>,
    module_name: String,
    runtime: Arc<dyn LambdaRuntime>,
}

/// Build a handler for `source`, identified by `module_name` in stack traces.
pub fn create_handler(
    source: impl Into<Arc<str>>,
    module_name: impl Into<String>,
    runtime: Arc<dyn LambdaRuntime>,
) -> Arc<LambdaHandler> {
    Arc::new(LambdaHandler {
        source: source.into(),
        module_name: module_name.into(),
        runtime,
    })
}

impl LambdaHandler {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Run the function against `request`.
    pub async fn invoke(&self, request: &HttpRequest) -> Result<HttpResponse, LambdaError> {
        let event = Event::from_request(request);

        let completion = self
            .runtime
            .invoke(self.source.clone(), &self.module_name, &event)
            .await?;

        match completion {
            Completion::Response(value) => LambdaResponse::from_value(value)?.into_http(),
            Completion::Error(err) => Err(LambdaError::Function {
                message: err.message,
                stack: err.stack,
            }),
        }
    }
}

#[async_trait]
impl RequestHandler for LambdaHandler {
    async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let request_id = generate_request_id();
        debug!(
            request_id = %request_id,
            function = %self.module_name,
            method = %request.method,
            path = %request.path,
            "Invoking function"
        );

        match self.invoke(&request).await {
            Ok(response) => response,
            Err(err) => {
                error!(
                    request_id = %request_id,
                    function = %self.module_name,
                    stack = err.stack().unwrap_or_default(),
                    "Function invocation failed: {}",
                    err
                );
                HttpResponse::from(err)
            }
        }
    }
}

fn generate_request_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:x}", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::JsFunctionError;
    use hyper::Method;
    use serde_json::{json, Value};

    /// Answers with a fixed completion, echoing the source it was given.
    struct EchoRuntime(Result<Option<Completion>, LambdaError>);

    #[async_trait]
    impl LambdaRuntime for EchoRuntime {
        async fn invoke(
            &self,
            source: Arc<str>,
            _module_name: &str,
            event: &Event,
        ) -> Result<Completion, LambdaError> {
            match &self.0 {
                Ok(Some(completion)) => Ok(completion.clone()),
                Ok(None) => Ok(Completion::Response(json!({
                    "statusCode": 200,
                    "body": format!("{} {}", source, event.path),
                }))),
                Err(err) => Err(err.clone()),
            }
        }
    }

    fn handler(runtime: EchoRuntime) -> Arc<LambdaHandler> {
        create_handler("S1", "functions/a.js", Arc::new(runtime))
    }

    #[tokio::test]
    async fn test_response_passes_through() {
        let h = handler(EchoRuntime(Ok(None)));
        assert_eq!(h.source(), "S1");
        assert_eq!(h.module_name(), "functions/a.js");

        let res = h.handle(HttpRequest::new(Method::GET, "/api/a")).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.text_body(), "S1 /api/a");
    }

    #[tokio::test]
    async fn test_function_error_is_500() {
        let h = handler(EchoRuntime(Ok(Some(Completion::Error(JsFunctionError {
            message: "Error: nope".to_string(),
            stack: None,
        })))));

        let res = h.handle(HttpRequest::default()).await;
        assert_eq!(res.status, 500);
        assert_eq!(res.text_body(), "Function invocation failed: Error: nope");
    }

    #[tokio::test]
    async fn test_load_error_is_500() {
        let h = handler(EchoRuntime(Err(LambdaError::Load(
            "SyntaxError: Unexpected token".to_string(),
        ))));

        let res = h.handle(HttpRequest::default()).await;
        assert_eq!(res.status, 500);
        assert!(res.text_body().contains("SyntaxError"));
    }

    #[tokio::test]
    async fn test_missing_status_is_500() {
        let h = handler(EchoRuntime(Ok(Some(Completion::Response(
            json!({"body": "x"}),
        )))));
        let res = h.handle(HttpRequest::default()).await;
        assert_eq!(res.status, 500);

        let h = handler(EchoRuntime(Ok(Some(Completion::Response(Value::Null)))));
        let res = h.handle(HttpRequest::default()).await;
        assert_eq!(res.status, 500);
    }
}
