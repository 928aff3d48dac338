//! Runs compiled lambda bundles in a throwaway deno_core runtime.
//!
//! A bundle is CommonJS source exporting `handler(event, context, callback)`.
//! Every call to [`invoke`] builds a new `JsRuntime`, evaluates the bundle in
//! it and drives the event loop until the handler answers through its
//! callback or its returned promise, whichever happens first.

use anyhow::{anyhow, Context, Result};
use deno_core::{futures::executor::block_on, v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use serde_json::Value;
use std::{sync::Arc, thread, time::Duration};

const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// One invocation of a compiled bundle.
#[derive(Clone, Debug)]
pub struct JsInvoke {
    /// Compiled bundle source.
    pub source: Arc<str>,
    /// Name used for `__filename` and stack traces.
    pub module_name: String,
    /// Event passed as the first handler argument.
    pub event: Value,
    /// Contents of `process.env`.
    pub env: Value,
}

/// How a handler finished.
#[derive(Clone, Debug, PartialEq)]
pub enum JsCompletion {
    /// The handler produced a response value (`callback(null, res)` or a
    /// resolved promise).
    Response(Value),
    /// The handler reported an error (`callback(err)`, a rejected promise or
    /// a throw).
    Error(JsFunctionError),
}

/// Error reported by a handler, rendered on the JS side.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JsFunctionError {
    pub message: String,
    pub stack: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PollState {
    Pending {
        #[serde(rename = "nextTimer")]
        next_timer: Option<f64>,
    },
    LoadError {
        message: String,
        stack: Option<String>,
    },
    Error {
        message: String,
        stack: Option<String>,
    },
    Response {
        response: Value,
    },
}

/// Load the bundle and run its handler to completion.
///
/// Returns `Err` when the bundle cannot be loaded: syntax errors, a throw
/// during module evaluation, or a missing `handler` export. Errors raised by
/// the handler itself come back as [`JsCompletion::Error`].
///
/// Blocks the calling thread; callers on an async runtime should use a
/// blocking task.
pub fn invoke(req: &JsInvoke) -> Result<JsCompletion> {
    let mut runtime = JsRuntime::new(RuntimeOptions::default());

    runtime
        .execute_script("<lambda-dev-bootstrap>", BOOTSTRAP)
        .context("Failed to execute JS bootstrap")?;

    let code = wrap_module(req)?;
    runtime
        .execute_script("<lambda-dev-module>", code)
        .with_context(|| format!("Failed to load module {}", req.module_name))?;

    loop {
        block_on(runtime.run_event_loop(PollEventLoopOptions::default()))
            .context("Failed to run JS event loop")?;

        match poll(&mut runtime)? {
            PollState::Response { response } => return Ok(JsCompletion::Response(response)),
            PollState::Error { message, stack } => {
                return Ok(JsCompletion::Error(JsFunctionError { message, stack }))
            }
            PollState::LoadError { message, stack } => {
                return Err(anyhow!("{}", stack.unwrap_or(message)))
            }
            PollState::Pending {
                next_timer: Some(delay),
            } => {
                if delay > 0.0 {
                    thread::sleep(Duration::from_millis(delay.ceil() as u64));
                }
                runtime
                    .execute_script("<lambda-dev-timers>", "globalThis.__lambdaFireTimers()")
                    .context("Failed to run JS timers")?;
            }
            PollState::Pending { next_timer: None } => {
                return Ok(JsCompletion::Error(JsFunctionError {
                    message: format!(
                        "{} never completed: the callback was not called and no promise settled",
                        req.module_name
                    ),
                    stack: None,
                }))
            }
        }
    }
}

/// Wrap CommonJS source in a factory and hand it to the bootstrap.
///
/// The source starts on the first line of the script so stack trace line
/// numbers match the bundle.
fn wrap_module(req: &JsInvoke) -> Result<String> {
    let filename = serde_json::to_string(&req.module_name)?;
    let event = serde_json::to_string(&req.event).context("Failed to serialize event")?;
    let env = serde_json::to_string(&req.env).context("Failed to serialize env")?;
    let source_url = req.module_name.replace(['\r', '\n'], " ");

    Ok(format!(
        "globalThis.__lambdaInvoke(function (exports, require, module, __filename, __dirname) {{{source}\n\
         }}, {filename}, {event}, {env});\n\
         //# sourceURL={source_url}\n",
        source = req.source,
    ))
}

fn poll(runtime: &mut JsRuntime) -> Result<PollState> {
    let state = runtime
        .execute_script("<lambda-dev-poll>", "globalThis.__lambdaPoll()")
        .context("Failed to poll JS completion")?;

    let mut scope = runtime.handle_scope();
    let state = v8::Local::new(&mut scope, &state);
    let json = state
        .to_string(&mut scope)
        .ok_or_else(|| anyhow!("Completion state is not a string"))?
        .to_rust_string_lossy(&mut scope);

    serde_json::from_str(&json).context("Invalid completion state")
}
