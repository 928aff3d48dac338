//! The event handed to functions and the response they return.

use crate::function::LambdaError;
use crate::http::{HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Invocation event, serialized with the field names functions expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub path: String,
    pub http_method: String,
    /// Last value wins for repeated keys.
    pub query_string_parameters: BTreeMap<String, String>,
    pub multi_value_query_string_parameters: BTreeMap<String, Vec<String>>,
    /// Lower-case names; repeated headers joined with `, `.
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl Event {
    /// Derive the event from a buffered request.
    pub fn from_request(request: &HttpRequest) -> Self {
        let mut query_string_parameters = BTreeMap::new();
        let mut multi_value_query_string_parameters: BTreeMap<String, Vec<String>> =
            BTreeMap::new();
        for (key, value) in request.query_pairs() {
            multi_value_query_string_parameters
                .entry(key.clone())
                .or_default()
                .push(value.clone());
            query_string_parameters.insert(key, value);
        }

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &request.headers {
            headers
                .entry(name.to_ascii_lowercase())
                .and_modify(|joined| {
                    joined.push_str(", ");
                    joined.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }

        let (body, is_base64_encoded) = match std::str::from_utf8(&request.body) {
            Ok(text) => (text.to_string(), false),
            Err(_) => (BASE64.encode(&request.body), true),
        };

        Self {
            path: request.path.clone(),
            http_method: request.method.as_str().to_string(),
            query_string_parameters,
            multi_value_query_string_parameters,
            headers,
            body,
            is_base64_encoded,
        }
    }
}

/// Response object produced by a function.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaResponse {
    pub status_code: Option<Value>,
    pub headers: Option<Map<String, Value>>,
    pub multi_value_headers: Option<Map<String, Value>>,
    pub body: Option<Value>,
    pub is_base64_encoded: Option<bool>,
}

impl LambdaResponse {
    /// Interpret the value a function completed with.
    pub fn from_value(value: Value) -> Result<Self, LambdaError> {
        if value.is_null() {
            return Err(LambdaError::InvalidResponse(
                "function completed without a response".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|err| LambdaError::InvalidResponse(err.to_string()))
    }

    /// Map onto an HTTP response.
    pub fn into_http(self) -> Result<HttpResponse, LambdaError> {
        let status = parse_status(self.status_code.as_ref())?;
        let mut response = HttpResponse::new(status);

        for (name, value) in self.headers.into_iter().flatten() {
            for value in header_values(&value) {
                response = response.header(name.clone(), value);
            }
        }
        for (name, value) in self.multi_value_headers.into_iter().flatten() {
            for value in header_values(&value) {
                response = response.header(name.clone(), value);
            }
        }

        let body = match self.body {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(text)) if self.is_base64_encoded.unwrap_or(false) => BASE64
                .decode(text.as_bytes())
                .map_err(|err| {
                    LambdaError::InvalidResponse(format!("body is not valid base64: {}", err))
                })?,
            Some(Value::String(text)) => text.into_bytes(),
            Some(other) => other.to_string().into_bytes(),
        };

        Ok(response.body(body))
    }
}

fn parse_status(value: Option<&Value>) -> Result<u16, LambdaError> {
    let code = match value {
        None | Some(Value::Null) => {
            return Err(LambdaError::InvalidResponse(
                "response is missing statusCode".to_string(),
            ))
        }
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };

    match code {
        Some(code @ 100..=999) => Ok(code as u16),
        _ => Err(LambdaError::InvalidResponse(format!(
            "invalid statusCode {}",
            value.map(Value::to_string).unwrap_or_default()
        ))),
    }
}

fn header_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(header_values).collect(),
        other => vec![other.to_string()],
    }
}
