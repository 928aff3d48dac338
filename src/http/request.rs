//! Normalized inbound request handed to route handlers.

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Method, Request};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure while buffering a request body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("failed to read request body: {0}")]
    Read(#[source] BoxError),
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// An HTTP request with its body fully buffered.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Header pairs in arrival order; names are lower-case.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    /// Create a request for `uri` (path plus optional query).
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (uri, None),
        };

        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Decoded query parameters in order of appearance.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Buffer a hyper request, rejecting bodies above `max_body_size`.
    ///
    /// Reading stops as soon as the limit is crossed.
    pub async fn from_hyper<B>(req: Request<B>, max_body_size: usize) -> Result<Self, BodyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();

        let body = match Limited::new(body, max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.is::<LengthLimitError>() => {
                return Err(BodyError::TooLarge {
                    limit: max_body_size,
                })
            }
            Err(err) => return Err(BodyError::Read(err)),
        };

        Ok(Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(|q| q.to_string()),
            headers,
            body,
        })
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}
