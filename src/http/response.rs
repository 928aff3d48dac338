//! Outbound response written by route handlers.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Response, StatusCode};
use tracing::warn;

/// An HTTP response with a buffered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header pairs; a name may repeat.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Create an empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response.
    pub fn text(status: u16, content: impl Into<String>) -> Self {
        Self::new(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(content.into())
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
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

    /// Body decoded as UTF-8, lossily.
    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Convert into a hyper response. Headers hyper cannot represent are
    /// dropped with a warning.
    pub fn into_hyper(self) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or_else(|_| {
            warn!(
                "Invalid status code {}, falling back to 500 Internal Server Error",
                self.status
            );
            StatusCode::INTERNAL_SERVER_ERROR
        });

        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            let name = match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => name,
                Err(_) => {
                    warn!(header = %name, "Skipping invalid header name");
                    continue;
                }
            };
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(name, value);
                }
                Err(_) => warn!(header = %name, "Skipping invalid header value"),
            }
        }

        response
    }
}
