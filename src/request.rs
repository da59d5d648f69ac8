//! Request-side types: the method set, request bodies, and the builder.

use bytes::Bytes;

use crate::error::Error;
use crate::pool::Pool;
use crate::response::Response;

/// The methods the pool dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// Request body.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Body from bytes.
    Bytes(Bytes),
}

impl Body {
    /// Returns true if the body is empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(b) => b.is_empty(),
        }
    }

    /// Returns the body as a byte slice, or empty slice if no body.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Bytes(b) => b,
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        if b.is_empty() { Body::Empty } else { Body::Bytes(b) }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::from(Bytes::from(v))
    }
}

impl From<&[u8]> for Body {
    fn from(s: &[u8]) -> Self {
        Body::from(Bytes::copy_from_slice(s))
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::from(s.as_bytes())
    }
}

/// Builder for a pooled request.
pub struct RequestBuilder<'a> {
    pool: &'a Pool,
    method: Method,
    path: String,
    content_type: Option<String>,
    body: Body,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(pool: &'a Pool, method: Method, path: &str) -> Self {
        Self {
            pool,
            method,
            path: path.to_string(),
            content_type: None,
            body: Body::Empty,
        }
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the content-type header.
    pub fn content_type(mut self, value: &str) -> Self {
        self.content_type = Some(value.to_string());
        self
    }

    /// Dispatch the request and wait for the response.
    pub async fn send(self) -> Result<Response, Error> {
        self.pool
            .dispatch(self.method, &self.path, self.body, self.content_type.as_deref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_wire_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Patch.as_str(), "PATCH");
    }

    #[test]
    fn empty_conversions_collapse_to_empty() {
        assert!(Body::from("").is_empty());
        assert!(Body::from(Vec::new()).is_empty());
        assert_eq!(Body::from("x").as_bytes(), b"x");
    }
}
