use std::string::FromUtf8Error;

use bytes::Bytes;

/// A decision-service response: status code and accumulated body.
///
/// Headers are consumed by the protocol layer and not surfaced.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(status: u16, body: Bytes) -> Self {
        Self { status, body }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reference to the body bytes without consuming.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the response and return the body bytes.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Consume the response and return the body as UTF-8 text.
    pub fn text(self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.body.to_vec())
    }
}
