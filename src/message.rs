//! Message events exchanged with the per-stream application pipeline.

use crate::error::ErrorCode;
use crate::hpack::H2Header;

/// The head of a request or response: pseudo-header fields plus regular
/// header fields in wire order.
///
/// A request carries `method`, `scheme`, `authority` and `path`; a
/// response carries `status`. Trailers use only `headers`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHead {
    pub method: Option<String>,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: Option<String>,
    pub status: Option<u16>,
    pub headers: Vec<H2Header>,
}

impl MessageHead {
    pub fn request(
        method: impl Into<String>,
        scheme: impl Into<String>,
        authority: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: Some(method.into()),
            scheme: Some(scheme.into()),
            authority: Some(authority.into()),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn response(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Append a header field.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(H2Header::new(name, value));
        self
    }

    /// First value of a header, by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn is_head_request(&self) -> bool {
        self.method.as_deref() == Some("HEAD")
    }

    pub fn is_connect(&self) -> bool {
        self.method.as_deref() == Some("CONNECT")
    }

    /// 1xx heads precede the final response and carry no body.
    pub fn is_informational(&self) -> bool {
        matches!(self.status, Some(100..=199))
    }
}

/// One step of a message, in either direction.
///
/// A message is `Start`, any number of `Data`, then `End` (with optional
/// trailers). `StreamEnd` closes the stream; `Some(code)` means it was
/// reset rather than completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Start(MessageHead),
    Data(Vec<u8>),
    End(Option<Vec<H2Header>>),
    StreamEnd(Option<ErrorCode>),
}
