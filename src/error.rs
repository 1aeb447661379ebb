//! HTTP/2 error codes (RFC 7540 Section 7) and the crate error type.

use std::fmt;

use thiserror::Error;

/// HTTP/2 error codes as carried by RST_STREAM and GOAWAY frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Map a wire value to an error code.
    ///
    /// Unknown codes must not trigger special behavior, so they are
    /// treated as `INTERNAL_ERROR`.
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    fn name(self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors surfaced by the engine.
///
/// `Connection` and `Stream` are the two wire severities: the first ends
/// the whole connection with GOAWAY, the second resets one stream with
/// RST_STREAM. The remaining variants report API misuse by the embedding
/// application and never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum H2Error {
    #[error("connection error: {0}")]
    Connection(ErrorCode),

    #[error("stream {stream_id} error: {code}")]
    Stream { stream_id: u32, code: ErrorCode },

    #[error("stream {0} is not active")]
    UnknownStream(u32),

    #[error("connection has gone away")]
    GoneAway,

    #[error("connection is closed")]
    Closed,

    #[error("stream identifiers exhausted")]
    StreamIdsExhausted,

    #[error("invalid message event: {0}")]
    InvalidEvent(&'static str),
}

impl H2Error {
    pub(crate) fn stream(stream_id: u32, code: ErrorCode) -> Self {
        Self::Stream { stream_id, code }
    }

    /// The wire error code, if this error is one that goes on the wire.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Connection(code) | Self::Stream { code, .. } => Some(*code),
            _ => None,
        }
    }
}
