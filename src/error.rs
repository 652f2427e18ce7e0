//! Error types for the RTSP dialog engine.
//!
//! Configuration and fatal errors travel as `anyhow::Error`, the same
//! way connection failures propagate elsewhere in this crate.
//! [`RtspStatus`] is narrower: it is the set of non-2xx outcomes the
//! dialog engine must turn into a concrete RTSP status line, so a
//! handler can return a typed cause instead of matching on strings.

use thiserror::Error;

/// A protocol-level outcome that maps directly onto an RTSP status line.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RtspStatus {
    #[error("400 Bad Request")]
    BadRequest,
    #[error("401 Unauthorized")]
    Unauthorized,
    #[error("454 Session Not Found")]
    SessionNotFound,
    #[error("461 Unsupported Transport")]
    UnsupportedTransport,
}

impl RtspStatus {
    pub fn code(self) -> u16 {
        match self {
            RtspStatus::BadRequest => 400,
            RtspStatus::Unauthorized => 401,
            RtspStatus::SessionNotFound => 454,
            RtspStatus::UnsupportedTransport => 461,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            RtspStatus::BadRequest => "Bad Request",
            RtspStatus::Unauthorized => "Unauthorized",
            RtspStatus::SessionNotFound => "Session Not Found",
            RtspStatus::UnsupportedTransport => "Unsupported Transport",
        }
    }
}
