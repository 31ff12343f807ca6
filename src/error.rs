//! Error types shared across the HTTP device, router and remote-object layers.
//!
//! Low-level socket reads and writes never produce these types; they return
//! `io::Result` sentinels that callers must check. Framing and application
//! failures are typed and converted into HTTP responses exactly once, at the
//! router boundary.

use http::StatusCode;
use std::fmt;
use std::io;

/// Failure while framing an HTTP or MIME message off the wire.
#[derive(Debug)]
pub enum FrameError {
    /// Malformed request line, header field or multipart boundary.
    InvalidFormat(String),
    /// Header block exceeded the configured header size limit.
    HeaderTooLarge,
    /// Header plus declared body would exceed the message size limit.
    MessageTooLarge,
    /// The stream ended in the middle of a frame.
    UnexpectedEof,
    /// Underlying transport failure.
    Io(io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat(msg) => write!(f, "invalid message format: {msg}"),
            Self::HeaderTooLarge => write!(f, "header exceeds size limit"),
            Self::MessageTooLarge => write!(f, "message exceeds size limit"),
            Self::UnexpectedEof => write!(f, "unexpected end of stream"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEof
        } else {
            Self::Io(e)
        }
    }
}

/// An HTTP failure carrying the status code to report and a human-readable
/// message the router writes into the response body.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for HttpError {}

impl From<FrameError> for HttpError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::HeaderTooLarge | FrameError::MessageTooLarge => {
                Self::new(StatusCode::PAYLOAD_TOO_LARGE, e.to_string())
            }
            FrameError::InvalidFormat(_) | FrameError::UnexpectedEof => {
                Self::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            FrameError::Io(inner) => Self::internal(inner.to_string()),
        }
    }
}

/// Result type returned by URI handlers.
///
/// `Status` failures become well-formed HTTP error responses; `Io` failures
/// mean the transport itself broke and the connection is dropped.
#[derive(Debug)]
pub enum HandlerError {
    Status(HttpError),
    Io(io::Error),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<HttpError> for HandlerError {
    fn from(e: HttpError) -> Self {
        Self::Status(e)
    }
}

impl From<io::Error> for HandlerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FrameError> for HandlerError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(inner) => Self::Io(inner),
            other => Self::Status(other.into()),
        }
    }
}

pub type HandlerResult = Result<(), HandlerError>;
