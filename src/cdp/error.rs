use std::fmt;

/// Errors that can occur during CDP communication.
#[derive(Debug)]
pub enum CdpError {
    /// WebSocket connection could not be established.
    Connection(String),

    /// Connection attempt exceeded the configured timeout.
    ConnectionTimeout,

    /// A command did not receive a response within the configured timeout.
    CommandTimeout {
        /// The CDP method that timed out.
        method: String,
    },

    /// Chrome returned a CDP protocol-level error.
    Protocol {
        /// The CDP error code (e.g., -32000), when Chrome's `error` field
        /// was an object carrying one (§4.3).
        code: Option<i64>,
        /// The CDP error message.
        message: String,
    },

    /// The WebSocket connection was closed unexpectedly.
    ConnectionClosed,

    /// Failed to parse a message received from Chrome.
    InvalidResponse(String),

    /// Reconnection failed after all retry attempts were exhausted.
    ReconnectFailed {
        /// Number of reconnection attempts made.
        attempts: u32,
        /// The error from the last reconnection attempt.
        last_error: String,
    },

    /// `Page.navigate` returned a top-level protocol error.
    NavigationError(String),

    /// `Page.printToPDF` failed or returned no usable data.
    PdfGenerationError(String),

    /// Internal error (e.g., transport task died or channel closed).
    Internal(String),
}

impl fmt::Display for CdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "CDP connection error: {msg}"),
            Self::ConnectionTimeout => write!(f, "CDP connection timed out"),
            Self::CommandTimeout { method } => {
                write!(f, "CDP command timed out: {method}")
            }
            Self::Protocol {
                code: Some(code),
                message,
            } => {
                write!(f, "CDP protocol error ({code}): {message}")
            }
            Self::Protocol { code: None, message } => {
                write!(f, "CDP protocol error: {message}")
            }
            Self::ConnectionClosed => write!(f, "CDP connection closed"),
            Self::InvalidResponse(msg) => {
                write!(f, "CDP invalid response: {msg}")
            }
            Self::ReconnectFailed {
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "CDP reconnection failed after {attempts} attempts: {last_error}"
                )
            }
            Self::NavigationError(msg) => write!(f, "navigation error: {msg}"),
            Self::PdfGenerationError(msg) => write!(f, "PDF generation error: {msg}"),
            Self::Internal(msg) => write!(f, "CDP internal error: {msg}"),
        }
    }
}

impl std::error::Error for CdpError {}

impl From<CdpError> for crate::error::AppError {
    fn from(e: CdpError) -> Self {
        use crate::error::ExitCode;
        let code = match &e {
            CdpError::Connection(_)
            | CdpError::ConnectionClosed
            | CdpError::ReconnectFailed { .. } => ExitCode::ConnectionError,
            CdpError::ConnectionTimeout | CdpError::CommandTimeout { .. } => ExitCode::TimeoutError,
            CdpError::Protocol { .. } | CdpError::NavigationError(_) => ExitCode::ProtocolError,
            CdpError::PdfGenerationError(_) => ExitCode::ProtocolError,
            CdpError::InvalidResponse(_) | CdpError::Internal(_) => ExitCode::GeneralError,
        };
        Self::new(e.to_string(), code)
    }
}
