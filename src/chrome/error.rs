use std::fmt;

/// Errors that can occur during browser discovery, launch, and HTTP-endpoint
/// discovery.
#[derive(Debug)]
pub enum ChromeError {
    /// The locator exhausted every candidate and found no executable.
    NotFound(String),

    /// No debugging port could be allocated in the probe range.
    PortUnavailable(String),

    /// The child process never printed the DevTools listening line.
    LaunchUnconfirmed,

    /// The child logged a bind error for the requested port.
    PortConflict(u16),

    /// Chrome process failed to spawn.
    LaunchFailed(String),

    /// HTTP request to Chrome's debug endpoint failed.
    HttpError(String),

    /// Failed to parse a response from Chrome.
    ParseError(String),

    /// An I/O error occurred.
    Io(std::io::Error),
}

impl fmt::Display for ChromeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "browser not found: {msg}"),
            Self::PortUnavailable(msg) => write!(f, "no debugging port available: {msg}"),
            Self::LaunchUnconfirmed => {
                write!(f, "browser did not confirm startup within 100 log lines")
            }
            Self::PortConflict(port) => write!(f, "port {port} is already bound by another process"),
            Self::LaunchFailed(msg) => write!(f, "browser launch failed: {msg}"),
            Self::HttpError(msg) => write!(f, "browser HTTP error: {msg}"),
            Self::ParseError(msg) => write!(f, "browser response parse error: {msg}"),
            Self::Io(e) => write!(f, "browser I/O error: {e}"),
        }
    }
}

impl std::error::Error for ChromeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChromeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ChromeError> for crate::error::AppError {
    fn from(e: ChromeError) -> Self {
        use crate::error::ExitCode;
        let code = match &e {
            ChromeError::NotFound(_) | ChromeError::ParseError(_) | ChromeError::Io(_) => {
                ExitCode::GeneralError
            }
            ChromeError::PortUnavailable(_)
            | ChromeError::PortConflict(_)
            | ChromeError::LaunchFailed(_)
            | ChromeError::HttpError(_) => ExitCode::ConnectionError,
            ChromeError::LaunchUnconfirmed => ExitCode::TimeoutError,
        };
        match e {
            ChromeError::Io(io_err) => {
                let message = format!("browser I/O error: {io_err}");
                Self::with_source(message, code, io_err)
            }
            other => Self::new(other.to_string(), code),
        }
    }
}
