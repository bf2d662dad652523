//! The pool's unit of work: one browser subprocess plus the persistent CDP
//! connection to its single page (§3 Data Model: Session).

use std::fmt;
use std::path::Path;

use crate::cdp::{CdpConfig, CdpError, CdpSession};
use crate::chrome::{self, ChromeError, ChromeProcess};
use crate::pdf_options::PdfOptions;

/// A launched browser subprocess, CDP-connected to its one page.
///
/// Mutably owned by at most one thread of control at a time: either the
/// pool's idle set, the caller that checked it out, or the pool's
/// shutdown drain — never two at once (§3 invariant 3).
#[derive(Debug)]
pub struct Session {
    process: ChromeProcess,
    cdp: CdpSession,
}

/// Errors from launching or driving a [`Session`].
#[derive(Debug)]
pub enum SessionError {
    Chrome(ChromeError),
    Cdp(CdpError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chrome(e) => write!(f, "{e}"),
            Self::Cdp(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Chrome(e) => Some(e),
            Self::Cdp(e) => Some(e),
        }
    }
}

impl From<ChromeError> for SessionError {
    fn from(e: ChromeError) -> Self {
        Self::Chrome(e)
    }
}

impl From<CdpError> for SessionError {
    fn from(e: CdpError) -> Self {
        Self::Cdp(e)
    }
}

impl From<SessionError> for crate::error::AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Chrome(e) => e.into(),
            SessionError::Cdp(e) => e.into(),
        }
    }
}

impl Session {
    /// Launch a fresh browser subprocess on `port`, connect to its page
    /// endpoint, and send `Page.enable` once up front.
    ///
    /// Every error path closes whatever was already opened — no leaks
    /// (§3 invariant 5).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Chrome`] if the browser cannot be launched,
    /// or [`SessionError::Cdp`] if the CDP connection or initial
    /// `Page.enable` fails.
    pub async fn launch(executable: &Path, port: u16) -> Result<Self, SessionError> {
        let (process, ws_url) = chrome::launch(executable, port).await?;

        let cdp = match CdpSession::connect(&ws_url, CdpConfig::default()).await {
            Ok(cdp) => cdp,
            Err(e) => {
                process.close().await;
                return Err(SessionError::Cdp(e));
            }
        };

        if let Err(e) = cdp.enable_page().await {
            let _ = cdp.close().await;
            process.close().await;
            return Err(SessionError::Cdp(e));
        }

        Ok(Self { process, cdp })
    }

    /// Wrap an already-running child process and an already-connected CDP
    /// session, bypassing [`Session::launch`]'s subprocess spawn entirely.
    /// Lets pool tests exercise acquire/release/eviction logic against a
    /// lightweight stand-in process and a mock CDP server instead of a
    /// real browser.
    #[cfg(test)]
    pub(crate) fn for_test(child: tokio::process::Child, port: u16, cdp: CdpSession) -> Self {
        Self {
            process: chrome::ChromeProcess::for_test(child, port),
            cdp,
        }
    }

    /// The debugging port this session's subprocess is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.process.port()
    }

    /// Navigate to `url`; see [`CdpSession::navigate`].
    ///
    /// # Errors
    ///
    /// Returns `CdpError::NavigationError` or any transport error.
    pub async fn navigate(&self, url: &str) -> Result<(), CdpError> {
        self.cdp.navigate(url).await
    }

    /// Render the current page to PDF bytes; see [`CdpSession::print_to_pdf`].
    ///
    /// # Errors
    ///
    /// Returns `CdpError::PdfGenerationError` or any transport error.
    pub async fn print_to_pdf(&self, opts: &PdfOptions) -> Result<Vec<u8>, CdpError> {
        self.cdp.print_to_pdf(opts).await
    }

    /// Whether the underlying CDP transport believes it is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.cdp.is_connected()
    }

    /// Close the CDP connection and terminate the backing subprocess.
    pub async fn close(self) {
        let _ = self.cdp.close().await;
        self.process.close().await;
    }
}
