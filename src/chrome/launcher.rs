use std::net::TcpListener;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use super::ChromeError;
use super::discovery::discover_page_endpoint;

/// Cap on startup log lines scanned before giving up (§4.2 step 3).
const STARTUP_LINE_CAP: usize = 100;

/// How many ports past `requested_port` to probe before failing.
const PORT_PROBE_WIDTH: u16 = 100;

/// Grace delay between observing the DevTools listening line and querying
/// the HTTP discovery endpoint — the endpoint may not be ready immediately
/// after the log line is printed.
const STARTUP_GRACE: Duration = Duration::from_secs(1);

/// Substring the child process logs on a remote-debugging port collision.
const BIND_ERROR_MARKER: &str = "bind() returned an error";

fn devtools_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"DevTools listening on (ws://\S+)").expect("startup-line regex is valid")
    })
}

/// Exact command-line flags required to launch a headless, remotely
/// debuggable instance on `port` (§4.2 step 2 — spelling matters).
fn build_args(port: u16) -> Vec<String> {
    vec![
        "--headless".into(),
        "--disable-gpu".into(),
        "--no-sandbox".into(),
        "--disable-web-security".into(),
        "--allow-file-access-from-files".into(),
        "--disable-extensions".into(),
        "--disable-popup-blocking".into(),
        "--disable-translate".into(),
        format!("--remote-debugging-port={port}"),
        "about:blank".into(),
    ]
}

/// A running headless browser subprocess, bound to one debugging port.
#[derive(Debug)]
pub struct ChromeProcess {
    child: Child,
    port: u16,
}

impl ChromeProcess {
    /// Wrap an already-spawned child process, bypassing the launch sequence
    /// entirely. Used by tests that stand in a lightweight subprocess (e.g.
    /// `sleep`) for a real browser while exercising pool/session logic
    /// against a mock CDP server.
    #[cfg(test)]
    pub(crate) fn for_test(child: Child, port: u16) -> Self {
        Self { child, port }
    }

    /// The debugging port this process was launched on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The subprocess PID, if the OS has assigned one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Request graceful termination, wait up to 5s, then force-kill.
    ///
    /// Matches §4.2 `close()`: graceful first, forceful as a backstop.
    pub async fn close(mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: `pid` is this handle's own child process, still owned
            // by `self.child` at this point.
            unsafe {
                libc::kill(i64::from(pid) as libc::pid_t, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        if timeout(Duration::from_secs(5), self.child.wait())
            .await
            .is_err()
        {
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
        }
    }
}

/// Bind `requested_port`; on failure, probe `requested_port+1..=+100` and
/// return the first free port.
///
/// This is inherently TOCTOU: the listener is released immediately so the
/// browser can bind it, leaving a race window another process could win.
/// The caller must also recognize a bind failure surfacing in the child's
/// own startup log and translate it to [`ChromeError::PortConflict`].
///
/// # Errors
///
/// Returns [`ChromeError::PortUnavailable`] if every port in range is bound.
pub fn allocate_port(requested_port: u16) -> Result<u16, ChromeError> {
    if TcpListener::bind(("127.0.0.1", requested_port)).is_ok() {
        return Ok(requested_port);
    }
    for offset in 1..=PORT_PROBE_WIDTH {
        let Some(candidate) = requested_port.checked_add(offset) else {
            break;
        };
        if TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
            return Ok(candidate);
        }
    }
    Err(ChromeError::PortUnavailable(format!(
        "no free port in {requested_port}..={}",
        requested_port.saturating_add(PORT_PROBE_WIDTH)
    )))
}

/// Spawn one browser subprocess per session, wait for it to confirm
/// startup, then discover a page-level CDP endpoint on it.
///
/// # Errors
///
/// - [`ChromeError::PortUnavailable`] if no debugging port could be bound.
/// - [`ChromeError::LaunchFailed`] if the executable fails to spawn.
/// - [`ChromeError::PortConflict`] if the child itself reports a bind
///   failure for the chosen port (the TOCTOU race was lost).
/// - [`ChromeError::LaunchUnconfirmed`] if 100 log lines pass with no
///   DevTools listening line observed.
/// - [`ChromeError::HttpError`] / [`ChromeError::ParseError`] if the page
///   endpoint cannot be discovered after startup.
pub async fn launch(executable: &Path, requested_port: u16) -> Result<(ChromeProcess, String), ChromeError> {
    let port = allocate_port(requested_port)?;

    let mut cmd = Command::new(executable);
    cmd.args(build_args(port));
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| ChromeError::LaunchFailed(format!("failed to spawn {}: {e}", executable.display())))?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    let mut process = ChromeProcess { child, port };
    let mut confirmed = false;
    let mut port_conflict = false;

    for _ in 0..STARTUP_LINE_CAP {
        let line = tokio::select! {
            l = out_lines.next_line() => l,
            l = err_lines.next_line() => l,
        };
        let Ok(Some(text)) = line else {
            break;
        };
        if text.contains(BIND_ERROR_MARKER) {
            port_conflict = true;
            break;
        }
        if devtools_line_regex().is_match(&text) {
            confirmed = true;
            break;
        }
    }

    if port_conflict {
        process.close().await;
        return Err(ChromeError::PortConflict(port));
    }
    if !confirmed {
        process.close().await;
        return Err(ChromeError::LaunchUnconfirmed);
    }

    tokio::time::sleep(STARTUP_GRACE).await;

    match discover_page_endpoint(port).await {
        Ok(ws_url) => Ok((process, ws_url)),
        Err(e) => {
            process.close().await;
            Err(e)
        }
    }
}
