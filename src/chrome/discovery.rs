use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::Deserialize;

use super::ChromeError;

/// Information about a single debuggable target (tab, service worker, etc.)
/// returned by `/json/list` and `/json/new`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target type (e.g. "page", "`background_page`").
    #[serde(rename = "type")]
    pub target_type: String,

    /// WebSocket URL to debug this specific target.
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_debugger_url: Option<String>,
}

/// Discover a page-level CDP endpoint on a running browser's HTTP discovery
/// port.
///
/// First tries `GET /json/list` and takes the first entry whose `type` is
/// `"page"`. If none qualify, falls back to `GET /json/new`, which asks the
/// browser to open a fresh tab.
///
/// # Errors
///
/// Returns `ChromeError::HttpError` if neither endpoint responds, or
/// `ChromeError::ParseError` if a response can't be parsed into a usable
/// endpoint.
pub async fn discover_page_endpoint(port: u16) -> Result<String, ChromeError> {
    let list_body = http_get(port, "/json/list").await?;
    let targets: Vec<TargetInfo> = serde_json::from_str(&list_body)
        .map_err(|e| ChromeError::ParseError(format!("/json/list: {e}")))?;

    if let Some(url) = targets
        .into_iter()
        .find(|t| t.target_type == "page")
        .and_then(|t| t.ws_debugger_url)
    {
        return Ok(url);
    }

    let new_body = http_get(port, "/json/new").await?;
    let created: TargetInfo = serde_json::from_str(&new_body)
        .map_err(|e| ChromeError::ParseError(format!("/json/new: {e}")))?;
    created
        .ws_debugger_url
        .ok_or_else(|| ChromeError::ParseError("/json/new: missing webSocketDebuggerUrl".into()))
}

/// Check whether `buf` contains a complete HTTP response (headers + full body per Content-Length).
fn is_http_response_complete(buf: &[u8]) -> bool {
    let Some(header_end) = find_header_end(buf) else {
        return false;
    };
    let body_start = header_end + 4; // skip past \r\n\r\n
    let headers = &buf[..header_end];
    match parse_content_length(headers) {
        Some(cl) => buf.len() >= body_start + cl,
        None => true, // no Content-Length; headers are complete, assume body is too
    }
}

/// Find the byte offset of `\r\n\r\n` in `buf`, returning the position of the first `\r`.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse `Content-Length` from raw header bytes (case-insensitive).
fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let header_str = std::str::from_utf8(headers).ok()?;
    for line in header_str.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

/// Parse a raw HTTP response buffer into the body string.
fn parse_http_response(buf: &[u8]) -> Result<String, ChromeError> {
    let header_end = find_header_end(buf)
        .ok_or_else(|| ChromeError::HttpError("malformed HTTP response".into()))?;
    let body_start = header_end + 4;

    let headers = std::str::from_utf8(&buf[..header_end])
        .map_err(|e| ChromeError::HttpError(format!("invalid UTF-8 in headers: {e}")))?;

    let status_line = headers
        .lines()
        .next()
        .ok_or_else(|| ChromeError::HttpError("empty response".into()))?;
    if !status_line.contains(" 200 ") {
        return Err(ChromeError::HttpError(format!(
            "unexpected HTTP status: {status_line}"
        )));
    }

    let body_bytes = if let Some(cl) = parse_content_length(&buf[..header_end]) {
        let end = (body_start + cl).min(buf.len());
        &buf[body_start..end]
    } else {
        &buf[body_start..]
    };

    String::from_utf8(body_bytes.to_vec())
        .map_err(|e| ChromeError::HttpError(format!("invalid UTF-8 in body: {e}")))
}

/// Perform a simple HTTP GET request against `localhost:<port>` using
/// blocking I/O inside a `spawn_blocking` context.
async fn http_get(port: u16, path: &str) -> Result<String, ChromeError> {
    let addr = format!("127.0.0.1:{port}");
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost:{port}\r\nConnection: close\r\n\r\n");

    tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect_timeout(
            &addr
                .parse()
                .map_err(|e| ChromeError::HttpError(format!("invalid address: {e}")))?,
            Duration::from_secs(2),
        )
        .map_err(|e| ChromeError::HttpError(format!("connection failed to {addr}: {e}")))?;

        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

        stream
            .write_all(request.as_bytes())
            .map_err(|e| ChromeError::HttpError(format!("write failed: {e}")))?;

        let mut buf = Vec::with_capacity(4096);
        let mut tmp = [0u8; 4096];
        loop {
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    if is_http_response_complete(&buf) {
                        break;
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if is_http_response_complete(&buf) {
                        break;
                    }
                    return Err(ChromeError::HttpError(format!("read timed out: {e}")));
                }
                Err(e) => {
                    return Err(ChromeError::HttpError(format!("read failed: {e}")));
                }
            }
        }

        parse_http_response(&buf)
    })
    .await
    .map_err(|e| ChromeError::HttpError(format!("task join failed: {e}")))?
}
