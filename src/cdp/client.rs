use base64::Engine as _;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

use super::error::CdpError;
use super::transport::{ReconnectConfig, TransportCommand, TransportHandle, spawn_transport};
use crate::pdf_options::PdfOptions;

/// Configuration for a CDP session connection.
#[derive(Debug, Clone)]
pub struct CdpConfig {
    /// Timeout for the initial WebSocket connection (default: 10s).
    pub connect_timeout: Duration,
    /// Timeout for individual CDP commands (default: 30s, per spec §4.3).
    pub command_timeout: Duration,
    /// Capacity of the internal command channel (default: 256).
    pub channel_capacity: usize,
    /// Reconnection settings for the underlying transport.
    pub reconnect: ReconnectConfig,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// A persistent bidirectional CDP connection to a single browser page.
///
/// Commands are correlated to their responses by a monotonically
/// increasing `id` owned by the background transport task (see
/// `cdp::transport`); events are logged and discarded since nothing above
/// this layer needs them for correctness.
#[derive(Debug)]
pub struct CdpSession {
    handle: TransportHandle,
    config: CdpConfig,
    url: String,
}

impl CdpSession {
    /// Connect to a page's CDP WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Connection` if the WebSocket handshake fails, or
    /// `CdpError::ConnectionTimeout` if it exceeds the configured timeout.
    pub async fn connect(url: &str, config: CdpConfig) -> Result<Self, CdpError> {
        let handle = spawn_transport(
            url,
            config.channel_capacity,
            config.reconnect.clone(),
            config.connect_timeout,
        )
        .await?;

        Ok(Self {
            handle,
            config,
            url: url.to_owned(),
        })
    }

    /// Send a raw CDP command with a populated `params` object (empty if
    /// the caller has nothing to send) and await its response.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::CommandTimeout` if Chrome does not respond within
    /// the configured deadline, `CdpError::Protocol` if Chrome returns an
    /// `error` field, or `CdpError::Internal` if the transport task exited.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        let id = self.handle.next_message_id();
        let command = super::types::CdpCommand {
            id,
            method: method.to_owned(),
            params: Some(params),
            session_id: None,
        };

        let (response_tx, response_rx) = oneshot::channel();
        let deadline = Instant::now() + self.config.command_timeout;

        self.handle
            .send(TransportCommand::SendCommand {
                command,
                response_tx,
                deadline,
            })
            .await?;

        response_rx
            .await
            .map_err(|_| CdpError::Internal("transport task exited before responding".into()))?
    }

    /// `Page.enable` — required once per session before navigation.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::send_command`].
    pub async fn enable_page(&self) -> Result<(), CdpError> {
        self.send_command("Page.enable", serde_json::json!({}))
            .await
            .map(|_| ())
    }

    /// Navigate to `url`, then settle with a fixed ~3s sleep.
    ///
    /// A non-empty `result.errorText` is logged as a warning (the
    /// navigation is considered to have proceeded); a top-level `error`
    /// field fails with [`CdpError::NavigationError`]. The settle sleep is
    /// a deliberate design choice (§9) rather than an event-based wait.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::NavigationError` on a protocol-level navigation
    /// failure, or any other error from [`Self::send_command`].
    pub async fn navigate(&self, url: &str) -> Result<(), CdpError> {
        match self
            .send_command("Page.navigate", serde_json::json!({ "url": url }))
            .await
        {
            Ok(value) => {
                if let Some(err_text) = value.get("errorText").and_then(Value::as_str) {
                    if !err_text.is_empty() {
                        tracing::warn!(
                            url,
                            error_text = err_text,
                            "Page.navigate reported a non-fatal errorText"
                        );
                    }
                }
            }
            Err(CdpError::Protocol { message, .. }) => {
                return Err(CdpError::NavigationError(message));
            }
            Err(other) => return Err(other),
        }

        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok(())
    }

    /// `Page.printToPDF` with every option field populated; decodes
    /// `result.data` (base64) into raw PDF bytes.
    ///
    /// # Errors
    ///
    /// Returns `CdpError::PdfGenerationError` on any protocol error, a
    /// missing `data` field, or malformed base64.
    pub async fn print_to_pdf(&self, opts: &PdfOptions) -> Result<Vec<u8>, CdpError> {
        let params = serde_json::json!({
            "landscape": opts.landscape,
            "printBackground": opts.print_background,
            "scale": opts.scale,
            "paperWidth": opts.paper_width,
            "paperHeight": opts.paper_height,
            "marginTop": opts.margin_top,
            "marginBottom": opts.margin_bottom,
            "marginLeft": opts.margin_left,
            "marginRight": opts.margin_right,
            "pageRanges": opts.page_ranges,
            "preferCSSPageSize": opts.prefer_css_page_size,
        });

        let result = self
            .send_command("Page.printToPDF", params)
            .await
            .map_err(|e| match e {
                CdpError::Protocol { message, .. } => CdpError::PdfGenerationError(message),
                other => other,
            })?;

        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| CdpError::PdfGenerationError("result.data missing".into()))?;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| CdpError::PdfGenerationError(format!("invalid base64 data: {e}")))
    }

    /// Gracefully close the transport. Every still-pending command fails
    /// with [`CdpError::ConnectionClosed`].
    ///
    /// # Errors
    ///
    /// Returns `CdpError::Internal` if the transport task had already exited.
    pub async fn close(self) -> Result<(), CdpError> {
        self.handle.send(TransportCommand::Shutdown).await
    }

    /// Whether the underlying transport believes it is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// The page WebSocket URL this session is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}
