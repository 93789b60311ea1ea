//! WebSocket client for a DevTools page target.
//!
//! Connects to a running Chromium instance via its DevTools WebSocket
//! endpoint and provides JSON-RPC command/response correlation plus event
//! fan-out. Commands are sent with auto-incrementing ids; a background
//! reader task routes each incoming frame either to the pending command it
//! answers or onto the event channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::CdpError;
use crate::message::{CdpEvent, CdpMessage, CdpResponse};
use crate::session::CdpSession;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Shared state between the client handle and its reader task.
struct Shared {
    /// Pending commands awaiting responses: id -> oneshot sender.
    pending: std::sync::Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>,
    /// Set by the reader task when the connection ends.
    closed_reason: std::sync::Mutex<Option<String>>,
}

/// A command serialized onto the wire.
#[derive(serde::Serialize)]
struct OutboundCommand<'a> {
    id: u64,
    method: &'a str,
    params: &'a Value,
}

/// DevTools WebSocket client for a single page target.
pub struct CdpClient {
    next_id: AtomicU64,
    shared: Arc<Shared>,
    writer: Mutex<WsSink>,
    /// Taken once by whoever drives event dispatch.
    event_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<CdpEvent>>>,
    command_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint.
    ///
    /// The `ws_url` is of the form `ws://localhost:{port}/devtools/page/{id}`
    /// and can be obtained from the browser's `/json` HTTP endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self, CdpError> {
        tracing::info!(url = ws_url, "connecting to DevTools WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| CdpError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = ws_stream.split();

        let shared = Arc::new(Shared {
            pending: std::sync::Mutex::new(HashMap::new()),
            closed_reason: std::sync::Mutex::new(None),
        });
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader_shared = Arc::clone(&shared);
        let reader_handle = tokio::spawn(async move {
            read_loop(reader, reader_shared, event_tx).await;
        });

        tracing::info!(url = ws_url, "DevTools WebSocket connection established");

        Ok(Self {
            next_id: AtomicU64::new(1),
            shared,
            writer: Mutex::new(writer),
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            command_timeout: Duration::from_secs(30),
            _reader_handle: reader_handle,
        })
    }

    /// Take ownership of the event stream.
    ///
    /// Returns `None` on the second call; exactly one consumer drives
    /// dispatch.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<CdpEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Send a command and wait for its response under the default timeout.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.send_command_with_timeout(method, params, self.command_timeout)
            .await
    }

    /// Send a command with an explicit timeout.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        if let Some(reason) = self.closed() {
            return Err(CdpError::SessionClosed { reason });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&OutboundCommand {
            id,
            method,
            params: &params,
        })
        .map_err(|e| CdpError::Protocol {
            detail: format!("failed to serialize command: {e}"),
        })?;

        tracing::debug!(id, method, "sending command");

        // Register the pending response before sending to avoid races.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.insert(id, tx);
        }

        {
            let mut writer = self.writer.lock().await;
            writer
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| CdpError::Protocol {
                    detail: format!("failed to send WebSocket message: {e}"),
                })?;
        }

        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| CdpError::Timeout {
                method: method.to_string(),
                duration: timeout,
            })?
            .map_err(|_| CdpError::SessionClosed {
                reason: self
                    .closed()
                    .unwrap_or_else(|| "connection closed".to_string()),
            })?;

        if let Some(err) = response.error {
            return Err(CdpError::Browser {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    fn closed(&self) -> Option<String> {
        self.shared
            .closed_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CdpSession for CdpClient {
    async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.send_command(method, params).await
    }

    fn closed_reason(&self) -> Option<String> {
        self.closed()
    }
}

/// Background task: reads WebSocket frames and routes them.
///
/// Responses resolve their pending command; events go to the event channel.
/// When the stream ends, all pending commands are failed and the close
/// reason is recorded.
async fn read_loop(
    mut reader: WsSource,
    shared: Arc<Shared>,
    event_tx: mpsc::UnboundedSender<CdpEvent>,
) {
    let mut close_reason = "connection closed".to_string();

    while let Some(msg_result) = reader.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket read error, stopping reader");
                close_reason = format!("WebSocket read error: {e}");
                break;
            }
        };

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Message::Close(frame) => {
                tracing::info!("WebSocket closed by remote");
                if let Some(frame) = frame {
                    close_reason = format!("closed by remote: {}", frame.reason);
                } else {
                    close_reason = "closed by remote".to_string();
                }
                break;
            }
            _ => continue,
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse protocol frame as JSON");
                continue;
            }
        };

        match CdpMessage::parse(&json) {
            Some(CdpMessage::Response(response)) => {
                let tx = {
                    let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
                    pending.remove(&response.id)
                };
                match tx {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::debug!(id = response.id, "response for unknown command id");
                    }
                }
            }
            Some(CdpMessage::Event(event)) => {
                // If nobody is listening the event is simply dropped.
                let _ = event_tx.send(event);
            }
            None => {
                tracing::debug!("unrecognizable protocol frame");
            }
        }
    }

    // Record why the session ended, then cancel everything still pending.
    {
        let mut reason = shared
            .closed_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        reason.get_or_insert(close_reason);
    }

    let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
    pending.clear();
}
