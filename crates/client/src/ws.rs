//! WebSocket [`Connector`] speaking the `protoo` sub-protocol.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{Sink, SinkExt, StreamExt};
use huddle_protocol::SignalingConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::signaling::{Connector, WireCommand, WireEvent, WireLink};

const PROTOO_SUBPROTOCOL: &str = "protoo";
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect schedule: `min_delay * factor^attempt`, capped at `max_delay`,
/// giving up after `retries` consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub factor: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SignalingConfig::default())
    }
}

impl From<&SignalingConfig> for RetryPolicy {
    fn from(config: &SignalingConfig) -> Self {
        Self {
            retries: config.reconnect_retries,
            factor: config.reconnect_factor,
            min_delay: Duration::from_millis(config.reconnect_min_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), or `None` once exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.retries {
            return None;
        }
        let scale = self.factor.saturating_pow(attempt);
        Some(self.min_delay.saturating_mul(scale).min(self.max_delay))
    }
}

pub struct WsConnector {
    tls_cert_path: Option<String>,
    retry: RetryPolicy,
}

impl WsConnector {
    pub fn new(tls_cert_path: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            tls_cert_path,
            retry,
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> WireLink {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_websocket(
            url.to_string(),
            self.tls_cert_path.clone(),
            self.retry.clone(),
            event_tx,
            command_rx,
        ));
        WireLink { events, commands }
    }
}

enum LinkEnd {
    LocalClose,
    RemoteClose(Option<String>),
}

async fn run_websocket(
    url: String,
    tls_cert_path: Option<String>,
    retry: RetryPolicy,
    events: mpsc::UnboundedSender<WireEvent>,
    mut commands: mpsc::UnboundedReceiver<WireCommand>,
) {
    let mut attempt = 0u32;
    let mut backlog: Vec<String> = Vec::new();

    loop {
        info!(url = %url, "Connecting to signaling server");
        let lost = match connect(&url, tls_cert_path.as_deref()).await {
            Ok(ws) => {
                attempt = 0;
                let _ = events.send(WireEvent::Opened);
                match pump(ws, &events, &mut commands, &mut backlog).await {
                    Ok(LinkEnd::LocalClose) => {
                        info!("Signaling socket closed locally");
                        let _ = events.send(WireEvent::Closed(None));
                        return;
                    }
                    Ok(LinkEnd::RemoteClose(reason)) => {
                        info!(?reason, "Signaling socket closed by server");
                        let _ = events.send(WireEvent::Closed(reason));
                        return;
                    }
                    Err(e) => WireEvent::Disconnected(format!("{e:#}")),
                }
            }
            Err(e) => WireEvent::Failed(format!("{e:#}")),
        };

        let Some(delay) = retry.delay(attempt) else {
            error!(attempts = attempt, "Giving up on signaling server");
            let _ = events.send(WireEvent::Closed(Some("reconnect attempts exhausted".into())));
            return;
        };
        attempt += 1;
        let _ = events.send(lost);
        info!("Reconnecting in {} ms...", delay.as_millis());
        if !backoff(delay, &mut commands, &mut backlog).await {
            let _ = events.send(WireEvent::Closed(None));
            return;
        }
    }
}

/// Sleep through the backoff, buffering outgoing frames. Returns `false` if
/// the owner closed the link meanwhile.
async fn backoff(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<WireCommand>,
    backlog: &mut Vec<String>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = commands.recv() => match cmd {
                Some(WireCommand::Send(text)) => backlog.push(text),
                Some(WireCommand::Close) | None => return false,
            },
        }
    }
}

/// Build a TLS connector, pinning the server certificate if a cert path is provided.
/// Falls back to system roots if no cert path is given.
fn build_tls_connector(tls_cert_path: Option<&str>) -> anyhow::Result<tokio_tungstenite::Connector> {
    let mut root_store = rustls::RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("Could not load a platform certificate: {e}");
    }
    for cert in native.certs {
        let _ = root_store.add(cert);
    }

    if let Some(cert_path) = tls_cert_path {
        match std::fs::read(cert_path) {
            Ok(pem_data) => {
                let certs: Vec<_> = rustls_pemfile::certs(&mut pem_data.as_slice())
                    .filter_map(|r| r.ok())
                    .collect();
                for cert in certs {
                    if let Err(e) = root_store.add(cert) {
                        warn!("Failed to add pinned cert to root store: {e}");
                    } else {
                        info!("Pinned server certificate from {cert_path}");
                    }
                }
            }
            Err(e) => {
                warn!("Failed to read TLS cert from {cert_path}: {e}, falling back to system roots");
            }
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Unsupported TLS protocol versions")?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(tokio_tungstenite::Connector::Rustls(Arc::new(tls_config)))
}

async fn connect(url: &str, tls_cert_path: Option<&str>) -> anyhow::Result<WsStream> {
    let mut request = url
        .into_client_request()
        .context("Invalid signaling URL")?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(PROTOO_SUBPROTOCOL),
    );

    let connector = build_tls_connector(tls_cert_path)?;
    let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
    let (ws_stream, _) = tokio_tungstenite::connect_async_tls_with_config(
        request,
        Some(ws_config),
        false,
        Some(connector),
    )
    .await
    .context("WebSocket connection failed")?;

    info!("Connected to signaling server");
    Ok(ws_stream)
}

async fn pump(
    ws: WsStream,
    events: &mpsc::UnboundedSender<WireEvent>,
    commands: &mut mpsc::UnboundedReceiver<WireCommand>,
    backlog: &mut Vec<String>,
) -> anyhow::Result<LinkEnd> {
    let (mut ws_tx, mut ws_rx) = ws.split();

    if !backlog.is_empty() {
        debug!(count = backlog.len(), "Flushing frames queued while offline");
    }
    let mut queued = std::mem::take(backlog).into_iter();
    while let Some(text) = queued.next() {
        if let Err(e) = send_text(&mut ws_tx, text, backlog).await {
            backlog.extend(queued);
            return Err(e);
        }
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(WireEvent::Text(text.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(LinkEnd::RemoteClose(frame.map(|f| f.reason.to_string())));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("signaling socket ended without a close frame"),
            },
            cmd = commands.recv() => match cmd {
                Some(WireCommand::Send(text)) => send_text(&mut ws_tx, text, backlog).await?,
                Some(WireCommand::Close) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(LinkEnd::LocalClose);
                }
            },
        }
    }
}

/// Write one frame. A frame the socket refused goes back on the backlog so the
/// next connection sends it.
async fn send_text<S>(sink: &mut S, text: String, backlog: &mut Vec<String>) -> anyhow::Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    if let Err(e) = sink.send(Message::Text(text.clone().into())).await {
        backlog.push(text);
        return Err(e.into());
    }
    Ok(())
}
