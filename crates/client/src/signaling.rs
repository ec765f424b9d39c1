//! Request/response correlation over the room signaling socket.
//!
//! [`SignalingChannel`] sits on top of a [`WireLink`] (text frames plus
//! connection events) produced by a [`Connector`]. A pump task owns the
//! inbound side: responses resolve pending requests directly, everything else
//! is forwarded as a [`SignalingEvent`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use huddle_protocol::{Message, Notification, Request, RequestId, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::SessionError;

/// Connection-level events produced by a [`Connector`].
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Opened,
    Text(String),
    /// A connection attempt failed; the connector will retry.
    Failed(String),
    /// An open connection was lost; the connector will retry.
    Disconnected(String),
    /// No more frames will arrive.
    Closed(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireCommand {
    Send(String),
    Close,
}

pub struct WireLink {
    pub events: mpsc::UnboundedReceiver<WireEvent>,
    pub commands: mpsc::UnboundedSender<WireCommand>,
}

/// Opens the socket for a room URL and keeps it alive.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> WireLink;
}

#[derive(Debug)]
pub enum SignalingEvent {
    Opened,
    Request(ServerRequest),
    Notification(Notification),
    Failed,
    Disconnected,
    Closed,
}

struct PendingRequest {
    method: String,
    sent_at: Instant,
    tx: oneshot::Sender<Result<Value, SessionError>>,
}

struct ChannelInner {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    commands: mpsc::UnboundedSender<WireCommand>,
    closed: AtomicBool,
    request_timeout: Duration,
}

#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<ChannelInner>,
}

impl SignalingChannel {
    /// Start pumping `link`. Must be called inside a Tokio runtime.
    pub fn open(
        link: WireLink,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let WireLink { events, commands } = link;
        let channel = Self {
            inner: Arc::new(ChannelInner {
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                commands,
                closed: AtomicBool::new(false),
                request_timeout,
            }),
        };
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(channel.clone().pump(events, event_tx));
        (channel, event_rx)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn pending_requests(&self) -> usize {
        self.lock_pending().len()
    }

    /// Send a request and wait for its response, rejection, timeout or
    /// channel closure, whichever comes first.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<Value, SessionError> {
        let data =
            serde_json::to_value(body).map_err(|e| SessionError::invalid_payload(method, e))?;
        self.request_value(method, data).await
    }

    /// [`request`](Self::request), decoding the response body.
    pub async fn request_as<R: DeserializeOwned, T: Serialize + ?Sized>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<R, SessionError> {
        let data = self.request(method, body).await?;
        serde_json::from_value(data).map_err(|e| SessionError::invalid_payload(method, e))
    }

    pub async fn request_value(&self, method: &str, data: Value) -> Result<Value, SessionError> {
        if self.is_closed() {
            return Err(SessionError::ChannelClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let text = Message::Request(Request {
            id,
            method: method.to_string(),
            data,
        })
        .to_text()
        .map_err(|e| SessionError::invalid_payload(method, e))?;

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(
            id,
            PendingRequest {
                method: method.to_string(),
                sent_at: Instant::now(),
                tx,
            },
        );
        if self.inner.commands.send(WireCommand::Send(text)).is_err() {
            self.lock_pending().remove(&id);
            return Err(SessionError::ChannelClosed);
        }
        debug!(id, method, "Request sent");

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::ChannelClosed),
            Err(_) => {
                self.lock_pending().remove(&id);
                warn!(id, method, "Request timed out");
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    timeout: self.inner.request_timeout,
                })
            }
        }
    }

    /// Close the socket and cancel every pending request. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing signaling channel");
        let _ = self.inner.commands.send(WireCommand::Close);
        self.cancel_pending();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel_pending(&self) {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Cancelling pending requests");
        }
        for (_, pending) in drained {
            let _ = pending.tx.send(Err(SessionError::ChannelClosed));
        }
    }

    fn resolve(&self, response: Response) {
        let Some(pending) = self.lock_pending().remove(&response.id) else {
            warn!(id = response.id, "Response for unknown or expired request");
            return;
        };
        let elapsed_ms = pending.sent_at.elapsed().as_millis() as u64;
        let result = match response.result {
            Ok(data) => {
                debug!(id = response.id, method = %pending.method, elapsed_ms, "Request accepted");
                Ok(data)
            }
            Err(body) => {
                debug!(id = response.id, method = %pending.method, code = body.code, "Request rejected");
                Err(SessionError::RequestRejected {
                    method: pending.method,
                    code: body.code,
                    reason: body.reason,
                })
            }
        };
        let _ = pending.tx.send(result);
    }

    async fn pump(
        self,
        mut events: mpsc::UnboundedReceiver<WireEvent>,
        event_tx: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                WireEvent::Opened => {
                    info!("Signaling channel open");
                    let _ = event_tx.send(SignalingEvent::Opened);
                }
                WireEvent::Text(text) => match Message::parse(&text) {
                    Ok(Message::Response(response)) => self.resolve(response),
                    Ok(Message::Request(request)) => {
                        debug!(id = request.id, method = %request.method, "Server request");
                        let request = ServerRequest::new(request, self.inner.commands.clone());
                        let _ = event_tx.send(SignalingEvent::Request(request));
                    }
                    Ok(Message::Notification(notification)) => {
                        debug!(method = %notification.method, "Server notification");
                        let _ = event_tx.send(SignalingEvent::Notification(notification));
                    }
                    Err(e) => warn!("Invalid signaling message: {e}"),
                },
                WireEvent::Failed(reason) => {
                    warn!("Signaling connection attempt failed: {reason}");
                    self.cancel_pending();
                    let _ = event_tx.send(SignalingEvent::Failed);
                }
                WireEvent::Disconnected(reason) => {
                    warn!("Signaling connection lost: {reason}");
                    self.cancel_pending();
                    let _ = event_tx.send(SignalingEvent::Disconnected);
                }
                WireEvent::Closed(reason) => {
                    info!(reason = reason.as_deref().unwrap_or(""), "Signaling channel closed");
                    self.inner.closed.store(true, Ordering::Release);
                    self.cancel_pending();
                    let _ = event_tx.send(SignalingEvent::Closed);
                    return;
                }
            }
        }

        // Connector went away without saying goodbye.
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.cancel_pending();
            let _ = event_tx.send(SignalingEvent::Closed);
        }
    }
}

/// A request pushed by the server. Must be answered exactly once with
/// [`accept`](Self::accept) or [`reject`](Self::reject).
pub struct ServerRequest {
    pub id: RequestId,
    pub method: String,
    pub data: Value,
    responder: Option<mpsc::UnboundedSender<WireCommand>>,
}

impl ServerRequest {
    fn new(request: Request, responder: mpsc::UnboundedSender<WireCommand>) -> Self {
        Self {
            id: request.id,
            method: request.method,
            data: request.data,
            responder: Some(responder),
        }
    }

    pub fn accept(mut self, data: Value) {
        debug!(id = self.id, method = %self.method, "Accepting server request");
        self.respond(Response::ok(self.id, data));
    }

    pub fn reject(mut self, code: i64, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(id = self.id, method = %self.method, code, %reason, "Rejecting server request");
        self.respond(Response::error(self.id, code, reason));
    }

    fn respond(&mut self, response: Response) {
        let Some(responder) = self.responder.take() else {
            return;
        };
        match Message::Response(response).to_text() {
            Ok(text) => {
                let _ = responder.send(WireCommand::Send(text));
            }
            Err(e) => error!(id = self.id, "Failed to encode response: {e}"),
        }
    }
}

impl std::fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("answered", &self.responder.is_none())
            .finish()
    }
}

impl Drop for ServerRequest {
    fn drop(&mut self) {
        if self.responder.is_some() {
            warn!(id = self.id, method = %self.method, "Server request dropped unanswered");
        }
    }
}
