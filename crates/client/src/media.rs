//! Interfaces to the media stack the room client drives.
//!
//! The room client never touches RTP, ICE or DTLS itself. It asks a [`Device`]
//! for transports, hands the opaque negotiation blobs back and forth over
//! signaling, and tracks the resulting [`Producer`]s and [`Consumer`]s.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use huddle_protocol::{MediaKind, TransportInfo};
use serde_json::Value;

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MediaError(pub String);

impl MediaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Handle to a captured local track. The media stack keeps the real source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
}

/// Invoked at most once, with the producer or consumer id, when the owning
/// transport closes underneath it.
pub type TransportCloseCallback = Box<dyn FnOnce(String) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Recv,
}

/// Builds a fresh, unloaded [`Device`]. Called once per join.
pub type DeviceFactory = Box<dyn Fn() -> Box<dyn Device> + Send>;

/// Capability handle: loads router capabilities and builds transports.
pub trait Device: Send {
    fn load(&mut self, router_rtp_capabilities: &Value) -> Result<(), MediaError>;
    fn is_loaded(&self) -> bool;
    fn can_produce(&self, kind: MediaKind) -> bool;
    fn rtp_capabilities(&self) -> Value;

    fn create_send_transport(
        &mut self,
        info: TransportInfo,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn SendTransport>, MediaError>;

    fn create_recv_transport(
        &mut self,
        info: TransportInfo,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn RecvTransport>, MediaError>;
}

/// Callbacks a transport raises toward signaling.
pub trait TransportListener: Send + Sync {
    /// The send transport needs a server-side producer id for a new stream.
    fn on_produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> BoxFuture<'static, Result<String, SessionError>>;

    /// Local DTLS parameters are ready. Fire-and-forget.
    fn on_connect(&self, transport_id: &str, dtls_parameters: Value);

    fn on_connection_state_change(&self, transport_id: &str, state: &str);
}

pub trait Transport: Send {
    fn id(&self) -> &str;
    fn restart_ice(&mut self, ice_parameters: Value) -> Result<(), MediaError>;
    /// Closes the transport and every producer/consumer still bound to it.
    fn close(&mut self);
}

pub trait SendTransport: Transport {
    fn produce(
        &mut self,
        track: LocalTrack,
        app_data: Value,
        on_transport_close: TransportCloseCallback,
    ) -> BoxFuture<'_, Result<Box<dyn Producer>, SessionError>>;
}

#[derive(Debug, Clone)]
pub struct ConsumeParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

pub trait RecvTransport: Transport {
    fn consume(
        &mut self,
        params: ConsumeParams,
        on_transport_close: TransportCloseCallback,
    ) -> Result<Box<dyn Consumer>, MediaError>;
}

pub trait Producer: Send {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn paused(&self) -> bool;
    fn pause(&mut self);
    fn resume(&mut self);
    fn close(&mut self);
}

pub trait Consumer: Send {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn paused(&self) -> bool;
    fn pause(&mut self);
    fn resume(&mut self);
    fn close(&mut self);
}

/// Microphone and camera acquisition.
pub trait MediaSource: Send {
    fn create_audio_track(&mut self) -> Result<LocalTrack, MediaError>;
    fn create_video_track(&mut self) -> Result<LocalTrack, MediaError>;
    fn switch_camera(&mut self) -> Result<(), MediaError>;
    /// Releases every track and capturer. Called once, on room close.
    fn dispose(&mut self);
}
