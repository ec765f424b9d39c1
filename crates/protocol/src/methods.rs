//! Method names and typed payloads for the mediasoup room protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::Notification;

pub mod method {
    pub const GET_ROUTER_RTP_CAPABILITIES: &str = "getRouterRtpCapabilities";
    pub const JOIN: &str = "join";
    pub const CREATE_WEBRTC_TRANSPORT: &str = "createWebRtcTransport";
    pub const CONNECT_WEBRTC_TRANSPORT: &str = "connectWebRtcTransport";
    pub const RESTART_ICE: &str = "restartIce";
    pub const PRODUCE: &str = "produce";
    pub const CLOSE_PRODUCER: &str = "closeProducer";
    pub const PAUSE_PRODUCER: &str = "pauseProducer";
    pub const RESUME_PRODUCER: &str = "resumeProducer";
    pub const PAUSE_CONSUMER: &str = "pauseConsumer";
    pub const RESUME_CONSUMER: &str = "resumeConsumer";
    pub const REQUEST_CONSUMER_KEY_FRAME: &str = "requestConsumerKeyFrame";
    pub const CHANGE_DISPLAY_NAME: &str = "changeDisplayName";

    // Server-initiated requests
    pub const NEW_CONSUMER: &str = "newConsumer";
    pub const NEW_DATA_CONSUMER: &str = "newDataConsumer";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client device metadata announced in `join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub flag: String,
    pub name: String,
    pub version: String,
}

impl DeviceInfo {
    pub fn unknown() -> Self {
        Self {
            flag: "unknown".to_string(),
            name: "unknown".to_string(),
            version: "unknown".to_string(),
        }
    }

    /// Describes this build: `rust` flag, host OS/arch, crate version.
    pub fn native() -> Self {
        Self {
            flag: "rust".to_string(),
            name: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "DeviceInfo::unknown")]
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub display_name: String,
    pub device: DeviceInfo,
    pub rtp_capabilities: Option<Value>,
    pub sctp_capabilities: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinResponse {
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebRtcTransportRequest {
    pub force_tcp: bool,
    pub producing: bool,
    pub consuming: bool,
    pub sctp_capabilities: Option<Value>,
}

/// Server-side parameters of a freshly created transport leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    #[serde(default)]
    pub sctp_parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectWebRtcTransportRequest {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartIceRequest {
    pub transport_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProduceResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    pub producer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRequest {
    pub consumer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDisplayNameRequest {
    pub display_name: String,
}

/// Body of the server-initiated `newConsumer` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsumer {
    pub peer_id: String,
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(rename = "type", default)]
    pub consumer_type: String,
    #[serde(default)]
    pub app_data: Value,
    #[serde(default)]
    pub producer_paused: bool,
}

/// Server notifications the room client understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerNotification {
    NewPeer(PeerInfo),
    PeerClosed {
        peer_id: String,
    },
    PeerDisplayNameChanged {
        peer_id: String,
        display_name: String,
        #[serde(default)]
        old_display_name: String,
    },
    ConsumerClosed {
        consumer_id: String,
    },
    ConsumerPaused {
        consumer_id: String,
    },
    ConsumerResumed {
        consumer_id: String,
    },
    ConsumerLayersChanged {
        consumer_id: String,
        #[serde(default)]
        spatial_layer: Option<i64>,
        #[serde(default)]
        temporal_layer: Option<i64>,
    },
    ConsumerScore {
        consumer_id: String,
        #[serde(default)]
        score: Value,
    },
    ProducerScore {
        producer_id: String,
        #[serde(default)]
        score: Value,
    },
    ActiveSpeaker {
        #[serde(default)]
        peer_id: Option<String>,
    },
    DataConsumerClosed {
        data_consumer_id: String,
    },
    DownlinkBwe(Value),
}

impl TryFrom<&Notification> for ServerNotification {
    type Error = serde_json::Error;

    fn try_from(notification: &Notification) -> Result<Self, Self::Error> {
        serde_json::from_value(serde_json::json!({
            "method": notification.method,
            "data": notification.data,
        }))
    }
}
