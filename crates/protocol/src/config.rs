use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HuddleConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub room: RoomConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Signaling server host name
    #[serde(default = "default_host")]
    pub host: String,
    /// Signaling server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use `wss://` (default) instead of `ws://`
    #[serde(default = "default_true")]
    pub secure: bool,
    /// PEM certificate to trust in addition to the system roots
    pub tls_cert: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Room to join (random if absent)
    pub room_id: Option<String>,
    /// Our peer id (random if absent)
    pub peer_id: Option<String>,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Ask the server to negotiate H264 for video
    #[serde(default)]
    pub force_h264: bool,
    /// Ask the server to negotiate VP9 for video
    #[serde(default)]
    pub force_vp9: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Send microphone and camera
    #[serde(default = "default_true")]
    pub produce: bool,
    /// Receive other peers' media
    #[serde(default = "default_true")]
    pub consume: bool,
    /// Only gather TCP ICE candidates on the server side
    #[serde(default)]
    pub force_tcp: bool,
}

/// Request deadline and reconnect policy for the signaling socket.
///
/// Reconnect delay after `n` consecutive failures is
/// `min(reconnect_min_delay_ms * reconnect_factor^n, reconnect_max_delay_ms)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reconnect_retries")]
    pub reconnect_retries: u32,
    #[serde(default = "default_reconnect_factor")]
    pub reconnect_factor: u32,
    #[serde(default = "default_reconnect_min_delay_ms")]
    pub reconnect_min_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: true,
            tls_cert: None,
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            room_id: None,
            peer_id: None,
            display_name: default_display_name(),
            force_h264: false,
            force_vp9: false,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            produce: true,
            consume: true,
            force_tcp: false,
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_retries: default_reconnect_retries(),
            reconnect_factor: default_reconnect_factor(),
            reconnect_min_delay_ms: default_reconnect_min_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl HuddleConfig {
    /// Validate configuration values and return a list of issues.
    ///
    /// Each entry is prefixed with `ERROR:` (refuse to start) or
    /// `WARNING:` (start anyway, but the operator should look).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        // --- Server ---
        if self.server.host.trim().is_empty() {
            issues.push("ERROR: server.host must not be empty.".to_string());
        } else if self.server.host.contains("://") || self.server.host.contains('/') {
            issues.push(format!(
                "ERROR: server.host must be a bare host name, got '{}'. \
                 The scheme and path are added by the client.",
                self.server.host
            ));
        }
        if self.server.port == 0 {
            issues.push("ERROR: server.port must be between 1 and 65535, got 0.".to_string());
        }
        if let Some(cert) = &self.server.tls_cert {
            if !std::path::Path::new(cert).exists() {
                issues.push(format!(
                    "ERROR: tls_cert file '{}' does not exist. \
                     Remove it to rely on the system trust store.",
                    cert
                ));
            }
            if !self.server.secure {
                issues.push(
                    "WARNING: tls_cert is set but server.secure is false. \
                     The certificate is ignored for plain ws:// connections."
                        .to_string(),
                );
            }
        }

        // --- Room ---
        if self.room.display_name.trim().is_empty() {
            issues.push(
                "WARNING: room.display_name is empty. Other peers will see a blank name."
                    .to_string(),
            );
        }
        if self.room.force_h264 && self.room.force_vp9 {
            issues.push(
                "WARNING: room.force_h264 and room.force_vp9 are both set. H264 takes precedence."
                    .to_string(),
            );
        }
        for (key, value) in [("room_id", &self.room.room_id), ("peer_id", &self.room.peer_id)] {
            if let Some(id) = value
                && id.trim().is_empty()
            {
                issues.push(format!(
                    "ERROR: room.{key} is set but empty. Omit it to get a random id."
                ));
            }
        }

        // --- Media ---
        if !self.media.produce && !self.media.consume {
            issues.push(
                "WARNING: media.produce and media.consume are both false. \
                 The client will join the room without sending or receiving media."
                    .to_string(),
            );
        }

        // --- Signaling ---
        if self.signaling.request_timeout_ms < 1000 {
            issues.push(format!(
                "ERROR: signaling.request_timeout_ms must be at least 1000, got {}.",
                self.signaling.request_timeout_ms
            ));
        }
        if self.signaling.reconnect_factor == 0 {
            issues.push("ERROR: signaling.reconnect_factor must be >= 1.".to_string());
        }
        if self.signaling.reconnect_min_delay_ms == 0 {
            issues.push("ERROR: signaling.reconnect_min_delay_ms must be >= 1.".to_string());
        }
        if self.signaling.reconnect_min_delay_ms > self.signaling.reconnect_max_delay_ms {
            issues.push(format!(
                "ERROR: signaling.reconnect_min_delay_ms ({}) must not exceed \
                 signaling.reconnect_max_delay_ms ({}).",
                self.signaling.reconnect_min_delay_ms, self.signaling.reconnect_max_delay_ms
            ));
        }
        if self.signaling.reconnect_retries == 0 {
            issues.push(
                "WARNING: signaling.reconnect_retries is 0. \
                 The room closes on the first lost connection."
                    .to_string(),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_host() -> String {
    "v3demo.mediasoup.org".to_string()
}
fn default_port() -> u16 {
    4443
}
fn default_true() -> bool {
    true
}
fn default_display_name() -> String {
    "Rustacean".to_string()
}
fn default_request_timeout_ms() -> u64 {
    20_000
}
fn default_reconnect_retries() -> u32 {
    10
}
fn default_reconnect_factor() -> u32 {
    2
}
fn default_reconnect_min_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    8000
}
