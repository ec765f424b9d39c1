//! Room URLs: the protoo signaling endpoint and the shareable invitation link.

use uuid::Uuid;

use crate::config::{RoomConfig, ServerConfig};

/// Video codec the server should prefer when creating the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecPreference {
    #[default]
    ServerDefault,
    H264,
    Vp9,
}

impl CodecPreference {
    pub fn from_room(room: &RoomConfig) -> Self {
        if room.force_h264 {
            CodecPreference::H264
        } else if room.force_vp9 {
            CodecPreference::Vp9
        } else {
            CodecPreference::ServerDefault
        }
    }

    fn query_suffix(self) -> &'static str {
        match self {
            CodecPreference::ServerDefault => "",
            CodecPreference::H264 => "&forceH264=true",
            CodecPreference::Vp9 => "&forceVP9=true",
        }
    }
}

/// Eight lowercase characters, the same shape the demo web app generates.
pub fn random_room_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub fn random_peer_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub fn protoo_url(
    server: &ServerConfig,
    room_id: &str,
    peer_id: &str,
    codec: CodecPreference,
) -> String {
    let scheme = if server.secure { "wss" } else { "ws" };
    format!(
        "{scheme}://{}:{}/?roomId={}&peerId={}{}",
        server.host,
        server.port,
        urlencoding::encode(room_id),
        urlencoding::encode(peer_id),
        codec.query_suffix()
    )
}

/// Link another participant can open in a browser to land in the same room.
pub fn invitation_link(server: &ServerConfig, room_id: &str, codec: CodecPreference) -> String {
    let scheme = if server.secure { "https" } else { "http" };
    format!(
        "{scheme}://{}/?roomId={}{}",
        server.host,
        urlencoding::encode(room_id),
        codec.query_suffix()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protoo_url_for_demo_server() {
        let server = ServerConfig::default();
        let url = protoo_url(&server, "abc", "peer1", CodecPreference::ServerDefault);
        assert_eq!(url, "wss://v3demo.mediasoup.org:4443/?roomId=abc&peerId=peer1");
    }

    #[test]
    fn protoo_url_appends_codec_preference_and_encodes_ids() {
        let server = ServerConfig {
            host: "localhost".to_string(),
            port: 3000,
            secure: false,
            tls_cert: None,
        };
        let url = protoo_url(&server, "team room", "p&1", CodecPreference::Vp9);
        assert_eq!(
            url,
            "ws://localhost:3000/?roomId=team%20room&peerId=p%261&forceVP9=true"
        );
    }

    #[test]
    fn invitation_link_omits_port() {
        let server = ServerConfig::default();
        let link = invitation_link(&server, "abc", CodecPreference::H264);
        assert_eq!(link, "https://v3demo.mediasoup.org/?roomId=abc&forceH264=true");
    }

    #[test]
    fn h264_wins_when_both_codecs_forced() {
        let room = RoomConfig {
            force_h264: true,
            force_vp9: true,
            ..RoomConfig::default()
        };
        assert_eq!(CodecPreference::from_room(&room), CodecPreference::H264);
    }

    #[test]
    fn random_ids_are_short_and_distinct() {
        let a = random_room_id();
        let b = random_room_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert_eq!(random_peer_id().len(), 8);
    }
}
