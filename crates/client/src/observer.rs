//! Room state as seen from outside the worker.
//!
//! The worker owns every live object. Observers only ever receive
//! [`RoomEvent`] values describing what changed; [`RoomStore`] folds them into
//! a [`RoomSnapshot`] that can be cloned out at any time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use huddle_protocol::{MediaKind, PeerInfo};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Closed,
}

/// Who paused or resumed a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: String,
    pub level: NoticeLevel,
    pub text: String,
    pub timeout: Duration,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, text.into(), Duration::from_millis(3000))
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, text.into(), Duration::from_millis(5000))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn new(level: NoticeLevel, text: String, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            level,
            text,
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub id: String,
    pub kind: MediaKind,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub id: String,
    pub peer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub consumer_type: String,
    pub locally_paused: bool,
    pub remotely_paused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    StateChanged(ConnectionState),
    DisplayNameChanged(String),
    MediaCapabilities {
        can_send_mic: bool,
        can_send_cam: bool,
    },
    AudioOnly(bool),
    AudioOnlyInProgress(bool),
    AudioMuted(bool),
    RestartIceInProgress(bool),
    CamInProgress(bool),
    PeerAdded(PeerInfo),
    PeerRemoved {
        peer_id: String,
    },
    PeerDisplayNameChanged {
        peer_id: String,
        display_name: String,
    },
    ActiveSpeaker(Option<String>),
    ProducerAdded(ProducerInfo),
    ProducerRemoved {
        producer_id: String,
    },
    ProducerPaused {
        producer_id: String,
    },
    ProducerResumed {
        producer_id: String,
    },
    ProducerScore {
        producer_id: String,
        score: Value,
    },
    ConsumerAdded(ConsumerInfo),
    ConsumerRemoved {
        peer_id: String,
        consumer_id: String,
    },
    ConsumerPaused {
        consumer_id: String,
        originator: Originator,
    },
    ConsumerResumed {
        consumer_id: String,
        originator: Originator,
    },
    ConsumerScore {
        consumer_id: String,
        score: Value,
    },
    Notify(Notice),
}

/// Sink for room events. Called from the worker task; must not block.
pub trait RoomObserver: Send + Sync {
    fn on_event(&self, event: RoomEvent);
}

impl RoomObserver for mpsc::UnboundedSender<RoomEvent> {
    fn on_event(&self, event: RoomEvent) {
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeState {
    pub display_name: String,
    pub can_send_mic: bool,
    pub can_send_cam: bool,
    pub audio_only: bool,
    pub audio_only_in_progress: bool,
    pub audio_muted: bool,
    pub restart_ice_in_progress: bool,
    pub cam_in_progress: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeerState {
    pub info: PeerInfo,
    pub consumers: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSnapshot {
    pub state: ConnectionState,
    pub me: MeState,
    pub peers: HashMap<String, PeerState>,
    pub producers: HashMap<String, ProducerInfo>,
    pub consumers: HashMap<String, ConsumerInfo>,
    pub active_speaker: Option<String>,
    pub notices: Vec<Notice>,
}

impl RoomSnapshot {
    pub fn apply(&mut self, event: &RoomEvent) {
        match event {
            RoomEvent::StateChanged(state) => {
                self.state = *state;
                if *state == ConnectionState::Closed {
                    self.peers.clear();
                    self.producers.clear();
                    self.consumers.clear();
                    self.active_speaker = None;
                }
            }
            RoomEvent::DisplayNameChanged(name) => self.me.display_name = name.clone(),
            RoomEvent::MediaCapabilities {
                can_send_mic,
                can_send_cam,
            } => {
                self.me.can_send_mic = *can_send_mic;
                self.me.can_send_cam = *can_send_cam;
            }
            RoomEvent::AudioOnly(on) => self.me.audio_only = *on,
            RoomEvent::AudioOnlyInProgress(on) => self.me.audio_only_in_progress = *on,
            RoomEvent::AudioMuted(on) => self.me.audio_muted = *on,
            RoomEvent::RestartIceInProgress(on) => self.me.restart_ice_in_progress = *on,
            RoomEvent::CamInProgress(on) => self.me.cam_in_progress = *on,
            RoomEvent::PeerAdded(info) => {
                let consumers = self
                    .peers
                    .remove(&info.id)
                    .map(|p| p.consumers)
                    .unwrap_or_default();
                self.peers.insert(
                    info.id.clone(),
                    PeerState {
                        info: info.clone(),
                        consumers,
                    },
                );
            }
            RoomEvent::PeerRemoved { peer_id } => {
                if let Some(peer) = self.peers.remove(peer_id) {
                    for consumer_id in &peer.consumers {
                        self.consumers.remove(consumer_id);
                    }
                }
                if self.active_speaker.as_deref() == Some(peer_id.as_str()) {
                    self.active_speaker = None;
                }
            }
            RoomEvent::PeerDisplayNameChanged {
                peer_id,
                display_name,
            } => {
                if let Some(peer) = self.peers.get_mut(peer_id) {
                    peer.info.display_name = display_name.clone();
                }
            }
            RoomEvent::ActiveSpeaker(peer_id) => self.active_speaker = peer_id.clone(),
            RoomEvent::ProducerAdded(info) => {
                self.producers.insert(info.id.clone(), info.clone());
            }
            RoomEvent::ProducerRemoved { producer_id } => {
                self.producers.remove(producer_id);
            }
            RoomEvent::ProducerPaused { producer_id } => {
                if let Some(p) = self.producers.get_mut(producer_id) {
                    p.paused = true;
                }
            }
            RoomEvent::ProducerResumed { producer_id } => {
                if let Some(p) = self.producers.get_mut(producer_id) {
                    p.paused = false;
                }
            }
            RoomEvent::ConsumerAdded(info) => {
                if let Some(peer) = self.peers.get_mut(&info.peer_id) {
                    peer.consumers.insert(info.id.clone());
                }
                self.consumers.insert(info.id.clone(), info.clone());
            }
            RoomEvent::ConsumerRemoved {
                peer_id,
                consumer_id,
            } => {
                if let Some(peer) = self.peers.get_mut(peer_id) {
                    peer.consumers.remove(consumer_id);
                }
                self.consumers.remove(consumer_id);
            }
            RoomEvent::ConsumerPaused {
                consumer_id,
                originator,
            } => self.set_consumer_paused(consumer_id, *originator, true),
            RoomEvent::ConsumerResumed {
                consumer_id,
                originator,
            } => self.set_consumer_paused(consumer_id, *originator, false),
            RoomEvent::ProducerScore { .. } | RoomEvent::ConsumerScore { .. } => {}
            RoomEvent::Notify(notice) => self.notices.push(notice.clone()),
        }
    }

    fn set_consumer_paused(&mut self, consumer_id: &str, originator: Originator, paused: bool) {
        if let Some(c) = self.consumers.get_mut(consumer_id) {
            match originator {
                Originator::Local => c.locally_paused = paused,
                Originator::Remote => c.remotely_paused = paused,
            }
        }
    }
}

/// Observer that keeps the latest [`RoomSnapshot`].
#[derive(Debug, Default)]
pub struct RoomStore {
    snapshot: Mutex<RoomSnapshot>,
}

impl RoomStore {
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl RoomObserver for RoomStore {
    fn on_event(&self, event: RoomEvent) {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .apply(&event);
    }
}
