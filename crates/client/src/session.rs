//! Worker-owned room state and the connection state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use huddle_protocol::{
    ChangeDisplayNameRequest, ConsumerRequest, DeviceInfo, HuddleConfig, JoinRequest,
    JoinResponse, MediaKind, method,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::consumer::ConsumerEntry;
use crate::error::SessionError;
use crate::media::{Device, DeviceFactory, MediaSource, Producer, RecvTransport, SendTransport};
use crate::observer::{ConnectionState, Notice, RoomEvent, RoomObserver};
use crate::producer::ProducerSlot;
use crate::signaling::{Connector, SignalingChannel, SignalingEvent};
use crate::worker::{Command, WorkQueue};

#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Full protoo URL including `roomId` and `peerId`.
    pub url: String,
    pub display_name: String,
    pub device: DeviceInfo,
    pub produce: bool,
    pub consume: bool,
    pub force_tcp: bool,
    pub request_timeout: Duration,
}

impl RoomOptions {
    pub fn from_config(config: &HuddleConfig, url: String) -> Self {
        Self {
            url,
            display_name: config.room.display_name.clone(),
            device: DeviceInfo::native(),
            produce: config.media.produce,
            consume: config.media.consume,
            force_tcp: config.media.force_tcp,
            request_timeout: Duration::from_millis(config.signaling.request_timeout_ms),
        }
    }
}

/// External collaborators a room is built from.
pub struct Collaborators {
    pub device_factory: DeviceFactory,
    pub media: Box<dyn MediaSource>,
    pub observer: Arc<dyn RoomObserver>,
    pub connector: Arc<dyn Connector>,
}

pub(crate) struct Session {
    pub(crate) options: RoomOptions,
    pub(crate) state: ConnectionState,
    pub(crate) display_name: String,
    pub(crate) device: Option<Box<dyn Device>>,
    pub(crate) media: Box<dyn MediaSource>,
    pub(crate) observer: Arc<dyn RoomObserver>,
    pub(crate) queue: WorkQueue,
    pub(crate) signaling: Option<SignalingChannel>,
    pub(crate) send_transport: Option<Box<dyn SendTransport>>,
    pub(crate) recv_transport: Option<Box<dyn RecvTransport>>,
    pub(crate) producers: HashMap<String, Box<dyn Producer>>,
    pub(crate) mic_producer: Option<String>,
    pub(crate) cam_producer: Option<String>,
    pub(crate) consumers: HashMap<String, ConsumerEntry>,
    pub(crate) audio_only: bool,
    connector: Arc<dyn Connector>,
    device_factory: DeviceFactory,
    state_tx: watch::Sender<ConnectionState>,
    terminated: bool,
}

impl Session {
    pub(crate) fn new(
        options: RoomOptions,
        parts: Collaborators,
        queue: WorkQueue,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            display_name: options.display_name.clone(),
            options,
            state: ConnectionState::New,
            device: None,
            media: parts.media,
            observer: parts.observer,
            queue,
            signaling: None,
            send_transport: None,
            recv_transport: None,
            producers: HashMap::new(),
            mic_producer: None,
            cam_producer: None,
            consumers: HashMap::new(),
            audio_only: false,
            connector: parts.connector,
            device_factory: parts.device_factory,
            state_tx,
            terminated: false,
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) async fn handle(&mut self, command: Command) {
        if self.terminated {
            return;
        }
        match command {
            Command::Join => self.join(),
            Command::EnableMic => self.enable_producer(ProducerSlot::Mic).await,
            Command::DisableMic => self.disable_producer(ProducerSlot::Mic).await,
            Command::MuteMic => self.set_producer_paused(ProducerSlot::Mic, true).await,
            Command::UnmuteMic => self.set_producer_paused(ProducerSlot::Mic, false).await,
            Command::EnableCam => {
                self.emit(RoomEvent::CamInProgress(true));
                self.enable_producer(ProducerSlot::Cam).await;
                self.emit(RoomEvent::CamInProgress(false));
            }
            Command::DisableCam => self.disable_producer(ProducerSlot::Cam).await,
            Command::ChangeCam => self.change_cam(),
            Command::EnableAudioOnly => self.enable_audio_only().await,
            Command::DisableAudioOnly => self.disable_audio_only().await,
            Command::MuteAudio => self.mute_audio(true).await,
            Command::UnmuteAudio => self.mute_audio(false).await,
            Command::RestartIce => self.restart_ice().await,
            Command::PauseConsumer(id) => self.set_consumer_paused(&id, true).await,
            Command::ResumeConsumer(id) => self.set_consumer_paused(&id, false).await,
            Command::RequestConsumerKeyFrame(id) => self.request_consumer_key_frame(id).await,
            Command::ChangeDisplayName(name) => self.change_display_name(name).await,
            Command::Signaling(event) => self.handle_signaling(event).await,
            Command::ProducerTransportClosed(id) => self.on_producer_transport_closed(&id),
            Command::ConsumerTransportClosed(id) => self.on_consumer_transport_closed(&id),
            Command::Close => self.shutdown(),
        }
    }

    // --- Helpers shared by the lifecycle modules ---

    pub(crate) fn emit(&self, event: RoomEvent) {
        self.observer.on_event(event);
    }

    pub(crate) fn notify(&self, notice: Notice) {
        self.observer.on_event(RoomEvent::Notify(notice));
    }

    pub(crate) fn signaling(&self) -> Result<SignalingChannel, SessionError> {
        self.signaling
            .clone()
            .ok_or(SessionError::PreconditionNotMet("signaling channel not open"))
    }

    pub(crate) async fn request<T: Serialize + Sync + ?Sized>(
        &mut self,
        method: &str,
        body: &T,
    ) -> Result<Value, SessionError> {
        self.signaling()?.request(method, body).await
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next || self.state == ConnectionState::Closed {
            return;
        }
        debug!(from = ?self.state, to = ?next, "Room state change");
        self.state = next;
        self.state_tx.send_replace(next);
        self.emit(RoomEvent::StateChanged(next));
    }

    // --- Connection lifecycle ---

    fn join(&mut self) {
        match self.state {
            ConnectionState::New => {}
            ConnectionState::Connecting if self.signaling.is_none() => {}
            state => {
                warn!(?state, "join() ignored, room already joining or joined");
                return;
            }
        }

        info!(url = %self.options.url, "Joining room");
        self.set_state(ConnectionState::Connecting);
        let link = self.connector.connect(&self.options.url);
        let (channel, mut events) = SignalingChannel::open(link, self.options.request_timeout);
        self.signaling = Some(channel);

        let queue = self.queue.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !queue.submit(Command::Signaling(event)) {
                    break;
                }
            }
        });
    }

    async fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Opened => {
                if let Err(e) = self.join_room().await {
                    error!("Join failed: {e}");
                    self.notify(Notice::error(format!("Could not join the room: {e}")));
                    self.close_from_worker();
                }
            }
            SignalingEvent::Request(request) => self.handle_server_request(request).await,
            SignalingEvent::Notification(notification) => self.handle_notification(notification),
            SignalingEvent::Failed => {
                self.notify(Notice::error("WebSocket connection failed"));
                self.set_state(ConnectionState::Connecting);
            }
            SignalingEvent::Disconnected => {
                self.notify(Notice::error("WebSocket disconnected"));
                self.set_state(ConnectionState::Connecting);
                self.dispose_transport_device();
            }
            SignalingEvent::Closed => {
                info!("Signaling closed by remote, closing room");
                self.close_from_worker();
            }
        }
    }

    /// Runs on every channel open: fresh capabilities, transports, `join`.
    async fn join_room(&mut self) -> Result<(), SessionError> {
        let signaling = self.signaling()?;

        let router_capabilities = signaling
            .request_value(method::GET_ROUTER_RTP_CAPABILITIES, json!({}))
            .await?;
        let mut device = (self.device_factory)();
        device.load(&router_capabilities)?;
        let rtp_capabilities = self.options.consume.then(|| device.rtp_capabilities());
        let can_send_mic = device.can_produce(MediaKind::Audio);
        let can_send_cam = device.can_produce(MediaKind::Video);
        self.device = Some(device);

        if self.options.produce {
            self.create_send_transport().await?;
        }
        if self.options.consume {
            self.create_recv_transport().await?;
        }

        let request = JoinRequest {
            display_name: self.display_name.clone(),
            device: self.options.device.clone(),
            rtp_capabilities,
            sctp_capabilities: None,
        };
        let response: JoinResponse = signaling.request_as(method::JOIN, &request).await?;

        self.set_state(ConnectionState::Connected);
        self.emit(RoomEvent::DisplayNameChanged(self.display_name.clone()));
        for peer in response.peers {
            self.emit(RoomEvent::PeerAdded(peer));
        }
        info!("Joined room");
        self.notify(Notice::info("You are in the room!").with_timeout(Duration::from_millis(3000)));

        if self.options.produce {
            self.emit(RoomEvent::MediaCapabilities {
                can_send_mic,
                can_send_cam,
            });
            self.queue.submit(Command::EnableMic);
            self.queue.submit(Command::EnableCam);
        }
        Ok(())
    }

    /// Close requested from inside the worker (join failure, remote close).
    fn close_from_worker(&mut self) {
        self.queue.begin_close();
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.queue.begin_close();
        info!("Closing room");

        if let Some(signaling) = self.signaling.take() {
            signaling.close();
        }
        self.dispose_transport_device();
        self.media.dispose();
        self.set_state(ConnectionState::Closed);
    }

    // --- Misc user commands ---

    fn change_cam(&mut self) {
        self.emit(RoomEvent::CamInProgress(true));
        if let Err(e) = self.media.switch_camera() {
            warn!("Camera switch failed: {e}");
            self.notify(Notice::error(format!("Could not change cam: {e}")));
        }
        self.emit(RoomEvent::CamInProgress(false));
    }

    async fn change_display_name(&mut self, display_name: String) {
        let body = ChangeDisplayNameRequest {
            display_name: display_name.clone(),
        };
        match self.request(method::CHANGE_DISPLAY_NAME, &body).await {
            Ok(_) => {
                info!(%display_name, "Display name changed");
                self.display_name = display_name.clone();
                self.emit(RoomEvent::DisplayNameChanged(display_name));
                self.notify(Notice::info("Display name changed"));
            }
            Err(e) => {
                error!("changeDisplayName failed: {e}");
                self.notify(Notice::error(format!("Could not change display name: {e}")));
                self.emit(RoomEvent::DisplayNameChanged(self.display_name.clone()));
            }
        }
    }

    async fn request_consumer_key_frame(&mut self, consumer_id: String) {
        let body = ConsumerRequest { consumer_id };
        match self.request(method::REQUEST_CONSUMER_KEY_FRAME, &body).await {
            Ok(_) => self.notify(Notice::info("Keyframe requested for video consumer")),
            Err(e) => {
                error!(consumer_id = %body.consumer_id, "requestConsumerKeyFrame failed: {e}");
                self.notify(Notice::error(format!("Error requesting key frame: {e}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use huddle_protocol::MediaKind;
    use serde_json::json;

    use crate::observer::{ConnectionState, RoomEvent};
    use crate::signaling::WireEvent;
    use crate::testing::{FakeSfu, Harness, eventually, options};

    #[tokio::test]
    async fn join_creates_both_legs_and_enables_mic_and_cam() {
        let h = Harness::joined(FakeSfu::new(), options()).await;

        let methods = h.sfu.methods();
        assert_eq!(
            &methods[..4],
            [
                "getRouterRtpCapabilities",
                "createWebRtcTransport",
                "createWebRtcTransport",
                "join"
            ]
        );
        let legs = h.sfu.requests_for("createWebRtcTransport");
        assert_eq!(legs[0]["producing"], true);
        assert_eq!(legs[0]["consuming"], false);
        assert_eq!(legs[1]["producing"], false);
        assert_eq!(legs[1]["consuming"], true);

        let join = &h.sfu.requests_for("join")[0];
        assert_eq!(join["displayName"], "Tester");
        assert!(join["rtpCapabilities"]["codecs"].is_array());

        assert_eq!(h.sfu.count("produce"), 2);
        assert_eq!(h.sfu.count("connectWebRtcTransport"), 1);
        let snapshot = h.recorder.snapshot();
        assert_eq!(snapshot.producers.len(), 2);
        assert!(snapshot.me.can_send_mic);
        assert!(snapshot.me.can_send_cam);
        assert!(h.recorder.notices().contains(&"You are in the room!".to_string()));
        h.close().await;
    }

    #[tokio::test]
    async fn join_without_consuming_sends_no_capabilities() {
        let mut opts = options();
        opts.consume = false;
        opts.produce = false;
        let h = Harness::joined(FakeSfu::new(), opts).await;

        assert_eq!(h.sfu.count("createWebRtcTransport"), 0);
        assert!(h.sfu.requests_for("join")[0]["rtpCapabilities"].is_null());
        assert_eq!(h.sfu.count("produce"), 0);
        assert_eq!(
            h.recorder
                .count(|e| matches!(e, RoomEvent::MediaCapabilities { .. })),
            0
        );
        h.close().await;
    }

    #[tokio::test]
    async fn join_peers_are_announced() {
        let sfu = FakeSfu::new();
        sfu.respond_with(
            "join",
            json!({"peers": [{"id": "bob", "displayName": "Bob", "device": {"flag": "chrome", "name": "Chrome", "version": "120"}}]}),
        );
        let h = Harness::joined(sfu, options()).await;
        let snapshot = h.recorder.snapshot();
        assert_eq!(snapshot.peers["bob"].info.display_name, "Bob");
        h.close().await;
    }

    #[tokio::test]
    async fn rejected_join_closes_the_room() {
        let sfu = FakeSfu::new();
        sfu.reject("join", 403, "room is full");
        let h = Harness::start(sfu, options());
        h.client.join();
        h.client.closed().await;

        assert!(h.client.is_closed());
        let sfu = h.sfu.clone();
        eventually("socket close", || sfu.closes() == 1).await;
        let notices = h.recorder.notices();
        assert!(
            notices
                .iter()
                .any(|n| n.starts_with("Could not join the room:") && n.contains("room is full")),
            "{notices:?}"
        );
        h.worker.await.unwrap();
    }

    #[tokio::test]
    async fn unanswered_join_times_out_and_closes() {
        let sfu = FakeSfu::new();
        sfu.silence("join");
        let mut opts = options();
        opts.request_timeout = Duration::from_millis(100);
        let h = Harness::start(sfu, opts);
        h.client.join();
        h.client.closed().await;

        assert!(h.recorder.notices().iter().any(|n| n.contains("timed out")));
        h.worker.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_tears_down_media_and_close_still_works() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        h.push_consumer("c1", "bob", "audio").await;

        h.sfu.inject(WireEvent::Disconnected("connection reset".to_string()));
        h.wait_for("teardown", |s| {
            s.state == ConnectionState::Connecting
                && s.producers.is_empty()
                && s.consumers.is_empty()
        })
        .await;

        assert!(
            h.recorder
                .notices()
                .contains(&"WebSocket disconnected".to_string())
        );

        h.client.close();
        h.client.closed().await;
        assert_eq!(h.client.state(), ConnectionState::Closed);
        h.worker.await.unwrap();
    }

    #[tokio::test]
    async fn reopen_after_disconnect_joins_again() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        h.sfu.inject(WireEvent::Disconnected("connection reset".to_string()));
        h.wait_for("connecting", |s| s.state == ConnectionState::Connecting)
            .await;

        h.sfu.inject(WireEvent::Opened);
        h.wait_for("reconnected", |s| s.state == ConnectionState::Connected)
            .await;
        h.settle().await;

        assert_eq!(h.sfu.connects(), 1);
        assert_eq!(h.sfu.count("join"), 2);
        assert_eq!(h.sfu.count("createWebRtcTransport"), 4);
        assert_eq!(h.sfu.count("produce"), 4);
        assert_eq!(h.recorder.snapshot().producers.len(), 2);
        h.close().await;
    }

    #[tokio::test]
    async fn rejoin_loads_the_new_router_capabilities() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        assert!(h.recorder.snapshot().me.can_send_cam);

        h.sfu.inject(WireEvent::Disconnected("connection reset".to_string()));
        h.wait_for("connecting", |s| s.state == ConnectionState::Connecting)
            .await;
        h.sfu.respond_with(
            "getRouterRtpCapabilities",
            json!({"codecs": [{"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000}]}),
        );
        h.sfu.inject(WireEvent::Opened);
        h.wait_for("reconnected", |s| s.state == ConnectionState::Connected)
            .await;
        h.settle().await;

        let snapshot = h.recorder.snapshot();
        assert!(snapshot.me.can_send_mic);
        assert!(!snapshot.me.can_send_cam);
        let kinds: Vec<MediaKind> = snapshot.producers.values().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![MediaKind::Audio]);

        let joins = h.sfu.requests_for("join");
        assert_eq!(joins[1]["rtpCapabilities"]["codecs"].as_array().unwrap().len(), 1);
        h.close().await;
    }

    #[tokio::test]
    async fn failed_connect_keeps_connecting() {
        let sfu = FakeSfu::new();
        sfu.manual_open();
        let h = Harness::start(sfu, options());
        h.client.join();
        h.wait_for("connecting", |s| s.state == ConnectionState::Connecting)
            .await;

        h.sfu.inject(WireEvent::Failed("connection refused".to_string()));
        let recorder = h.recorder.clone();
        eventually("failure notice", || {
            recorder
                .notices()
                .contains(&"WebSocket connection failed".to_string())
        })
        .await;
        assert_eq!(h.client.state(), ConnectionState::Connecting);
        assert!(h.sfu.requests().is_empty());
        h.close().await;
    }

    #[tokio::test]
    async fn remote_close_closes_the_room() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        h.sfu.inject(WireEvent::Closed(Some("server shutdown".to_string())));
        h.client.closed().await;

        assert!(h.client.is_closed());
        let snapshot = h.recorder.snapshot();
        assert!(snapshot.producers.is_empty());
        assert!(snapshot.peers.is_empty());
        h.worker.await.unwrap();
    }

    #[tokio::test]
    async fn second_join_is_ignored() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        h.client.join();
        h.settle().await;
        assert_eq!(h.sfu.connects(), 1);
        assert_eq!(h.sfu.count("join"), 1);
        h.close().await;
    }

    #[tokio::test]
    async fn display_name_change_is_rolled_back_on_rejection() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        let before = h.recorder.snapshot().me.display_name;
        h.sfu.reject("changeDisplayName", 500, "nope");
        h.client.change_display_name("Rejected");

        let recorder = h.recorder.clone();
        eventually("rollback", || {
            recorder
                .notices()
                .iter()
                .any(|n| n.starts_with("Could not change display name"))
        })
        .await;
        assert_eq!(h.recorder.snapshot().me.display_name, before);
        assert_eq!(
            h.sfu.requests_for("changeDisplayName").last().unwrap()["displayName"],
            "Rejected"
        );
        h.close().await;
    }

    #[tokio::test]
    async fn key_frame_request_carries_the_consumer_id() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        h.push_consumer("c7", "bob", "video").await;
        h.client.request_consumer_key_frame("c7");
        h.settle().await;

        let requests = h.sfu.requests_for("requestConsumerKeyFrame");
        assert_eq!(requests, vec![json!({"consumerId": "c7"})]);
        assert!(
            h.recorder
                .notices()
                .contains(&"Keyframe requested for video consumer".to_string())
        );
        h.close().await;
    }

    #[tokio::test]
    async fn change_cam_is_bracketed_by_progress_events() {
        let h = Harness::joined(FakeSfu::new(), options()).await;
        h.client.change_cam();
        h.settle().await;

        let progress: Vec<bool> = h
            .recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                RoomEvent::CamInProgress(on) => Some(on),
                _ => None,
            })
            .collect();
        // Initial enableCam, then changeCam.
        assert_eq!(progress, vec![true, false, true, false]);
        assert!(
            !h.recorder
                .notices()
                .iter()
                .any(|n| n.starts_with("Could not change cam"))
        );
        h.close().await;
    }
}
