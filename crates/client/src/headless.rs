//! Media-less collaborators.
//!
//! These drive the full signaling flow (transports are negotiated, producers
//! and consumers are registered server-side) without capturing or rendering
//! anything. Useful for bots, load tests and the test suite.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use huddle_protocol::{MediaKind, TransportInfo};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::media::{
    ConsumeParams, Consumer, Device, DeviceFactory, Direction, LocalTrack, MediaError, MediaSource, Producer,
    RecvTransport, SendTransport, Transport, TransportCloseCallback, TransportListener,
};

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    capabilities: Option<Value>,
    kinds: HashSet<MediaKind>,
    closers: Option<Arc<Mutex<Vec<TransportCloser>>>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory() -> DeviceFactory {
        Box::new(|| Box::new(HeadlessDevice::new()) as Box<dyn Device>)
    }

    /// Like [`HeadlessDevice::factory`], but every transport the devices
    /// build also leaves a [`TransportCloser`] in `closers`.
    pub fn factory_with_closers(closers: Arc<Mutex<Vec<TransportCloser>>>) -> DeviceFactory {
        Box::new(move || {
            Box::new(HeadlessDevice {
                closers: Some(Arc::clone(&closers)),
                ..HeadlessDevice::default()
            }) as Box<dyn Device>
        })
    }

    fn build_transport(
        &self,
        direction: Direction,
        info: TransportInfo,
        listener: Arc<dyn TransportListener>,
    ) -> Result<HeadlessTransport, MediaError> {
        if !self.is_loaded() {
            return Err(MediaError::new("device not loaded"));
        }
        let transport = HeadlessTransport::new(direction, info, listener);
        if let Some(closers) = &self.closers {
            closers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(transport.closer());
        }
        Ok(transport)
    }
}

impl Device for HeadlessDevice {
    fn load(&mut self, router_rtp_capabilities: &Value) -> Result<(), MediaError> {
        if self.capabilities.is_some() {
            return Err(MediaError::new("device already loaded"));
        }
        let codecs = router_rtp_capabilities
            .get("codecs")
            .and_then(Value::as_array)
            .ok_or_else(|| MediaError::new("router capabilities carry no codecs"))?;

        self.kinds = codecs
            .iter()
            .filter_map(|codec| codec.get("kind").cloned())
            .filter_map(|kind| serde_json::from_value::<MediaKind>(kind).ok())
            .collect();
        self.capabilities = Some(router_rtp_capabilities.clone());
        debug!(kinds = ?self.kinds, "Device loaded");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.capabilities.is_some()
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        self.is_loaded() && self.kinds.contains(&kind)
    }

    fn rtp_capabilities(&self) -> Value {
        self.capabilities.clone().unwrap_or(Value::Null)
    }

    fn create_send_transport(
        &mut self,
        info: TransportInfo,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn SendTransport>, MediaError> {
        Ok(Box::new(self.build_transport(Direction::Send, info, listener)?))
    }

    fn create_recv_transport(
        &mut self,
        info: TransportInfo,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Box<dyn RecvTransport>, MediaError> {
        Ok(Box::new(self.build_transport(Direction::Recv, info, listener)?))
    }
}

/// A producer or consumer attached to a transport.
struct Binding {
    id: String,
    closed: Arc<AtomicBool>,
    on_transport_close: TransportCloseCallback,
}

#[derive(Default)]
struct Leg {
    closed: bool,
    bindings: Vec<Binding>,
}

fn lock_leg(leg: &Mutex<Leg>) -> MutexGuard<'_, Leg> {
    leg.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mark the leg closed and fire the callback of every binding still alive.
/// Returns `false` if it was already closed.
fn close_leg(leg: &Mutex<Leg>) -> bool {
    let bindings = {
        let mut leg = lock_leg(leg);
        if leg.closed {
            return false;
        }
        leg.closed = true;
        std::mem::take(&mut leg.bindings)
    };
    for binding in bindings {
        if !binding.closed.swap(true, Ordering::AcqRel) {
            (binding.on_transport_close)(binding.id);
        }
    }
    true
}

/// Closes a transport from outside its owner, as a dead ICE or DTLS session
/// would. Producers and consumers still bound to it get their callbacks.
#[derive(Clone)]
pub struct TransportCloser {
    transport_id: String,
    direction: Direction,
    leg: Arc<Mutex<Leg>>,
}

impl TransportCloser {
    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn close(&self) {
        if close_leg(&self.leg) {
            warn!(
                transport_id = %self.transport_id,
                direction = ?self.direction,
                "Transport closed underneath its owner"
            );
        }
    }
}

impl fmt::Debug for TransportCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCloser")
            .field("transport_id", &self.transport_id)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

/// One transport leg. Implements both directions; the device only ever
/// hands it out as the one it was created for.
pub struct HeadlessTransport {
    direction: Direction,
    info: TransportInfo,
    listener: Arc<dyn TransportListener>,
    connected: bool,
    leg: Arc<Mutex<Leg>>,
}

impl HeadlessTransport {
    fn new(direction: Direction, info: TransportInfo, listener: Arc<dyn TransportListener>) -> Self {
        Self {
            direction,
            info,
            listener,
            connected: false,
            leg: Arc::default(),
        }
    }

    fn closer(&self) -> TransportCloser {
        TransportCloser {
            transport_id: self.info.id.clone(),
            direction: self.direction,
            leg: Arc::clone(&self.leg),
        }
    }

    /// DTLS is negotiated lazily, on the first produce or consume.
    fn ensure_connected(&mut self) {
        if self.connected {
            return;
        }
        self.connected = true;
        let role = match self.direction {
            Direction::Send => "server",
            Direction::Recv => "client",
        };
        let mut dtls_parameters = self.info.dtls_parameters.clone();
        if let Some(params) = dtls_parameters.as_object_mut() {
            params.insert("role".to_string(), json!(role));
        }
        self.listener.on_connect(&self.info.id, dtls_parameters);
        self.listener
            .on_connection_state_change(&self.info.id, "connected");
    }

    fn bind(&mut self, id: &str, on_transport_close: TransportCloseCallback) -> Arc<AtomicBool> {
        let closed = Arc::new(AtomicBool::new(false));
        let mut leg = lock_leg(&self.leg);
        leg.bindings.retain(|b| !b.closed.load(Ordering::Acquire));
        leg.bindings.push(Binding {
            id: id.to_string(),
            closed: Arc::clone(&closed),
            on_transport_close,
        });
        closed
    }

    fn check_open(&self) -> Result<(), MediaError> {
        if lock_leg(&self.leg).closed {
            return Err(MediaError::new(format!("transport {} is closed", self.info.id)));
        }
        Ok(())
    }
}

impl Transport for HeadlessTransport {
    fn id(&self) -> &str {
        &self.info.id
    }

    fn restart_ice(&mut self, ice_parameters: Value) -> Result<(), MediaError> {
        self.check_open()?;
        self.info.ice_parameters = ice_parameters;
        Ok(())
    }

    fn close(&mut self) {
        if !close_leg(&self.leg) {
            return;
        }
        if self.connected {
            self.listener
                .on_connection_state_change(&self.info.id, "closed");
        }
        info!(transport_id = %self.info.id, direction = ?self.direction, "Transport closed");
    }
}

impl SendTransport for HeadlessTransport {
    fn produce(
        &mut self,
        track: LocalTrack,
        app_data: Value,
        on_transport_close: TransportCloseCallback,
    ) -> BoxFuture<'_, Result<Box<dyn Producer>, SessionError>> {
        async move {
            self.check_open()?;
            self.ensure_connected();

            let mid = lock_leg(&self.leg).bindings.len();
            let rtp_parameters = json!({
                "mid": mid.to_string(),
                "codecs": [],
                "encodings": [{ "active": true }],
            });
            let id = self
                .listener
                .on_produce(&self.info.id, track.kind, rtp_parameters, app_data)
                .await?;
            let closed = self.bind(&id, on_transport_close);
            Ok(Box::new(HeadlessProducer {
                id,
                track,
                paused: false,
                closed,
            }) as Box<dyn Producer>)
        }
        .boxed()
    }
}

impl RecvTransport for HeadlessTransport {
    fn consume(
        &mut self,
        params: ConsumeParams,
        on_transport_close: TransportCloseCallback,
    ) -> Result<Box<dyn Consumer>, MediaError> {
        self.check_open()?;
        self.ensure_connected();
        let closed = self.bind(&params.id, on_transport_close);
        Ok(Box::new(HeadlessConsumer {
            id: params.id,
            kind: params.kind,
            paused: false,
            closed,
        }))
    }
}

pub struct HeadlessProducer {
    id: String,
    track: LocalTrack,
    paused: bool,
    closed: Arc<AtomicBool>,
}

impl Producer for HeadlessProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.track.kind
    }

    fn paused(&self) -> bool {
        self.paused
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub struct HeadlessConsumer {
    id: String,
    kind: MediaKind,
    paused: bool,
    closed: Arc<AtomicBool>,
}

impl Consumer for HeadlessConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn paused(&self) -> bool {
        self.paused
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Hands out track ids without capturing anything.
#[derive(Debug, Default)]
pub struct HeadlessMedia {
    audio: Option<LocalTrack>,
    video: Option<LocalTrack>,
    front_camera: bool,
    disposed: bool,
}

impl HeadlessMedia {
    pub fn new() -> Self {
        Self {
            front_camera: true,
            ..Self::default()
        }
    }

    pub fn front_camera(&self) -> bool {
        self.front_camera
    }

    fn track(&self, kind: MediaKind) -> Result<LocalTrack, MediaError> {
        if self.disposed {
            return Err(MediaError::new("media source disposed"));
        }
        Ok(LocalTrack {
            id: format!("{kind}-{}", Uuid::new_v4().simple()),
            kind,
        })
    }
}

impl MediaSource for HeadlessMedia {
    fn create_audio_track(&mut self) -> Result<LocalTrack, MediaError> {
        let track = self.track(MediaKind::Audio)?;
        self.audio = Some(track.clone());
        Ok(track)
    }

    fn create_video_track(&mut self) -> Result<LocalTrack, MediaError> {
        let track = self.track(MediaKind::Video)?;
        self.video = Some(track.clone());
        Ok(track)
    }

    fn switch_camera(&mut self) -> Result<(), MediaError> {
        if self.video.is_none() {
            return Err(MediaError::new("no camera in use"));
        }
        self.front_camera = !self.front_camera;
        debug!(front = self.front_camera, "Camera switched");
        Ok(())
    }

    fn dispose(&mut self) {
        self.audio = None;
        self.video = None;
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Calls {
        connects: Mutex<Vec<(String, Value)>>,
        states: Mutex<Vec<String>>,
    }

    impl TransportListener for Calls {
        fn on_produce(
            &self,
            _transport_id: &str,
            kind: MediaKind,
            _rtp_parameters: Value,
            _app_data: Value,
        ) -> BoxFuture<'static, Result<String, SessionError>> {
            async move { Ok(format!("server-{kind}")) }.boxed()
        }

        fn on_connect(&self, transport_id: &str, dtls_parameters: Value) {
            self.connects
                .lock()
                .unwrap()
                .push((transport_id.to_string(), dtls_parameters));
        }

        fn on_connection_state_change(&self, _transport_id: &str, state: &str) {
            self.states.lock().unwrap().push(state.to_string());
        }
    }

    fn info(id: &str) -> TransportInfo {
        TransportInfo {
            id: id.to_string(),
            ice_parameters: json!({}),
            ice_candidates: json!([]),
            dtls_parameters: json!({"fingerprints": []}),
            sctp_parameters: None,
        }
    }

    fn loaded_device(codecs: Value) -> HeadlessDevice {
        let mut device = HeadlessDevice::new();
        device.load(&json!({ "codecs": codecs })).unwrap();
        device
    }

    #[test]
    fn can_produce_follows_router_codecs() {
        let device = loaded_device(json!([{"kind": "audio", "mimeType": "audio/opus"}]));
        assert!(device.can_produce(MediaKind::Audio));
        assert!(!device.can_produce(MediaKind::Video));
    }

    #[test]
    fn load_requires_codecs() {
        let mut device = HeadlessDevice::new();
        assert!(device.load(&json!({})).is_err());
        assert!(!device.is_loaded());
        assert!(!device.can_produce(MediaKind::Audio));
    }

    #[test]
    fn transports_need_a_loaded_device() {
        let mut device = HeadlessDevice::new();
        let calls = Arc::new(Calls::default());
        assert!(device.create_send_transport(info("t1"), calls).is_err());
    }

    #[tokio::test]
    async fn produce_connects_once_and_uses_server_id() {
        let mut device = loaded_device(json!([{"kind": "audio"}, {"kind": "video"}]));
        let calls = Arc::new(Calls::default());
        let mut transport = device
            .create_send_transport(info("send-1"), calls.clone())
            .unwrap();

        let mic = LocalTrack {
            id: "a".to_string(),
            kind: MediaKind::Audio,
        };
        let cam = LocalTrack {
            id: "v".to_string(),
            kind: MediaKind::Video,
        };
        let p1 = transport
            .produce(mic, json!({}), Box::new(|_| {}))
            .await
            .unwrap();
        let p2 = transport
            .produce(cam, json!({}), Box::new(|_| {}))
            .await
            .unwrap();

        assert_eq!(p1.id(), "server-audio");
        assert_eq!(p2.id(), "server-video");
        let connects = calls.connects.lock().unwrap();
        assert_eq!(connects.len(), 1);
        assert_eq!(connects[0].0, "send-1");
        assert_eq!(connects[0].1["role"], "server");
    }

    #[test]
    fn close_fires_callbacks_for_live_bindings_only() {
        let mut device = loaded_device(json!([{"kind": "video"}]));
        let calls = Arc::new(Calls::default());
        let mut transport = device
            .create_recv_transport(info("recv-1"), calls.clone())
            .unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));

        let mut consumers = Vec::new();
        for id in ["c1", "c2"] {
            let fired = Arc::clone(&fired);
            let params = ConsumeParams {
                id: id.to_string(),
                producer_id: format!("p-{id}"),
                kind: MediaKind::Video,
                rtp_parameters: json!({}),
                app_data: json!({}),
            };
            let consumer = transport
                .consume(params, Box::new(move |id| fired.lock().unwrap().push(id)))
                .unwrap();
            consumers.push(consumer);
        }
        consumers[0].close();
        transport.close();
        transport.close();

        assert_eq!(*fired.lock().unwrap(), vec!["c2".to_string()]);
        assert_eq!(calls.connects.lock().unwrap()[0].1["role"], "client");
        assert_eq!(
            *calls.states.lock().unwrap(),
            vec!["connected".to_string(), "closed".to_string()]
        );
    }

    #[test]
    fn closer_shuts_the_leg_from_outside() {
        let closers = Arc::new(Mutex::new(Vec::new()));
        let mut device = (HeadlessDevice::factory_with_closers(Arc::clone(&closers)))();
        device
            .load(&json!({"codecs": [{"kind": "audio"}]}))
            .unwrap();
        let mut transport = device
            .create_recv_transport(info("recv-9"), Arc::new(Calls::default()))
            .unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let params = ConsumeParams {
            id: "c1".to_string(),
            producer_id: "p1".to_string(),
            kind: MediaKind::Audio,
            rtp_parameters: json!({}),
            app_data: json!({}),
        };
        let _consumer = transport
            .consume(params, Box::new(move |id| sink.lock().unwrap().push(id)))
            .unwrap();

        let closer = closers.lock().unwrap()[0].clone();
        assert_eq!(closer.transport_id(), "recv-9");
        assert_eq!(closer.direction(), Direction::Recv);
        closer.close();
        closer.close();
        transport.close();

        assert_eq!(*fired.lock().unwrap(), vec!["c1".to_string()]);
    }

    #[test]
    fn closed_transport_refuses_consume() {
        let mut device = loaded_device(json!([{"kind": "audio"}]));
        let mut transport = device
            .create_recv_transport(info("recv-1"), Arc::new(Calls::default()))
            .unwrap();
        transport.close();
        let params = ConsumeParams {
            id: "c1".to_string(),
            producer_id: "p1".to_string(),
            kind: MediaKind::Audio,
            rtp_parameters: json!({}),
            app_data: json!({}),
        };
        assert!(transport.consume(params, Box::new(|_| {})).is_err());
    }

    #[test]
    fn switch_camera_needs_a_video_track() {
        let mut media = HeadlessMedia::new();
        assert!(media.switch_camera().is_err());
        media.create_video_track().unwrap();
        media.switch_camera().unwrap();
        assert!(!media.front_camera());
        media.dispose();
        assert!(media.create_audio_track().is_err());
    }
}
