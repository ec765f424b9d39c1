//! In-memory SFU and observers for exercising a full room without a network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use huddle_protocol::{Message, Notification, Request, RequestId, Response};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::headless::{HeadlessDevice, HeadlessMedia, TransportCloser};
use crate::media::Direction;
use crate::observer::{ConnectionState, RoomEvent, RoomObserver, RoomSnapshot, RoomStore};
use crate::room::RoomClient;
use crate::session::{Collaborators, RoomOptions};
use crate::signaling::{Connector, WireCommand, WireEvent, WireLink};

static SETTLE: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct SfuState {
    responses: HashMap<String, Value>,
    rejections: HashMap<String, (i64, String)>,
    silent: HashSet<String>,
    requests: Vec<Request>,
    replies: Vec<Response>,
    wire: Option<mpsc::UnboundedSender<WireEvent>>,
    auto_open: bool,
    connects: usize,
    closes: usize,
    next_server_id: RequestId,
    next_object: u64,
}

/// Scripted server. Every request is answered from a per-method table unless
/// the method was told to reject or stay silent.
#[derive(Clone)]
pub(crate) struct FakeSfu {
    state: Arc<Mutex<SfuState>>,
}

impl FakeSfu {
    pub(crate) fn new() -> Self {
        let sfu = Self {
            state: Arc::new(Mutex::new(SfuState {
                auto_open: true,
                next_server_id: 1000,
                ..SfuState::default()
            })),
        };
        sfu.respond_with(
            "getRouterRtpCapabilities",
            json!({
                "codecs": [
                    {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000},
                    {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000},
                ],
                "headerExtensions": [],
            }),
        );
        sfu.respond_with("join", json!({"peers": []}));
        sfu
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SfuState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn respond_with(&self, method: &str, data: Value) {
        self.lock().responses.insert(method.to_string(), data);
    }

    pub(crate) fn reject(&self, method: &str, code: i64, reason: &str) {
        self.lock()
            .rejections
            .insert(method.to_string(), (code, reason.to_string()));
    }

    /// Requests for `method` are recorded but never answered.
    pub(crate) fn silence(&self, method: &str) {
        self.lock().silent.insert(method.to_string());
    }

    /// Do not send `Opened` on connect; the test injects it.
    pub(crate) fn manual_open(&self) {
        self.lock().auto_open = false;
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    pub(crate) fn requests_for(&self, method: &str) -> Vec<Value> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .map(|r| r.data.clone())
            .collect()
    }

    pub(crate) fn count(&self, method: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub(crate) fn connects(&self) -> usize {
        self.lock().connects
    }

    pub(crate) fn closes(&self) -> usize {
        self.lock().closes
    }

    /// The client's answer to a server-pushed request, once it exists.
    pub(crate) fn reply_to(&self, id: RequestId) -> Option<Response> {
        self.lock().replies.iter().find(|r| r.id == id).cloned()
    }

    /// Wait for the client's answer to a server-pushed request.
    pub(crate) async fn reply(&self, id: RequestId) -> Response {
        eventually("reply to server request", || self.reply_to(id).is_some()).await;
        self.reply_to(id).unwrap()
    }

    pub(crate) fn inject(&self, event: WireEvent) {
        if let Some(wire) = &self.lock().wire {
            let _ = wire.send(event);
        }
    }

    pub(crate) fn push_request(&self, method: &str, data: Value) -> RequestId {
        let id = {
            let mut state = self.lock();
            state.next_server_id += 1;
            state.next_server_id
        };
        let request = Request {
            id,
            method: method.to_string(),
            data,
        };
        self.push(Message::Request(request));
        id
    }

    pub(crate) fn push_notification(&self, method: &str, data: Value) {
        self.push(Message::Notification(Notification {
            method: method.to_string(),
            data,
        }));
    }

    fn push(&self, message: Message) {
        let text = message.to_text().unwrap();
        self.inject(WireEvent::Text(text));
    }

    fn answer(&self, request: Request) -> Option<Response> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        if state.silent.contains(&request.method) {
            return None;
        }
        if let Some((code, reason)) = state.rejections.get(&request.method) {
            return Some(Response::error(request.id, *code, reason.clone()));
        }
        if let Some(data) = state.responses.get(&request.method) {
            return Some(Response::ok(request.id, data.clone()));
        }

        state.next_object += 1;
        let n = state.next_object;
        let data = match request.method.as_str() {
            "createWebRtcTransport" => json!({
                "id": format!("transport-{n}"),
                "iceParameters": {"usernameFragment": format!("u{n}"), "password": "p"},
                "iceCandidates": [],
                "dtlsParameters": {"fingerprints": []},
            }),
            "produce" => json!({"id": format!("producer-{n}")}),
            "restartIce" => json!({"usernameFragment": format!("r{n}"), "password": "p"}),
            _ => json!({}),
        };
        Some(Response::ok(request.id, data))
    }

    async fn serve(self, mut commands: mpsc::UnboundedReceiver<WireCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                WireCommand::Send(text) => match Message::parse(&text).unwrap() {
                    Message::Request(request) => {
                        if let Some(response) = self.answer(request) {
                            self.push(Message::Response(response));
                        }
                    }
                    Message::Response(response) => self.lock().replies.push(response),
                    Message::Notification(n) => panic!("Client sent a notification: {n:?}"),
                },
                WireCommand::Close => {
                    self.lock().closes += 1;
                    self.inject(WireEvent::Closed(None));
                }
            }
        }
    }
}

impl Connector for FakeSfu {
    fn connect(&self, _url: &str) -> WireLink {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let auto_open = {
            let mut state = self.lock();
            state.connects += 1;
            state.wire = Some(event_tx.clone());
            state.auto_open
        };
        if auto_open {
            let _ = event_tx.send(WireEvent::Opened);
        }
        tokio::spawn(self.clone().serve(command_rx));
        WireLink { events, commands }
    }
}

/// Observer keeping both the raw event log and the folded snapshot.
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<RoomEvent>>,
    store: RoomStore,
}

impl Recorder {
    pub(crate) fn events(&self) -> Vec<RoomEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn snapshot(&self) -> RoomSnapshot {
        self.store.snapshot()
    }

    pub(crate) fn count(&self, matches: impl Fn(&RoomEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches(e)).count()
    }

    pub(crate) fn notices(&self) -> Vec<String> {
        self.snapshot()
            .notices
            .into_iter()
            .map(|n| n.text)
            .collect()
    }
}

impl RoomObserver for Recorder {
    fn on_event(&self, event: RoomEvent) {
        self.store.on_event(event.clone());
        self.events.lock().unwrap().push(event);
    }
}

/// Poll `check` until it holds, panicking after two seconds.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub(crate) fn options() -> RoomOptions {
    RoomOptions {
        url: "wss://sfu.test:4443/?roomId=room&peerId=me".to_string(),
        display_name: "Tester".to_string(),
        device: huddle_protocol::DeviceInfo::unknown(),
        produce: true,
        consume: true,
        force_tcp: false,
        request_timeout: Duration::from_secs(2),
    }
}

pub(crate) struct Harness {
    pub(crate) client: RoomClient,
    pub(crate) sfu: FakeSfu,
    pub(crate) recorder: Arc<Recorder>,
    pub(crate) worker: JoinHandle<()>,
    closers: Arc<Mutex<Vec<TransportCloser>>>,
}

impl Harness {
    pub(crate) fn start(sfu: FakeSfu, options: RoomOptions) -> Self {
        let recorder = Arc::new(Recorder::default());
        let closers = Arc::new(Mutex::new(Vec::new()));
        let parts = Collaborators {
            device_factory: HeadlessDevice::factory_with_closers(Arc::clone(&closers)),
            media: Box::new(HeadlessMedia::new()),
            observer: recorder.clone(),
            connector: Arc::new(sfu.clone()),
        };
        let (client, worker) = RoomClient::spawn(options, parts);
        Self {
            client,
            sfu,
            recorder,
            worker,
            closers,
        }
    }

    /// Join and wait until the room is connected and the commands queued by
    /// the join (initial producers) have run.
    pub(crate) async fn joined(sfu: FakeSfu, options: RoomOptions) -> Self {
        let harness = Self::start(sfu, options);
        harness.client.join();
        harness
            .wait_for("connected", |s| s.state == ConnectionState::Connected)
            .await;
        harness.settle().await;
        harness
    }

    /// Wait until everything submitted or pushed so far has been processed.
    ///
    /// A `peerClosed` for an unknown peer travels the same wire, pump and
    /// queue as real traffic and only produces a `PeerRemoved` event.
    pub(crate) async fn settle(&self) {
        let marker = format!("settle-{}", SETTLE.fetch_add(1, Ordering::Relaxed));
        self.sfu
            .push_notification("peerClosed", json!({ "peerId": &marker }));
        let recorder = Arc::clone(&self.recorder);
        eventually("queue to settle", || {
            recorder.count(
                |e| matches!(e, RoomEvent::PeerRemoved { peer_id } if *peer_id == marker),
            ) == 1
        })
        .await;
    }

    /// Close the newest `direction` transport from the media side, as if its
    /// connection died.
    pub(crate) fn drop_leg(&self, direction: Direction) {
        let closer = self
            .closers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.direction() == direction)
            .cloned()
            .expect("no transport for that direction");
        closer.close();
    }

    pub(crate) async fn wait_for(&self, what: &str, check: impl Fn(&RoomSnapshot) -> bool) {
        let recorder = Arc::clone(&self.recorder);
        eventually(what, || check(&recorder.snapshot())).await;
    }

    /// Push a `newConsumer` and wait until the client answers it.
    pub(crate) async fn push_consumer(&self, id: &str, peer_id: &str, kind: &str) -> Response {
        let request_id = self.sfu.push_request(
            "newConsumer",
            json!({
                "peerId": peer_id,
                "producerId": format!("remote-{id}"),
                "id": id,
                "kind": kind,
                "rtpParameters": {"codecs": []},
                "type": "simple",
                "appData": {},
                "producerPaused": false,
            }),
        );
        self.sfu.reply(request_id).await
    }

    pub(crate) async fn close(self) {
        self.client.close();
        self.client.closed().await;
        self.worker.await.unwrap();
    }
}
