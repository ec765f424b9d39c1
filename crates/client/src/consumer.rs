//! Consumers of remote media, created only on the server's `newConsumer` push.

use huddle_protocol::{ConsumerRequest, MediaKind, NewConsumer, method};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::media::{ConsumeParams, Consumer, TransportCloseCallback};
use crate::observer::{ConsumerInfo, Notice, Originator, RoomEvent};
use crate::producer::ProducerSlot;
use crate::session::Session;
use crate::signaling::ServerRequest;
use crate::worker::Command;

/// A consumer together with the peer whose producer it mirrors.
pub(crate) struct ConsumerEntry {
    pub(crate) peer_id: String,
    pub(crate) consumer: Box<dyn Consumer>,
}

impl Session {
    pub(crate) async fn handle_server_request(&mut self, request: ServerRequest) {
        match request.method.as_str() {
            method::NEW_CONSUMER => self.on_new_consumer(request).await,
            method::NEW_DATA_CONSUMER => {
                request.reject(403, "I do not want DataChannels");
            }
            other => {
                warn!(method = other, "Unknown server request");
                let reason = format!("unknown protoo request.method {other}");
                request.reject(403, reason);
            }
        }
    }

    async fn on_new_consumer(&mut self, request: ServerRequest) {
        if !self.options.consume {
            request.reject(403, "I do not want to consume");
            return;
        }

        let params: NewConsumer = match serde_json::from_value(request.data.clone()) {
            Ok(params) => params,
            Err(e) => {
                error!("Malformed newConsumer request: {e}");
                self.notify(Notice::error(format!("Error creating a Consumer: {e}")));
                request.reject(500, format!("malformed newConsumer: {e}"));
                return;
            }
        };
        let Some(transport) = self.recv_transport.as_mut() else {
            warn!(consumer_id = %params.id, "newConsumer before the recv transport exists");
            request.reject(500, "recv transport not ready");
            return;
        };

        let queue = self.queue.clone();
        let on_transport_close: TransportCloseCallback = Box::new(move |consumer_id| {
            queue.submit(Command::ConsumerTransportClosed(consumer_id));
        });
        let consume = ConsumeParams {
            id: params.id.clone(),
            producer_id: params.producer_id.clone(),
            kind: params.kind,
            rtp_parameters: params.rtp_parameters,
            app_data: params.app_data,
        };
        let consumer = match transport.consume(consume, on_transport_close) {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(consumer_id = %params.id, "Creating consumer failed: {e}");
                self.notify(Notice::error(format!("Error creating a Consumer: {e}")));
                request.reject(500, e.to_string());
                return;
            }
        };

        let info = ConsumerInfo {
            id: params.id.clone(),
            peer_id: params.peer_id.clone(),
            producer_id: params.producer_id,
            kind: params.kind,
            consumer_type: params.consumer_type,
            locally_paused: consumer.paused(),
            remotely_paused: params.producer_paused,
        };
        self.consumers.insert(
            params.id.clone(),
            ConsumerEntry {
                peer_id: params.peer_id,
                consumer,
            },
        );
        info!(consumer_id = %params.id, kind = %params.kind, "Consumer created");
        self.emit(RoomEvent::ConsumerAdded(info));
        request.accept(json!({}));

        if params.kind == MediaKind::Video && self.audio_only {
            self.set_consumer_paused(&params.id, true).await;
        }
    }

    /// Ask the server first; local state only changes once it agrees.
    pub(crate) async fn set_consumer_paused(&mut self, consumer_id: &str, paused: bool) {
        let Some(entry) = self.consumers.get(consumer_id) else {
            debug!(consumer_id, "Unknown consumer");
            return;
        };
        if entry.consumer.paused() == paused {
            debug!(consumer_id, paused, "Consumer already in requested state");
            return;
        }

        let (request_method, verb) = if paused {
            (method::PAUSE_CONSUMER, "pausing")
        } else {
            (method::RESUME_CONSUMER, "resuming")
        };
        let body = ConsumerRequest {
            consumer_id: consumer_id.to_string(),
        };
        if let Err(e) = self.request(request_method, &body).await {
            error!(consumer_id, "{request_method} failed: {e}");
            self.notify(Notice::error(format!("Error {verb} Consumer: {e}")));
            return;
        }

        let Some(entry) = self.consumers.get_mut(consumer_id) else {
            return;
        };
        let consumer_id = consumer_id.to_string();
        if paused {
            entry.consumer.pause();
            self.emit(RoomEvent::ConsumerPaused {
                consumer_id,
                originator: Originator::Local,
            });
        } else {
            entry.consumer.resume();
            self.emit(RoomEvent::ConsumerResumed {
                consumer_id,
                originator: Originator::Local,
            });
        }
    }

    /// Apply pause/resume to every consumer of `kind`, over a snapshot of ids.
    async fn set_kind_paused(&mut self, kind: MediaKind, paused: bool) {
        let mut ids: Vec<String> = self
            .consumers
            .iter()
            .filter(|(_, entry)| entry.consumer.kind() == kind)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        for id in ids {
            self.set_consumer_paused(&id, paused).await;
        }
    }

    pub(crate) async fn mute_audio(&mut self, muted: bool) {
        self.emit(RoomEvent::AudioMuted(muted));
        self.set_kind_paused(MediaKind::Audio, muted).await;
    }

    pub(crate) async fn enable_audio_only(&mut self) {
        self.emit(RoomEvent::AudioOnlyInProgress(true));
        self.disable_producer(ProducerSlot::Cam).await;
        self.set_kind_paused(MediaKind::Video, true).await;
        self.audio_only = true;
        self.emit(RoomEvent::AudioOnly(true));
        self.emit(RoomEvent::AudioOnlyInProgress(false));
    }

    pub(crate) async fn disable_audio_only(&mut self) {
        self.emit(RoomEvent::AudioOnlyInProgress(true));
        if self.cam_producer.is_none() && self.options.produce {
            self.enable_producer(ProducerSlot::Cam).await;
        }
        self.set_kind_paused(MediaKind::Video, false).await;
        self.audio_only = false;
        self.emit(RoomEvent::AudioOnly(false));
        self.emit(RoomEvent::AudioOnlyInProgress(false));
    }

    pub(crate) fn on_consumer_transport_closed(&mut self, consumer_id: &str) {
        if self.remove_consumer(consumer_id) {
            warn!(consumer_id, "Consumer transport closed");
        }
    }

    /// Close and forget a consumer. Returns whether it existed.
    pub(crate) fn remove_consumer(&mut self, consumer_id: &str) -> bool {
        let Some(mut entry) = self.consumers.remove(consumer_id) else {
            return false;
        };
        entry.consumer.close();
        self.emit(RoomEvent::ConsumerRemoved {
            peer_id: entry.peer_id,
            consumer_id: consumer_id.to_string(),
        });
        true
    }
}
