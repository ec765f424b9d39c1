//! Microphone and camera producers.
//!
//! Each slot goes `absent -> active <-> paused -> closed`. A closed producer
//! is dropped; enabling again creates a new one.

use huddle_protocol::{MediaKind, ProducerRequest, method};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::media::TransportCloseCallback;
use crate::observer::{Notice, ProducerInfo, RoomEvent};
use crate::session::Session;
use crate::worker::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ProducerSlot {
    Mic,
    Cam,
}

impl ProducerSlot {
    pub(crate) fn kind(self) -> MediaKind {
        match self {
            ProducerSlot::Mic => MediaKind::Audio,
            ProducerSlot::Cam => MediaKind::Video,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ProducerSlot::Mic => "microphone",
            ProducerSlot::Cam => "webcam",
        }
    }
}

impl Session {
    fn slot_mut(&mut self, slot: ProducerSlot) -> &mut Option<String> {
        match slot {
            ProducerSlot::Mic => &mut self.mic_producer,
            ProducerSlot::Cam => &mut self.cam_producer,
        }
    }

    pub(crate) fn slot_producer(&self, slot: ProducerSlot) -> Option<&str> {
        match slot {
            ProducerSlot::Mic => self.mic_producer.as_deref(),
            ProducerSlot::Cam => self.cam_producer.as_deref(),
        }
    }

    pub(crate) async fn enable_producer(&mut self, slot: ProducerSlot) {
        if let Some(id) = self.slot_producer(slot) {
            debug!(producer_id = id, ?slot, "Producer already active");
            return;
        }
        match self.try_enable_producer(slot).await {
            Ok(()) => {}
            Err(SessionError::PreconditionNotMet(reason)) => {
                warn!(?slot, reason, "Cannot enable producer");
            }
            Err(e) => {
                error!(?slot, "Enabling producer failed: {e}");
                self.notify(Notice::error(format!("Error enabling {}: {e}", slot.label())));
            }
        }
    }

    async fn try_enable_producer(&mut self, slot: ProducerSlot) -> Result<(), SessionError> {
        let kind = slot.kind();
        let device = self
            .device
            .as_deref()
            .filter(|device| device.is_loaded())
            .ok_or(SessionError::PreconditionNotMet("device not loaded"))?;
        if !device.can_produce(kind) {
            return Err(SessionError::PreconditionNotMet("device cannot produce this kind"));
        }
        if self.send_transport.is_none() {
            return Err(SessionError::PreconditionNotMet("send transport not ready"));
        }

        let track = match slot {
            ProducerSlot::Mic => self.media.create_audio_track()?,
            ProducerSlot::Cam => self.media.create_video_track()?,
        };

        let queue = self.queue.clone();
        let on_transport_close: TransportCloseCallback = Box::new(move |producer_id| {
            queue.submit(Command::ProducerTransportClosed(producer_id));
        });
        let transport = self
            .send_transport
            .as_mut()
            .ok_or(SessionError::PreconditionNotMet("send transport not ready"))?;
        let producer = transport
            .produce(track, json!({ "source": slot.label() }), on_transport_close)
            .await?;

        let id = producer.id().to_string();
        info!(producer_id = %id, %kind, "Producer created");
        self.emit(RoomEvent::ProducerAdded(ProducerInfo {
            id: id.clone(),
            kind,
            paused: producer.paused(),
        }));
        self.producers.insert(id.clone(), producer);
        *self.slot_mut(slot) = Some(id);
        Ok(())
    }

    /// Local state is authoritative: the producer is closed and forgotten
    /// before the server hears about it, and a rejection only raises a notice.
    pub(crate) async fn disable_producer(&mut self, slot: ProducerSlot) {
        let Some(id) = self.slot_mut(slot).take() else {
            debug!(?slot, "Producer already absent");
            return;
        };

        if let Some(mut producer) = self.producers.remove(&id) {
            producer.close();
        }
        info!(producer_id = %id, ?slot, "Producer closed");
        self.emit(RoomEvent::ProducerRemoved {
            producer_id: id.clone(),
        });

        let body = ProducerRequest {
            producer_id: id.clone(),
        };
        if let Err(e) = self.request(method::CLOSE_PRODUCER, &body).await {
            error!(producer_id = %id, "closeProducer failed: {e}");
            self.notify(Notice::error(format!(
                "Error closing server-side {} producer: {e}",
                slot.label()
            )));
        }
    }

    /// Local state changes first; the server is told afterwards and a
    /// rejection is reported without rolling back.
    pub(crate) async fn set_producer_paused(&mut self, slot: ProducerSlot, paused: bool) {
        let Some(id) = self.slot_producer(slot).map(str::to_string) else {
            debug!(?slot, "No producer to pause or resume");
            return;
        };
        let Some(producer) = self.producers.get_mut(&id) else {
            return;
        };
        if producer.paused() == paused {
            debug!(producer_id = %id, paused, "Producer already in requested state");
            return;
        }

        if paused {
            producer.pause();
            self.emit(RoomEvent::ProducerPaused {
                producer_id: id.clone(),
            });
        } else {
            producer.resume();
            self.emit(RoomEvent::ProducerResumed {
                producer_id: id.clone(),
            });
        }

        let (request_method, verb) = if paused {
            (method::PAUSE_PRODUCER, "pausing")
        } else {
            (method::RESUME_PRODUCER, "resuming")
        };
        let body = ProducerRequest {
            producer_id: id.clone(),
        };
        if let Err(e) = self.request(request_method, &body).await {
            error!(producer_id = %id, "{request_method} failed: {e}");
            self.notify(Notice::error(format!(
                "Error {verb} server-side {} producer: {e}",
                slot.label()
            )));
        }
    }

    pub(crate) fn on_producer_transport_closed(&mut self, producer_id: &str) {
        let Some(mut producer) = self.producers.remove(producer_id) else {
            return;
        };
        warn!(producer_id, "Producer transport closed");
        producer.close();
        if self.mic_producer.as_deref() == Some(producer_id) {
            self.mic_producer = None;
        }
        if self.cam_producer.as_deref() == Some(producer_id) {
            self.cam_producer = None;
        }
        self.emit(RoomEvent::ProducerRemoved {
            producer_id: producer_id.to_string(),
        });
    }
}
