//! Send/recv transport legs: creation, ICE restart, teardown.

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use huddle_protocol::{
    ConnectWebRtcTransportRequest, CreateWebRtcTransportRequest, MediaKind, ProduceRequest,
    ProduceResponse, RestartIceRequest, TransportInfo, method,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::media::{Device, Direction, Transport, TransportListener};
use crate::observer::{Notice, RoomEvent};
use crate::session::Session;
use crate::signaling::SignalingChannel;

/// Bridges transport callbacks onto the signaling channel.
struct SignalingTransportListener {
    signaling: SignalingChannel,
    direction: Direction,
}

impl TransportListener for SignalingTransportListener {
    fn on_produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> BoxFuture<'static, Result<String, SessionError>> {
        let signaling = self.signaling.clone();
        let request = ProduceRequest {
            transport_id: transport_id.to_string(),
            kind,
            rtp_parameters,
            app_data,
        };
        async move {
            let response: ProduceResponse = signaling.request_as(method::PRODUCE, &request).await?;
            debug!(producer_id = %response.id, %kind, "Server assigned producer id");
            Ok(response.id)
        }
        .boxed()
    }

    fn on_connect(&self, transport_id: &str, dtls_parameters: Value) {
        let signaling = self.signaling.clone();
        let direction = self.direction;
        let request = ConnectWebRtcTransportRequest {
            transport_id: transport_id.to_string(),
            dtls_parameters,
        };
        tokio::spawn(async move {
            match signaling
                .request(method::CONNECT_WEBRTC_TRANSPORT, &request)
                .await
            {
                Ok(_) => debug!(transport_id = %request.transport_id, ?direction, "Transport connected"),
                Err(e) => error!(
                    transport_id = %request.transport_id,
                    ?direction,
                    "connectWebRtcTransport failed: {e}"
                ),
            }
        });
    }

    fn on_connection_state_change(&self, transport_id: &str, state: &str) {
        info!(transport_id, direction = ?self.direction, state, "Transport connection state changed");
    }
}

impl Session {
    async fn request_transport(
        &mut self,
        direction: Direction,
    ) -> Result<(TransportInfo, Arc<dyn TransportListener>), SessionError> {
        let signaling = self.signaling()?;
        let request = CreateWebRtcTransportRequest {
            force_tcp: self.options.force_tcp,
            producing: direction == Direction::Send,
            consuming: direction == Direction::Recv,
            sctp_capabilities: None,
        };
        let info: TransportInfo = signaling
            .request_as(method::CREATE_WEBRTC_TRANSPORT, &request)
            .await?;
        debug!(transport_id = %info.id, ?direction, "Transport parameters received");
        let listener: Arc<dyn TransportListener> = Arc::new(SignalingTransportListener {
            signaling,
            direction,
        });
        Ok((info, listener))
    }

    pub(crate) async fn create_send_transport(&mut self) -> Result<(), SessionError> {
        let (info, listener) = self.request_transport(Direction::Send).await?;
        let transport = self.loaded_device()?.create_send_transport(info, listener)?;
        info!(transport_id = transport.id(), "Send transport created");
        if let Some(mut stale) = self.send_transport.replace(transport) {
            warn!(transport_id = stale.id(), "Replacing a live send transport");
            stale.close();
        }
        Ok(())
    }

    pub(crate) async fn create_recv_transport(&mut self) -> Result<(), SessionError> {
        let (info, listener) = self.request_transport(Direction::Recv).await?;
        let transport = self.loaded_device()?.create_recv_transport(info, listener)?;
        info!(transport_id = transport.id(), "Recv transport created");
        if let Some(mut stale) = self.recv_transport.replace(transport) {
            warn!(transport_id = stale.id(), "Replacing a live recv transport");
            stale.close();
        }
        Ok(())
    }

    pub(crate) async fn restart_ice(&mut self) {
        self.emit(RoomEvent::RestartIceInProgress(true));
        if let Err(e) = self.restart_ice_legs().await {
            error!("ICE restart failed: {e}");
            self.notify(Notice::error(format!("ICE restart failed: {e}")));
        }
        self.emit(RoomEvent::RestartIceInProgress(false));
    }

    /// Restart both legs; the first failure is returned once both have run.
    async fn restart_ice_legs(&mut self) -> Result<(), SessionError> {
        let signaling = self.signaling()?;
        let mut first_error = None;

        if let Some(transport) = self.send_transport.as_mut()
            && let Err(e) = restart_leg(&signaling, transport.as_mut()).await
        {
            first_error.get_or_insert(e);
        }
        if let Some(transport) = self.recv_transport.as_mut()
            && let Err(e) = restart_leg(&signaling, transport.as_mut()).await
        {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn loaded_device(&mut self) -> Result<&mut Box<dyn Device>, SessionError> {
        self.device
            .as_mut()
            .filter(|device| device.is_loaded())
            .ok_or(SessionError::PreconditionNotMet("device not loaded"))
    }

    /// Close every producer and consumer, then both transports, then drop the
    /// device. The next join builds and loads a new one.
    pub(crate) fn dispose_transport_device(&mut self) {
        let observer = Arc::clone(&self.observer);

        for (producer_id, mut producer) in self.producers.drain() {
            producer.close();
            observer.on_event(RoomEvent::ProducerRemoved { producer_id });
        }
        self.mic_producer = None;
        self.cam_producer = None;

        for (consumer_id, mut entry) in self.consumers.drain() {
            entry.consumer.close();
            observer.on_event(RoomEvent::ConsumerRemoved {
                peer_id: entry.peer_id,
                consumer_id,
            });
        }

        if let Some(mut transport) = self.send_transport.take() {
            debug!(transport_id = transport.id(), "Closing send transport");
            transport.close();
        }
        if let Some(mut transport) = self.recv_transport.take() {
            debug!(transport_id = transport.id(), "Closing recv transport");
            transport.close();
        }
        if self.device.take().is_some() {
            debug!("Device released");
        }
    }
}

async fn restart_leg<T: Transport + ?Sized>(
    signaling: &SignalingChannel,
    transport: &mut T,
) -> Result<(), SessionError> {
    let request = RestartIceRequest {
        transport_id: transport.id().to_string(),
    };
    let ice_parameters = signaling.request(method::RESTART_ICE, &request).await?;
    transport.restart_ice(ice_parameters)?;
    debug!(transport_id = %request.transport_id, "ICE restarted");
    Ok(())
}
