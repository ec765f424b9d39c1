//! Server-pushed notifications, applied in arrival order.

use huddle_protocol::{Notification, ServerNotification};
use tracing::{debug, info, warn};

use crate::observer::{Notice, Originator, RoomEvent};
use crate::session::Session;

impl Session {
    pub(crate) fn handle_notification(&mut self, notification: Notification) {
        let parsed = match ServerNotification::try_from(&notification) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(method = %notification.method, "Unhandled notification: {e}");
                return;
            }
        };

        match parsed {
            ServerNotification::NewPeer(peer) => {
                info!(peer_id = %peer.id, "Peer joined");
                let text = format!("{} has joined the room", peer.display_name);
                self.emit(RoomEvent::PeerAdded(peer));
                self.notify(Notice::info(text));
            }
            ServerNotification::PeerClosed { peer_id } => {
                info!(%peer_id, "Peer left");
                self.emit(RoomEvent::PeerRemoved { peer_id });
            }
            ServerNotification::PeerDisplayNameChanged {
                peer_id,
                display_name,
                old_display_name,
            } => {
                let text = format!("{old_display_name} is now {display_name}");
                self.emit(RoomEvent::PeerDisplayNameChanged {
                    peer_id,
                    display_name,
                });
                self.notify(Notice::info(text));
            }
            ServerNotification::ConsumerClosed { consumer_id } => {
                if self.remove_consumer(&consumer_id) {
                    debug!(%consumer_id, "Consumer closed by server");
                }
            }
            ServerNotification::ConsumerPaused { consumer_id } => {
                if self.consumers.contains_key(&consumer_id) {
                    self.emit(RoomEvent::ConsumerPaused {
                        consumer_id,
                        originator: Originator::Remote,
                    });
                }
            }
            ServerNotification::ConsumerResumed { consumer_id } => {
                if self.consumers.contains_key(&consumer_id) {
                    self.emit(RoomEvent::ConsumerResumed {
                        consumer_id,
                        originator: Originator::Remote,
                    });
                }
            }
            ServerNotification::ConsumerScore { consumer_id, score } => {
                if self.consumers.contains_key(&consumer_id) {
                    self.emit(RoomEvent::ConsumerScore { consumer_id, score });
                }
            }
            ServerNotification::ProducerScore { producer_id, score } => {
                if self.producers.contains_key(&producer_id) {
                    self.emit(RoomEvent::ProducerScore { producer_id, score });
                }
            }
            ServerNotification::ActiveSpeaker { peer_id } => {
                self.emit(RoomEvent::ActiveSpeaker(peer_id));
            }
            ServerNotification::ConsumerLayersChanged {
                consumer_id,
                spatial_layer,
                temporal_layer,
            } => {
                debug!(%consumer_id, ?spatial_layer, ?temporal_layer, "Consumer layers changed");
            }
            ServerNotification::DataConsumerClosed { data_consumer_id } => {
                debug!(%data_consumer_id, "Ignoring dataConsumerClosed");
            }
            ServerNotification::DownlinkBwe(_) => {}
        }
    }
}
