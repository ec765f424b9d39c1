//! Client side of a mediasoup room: joins over protoo signaling, negotiates
//! the send/recv transport legs, and manages local producers and server-pushed
//! consumers on a single worker task.

mod consumer;
pub mod error;
pub mod headless;
pub mod media;
mod notifications;
pub mod observer;
mod producer;
pub mod room;
mod session;
pub mod signaling;
#[cfg(test)]
mod testing;
mod transport;
mod worker;
pub mod ws;

pub use error::SessionError;
pub use headless::{HeadlessDevice, HeadlessMedia};
pub use media::MediaError;
pub use observer::{
    ConnectionState, Notice, NoticeLevel, RoomEvent, RoomObserver, RoomSnapshot, RoomStore,
};
pub use room::RoomClient;
pub use session::{Collaborators, RoomOptions};
pub use signaling::{Connector, SignalingChannel};
pub use ws::{RetryPolicy, WsConnector};
