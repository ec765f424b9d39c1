//! Single-writer work queue.
//!
//! Every room mutation (user commands, server pushes, transport callbacks)
//! travels through one FIFO channel into one task that exclusively owns the
//! [`Session`]. A command may await signaling responses; nothing else runs
//! until it finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::session::Session;
use crate::signaling::SignalingEvent;

#[derive(Debug)]
pub(crate) enum Command {
    Join,
    EnableMic,
    DisableMic,
    MuteMic,
    UnmuteMic,
    EnableCam,
    DisableCam,
    ChangeCam,
    EnableAudioOnly,
    DisableAudioOnly,
    MuteAudio,
    UnmuteAudio,
    RestartIce,
    PauseConsumer(String),
    ResumeConsumer(String),
    RequestConsumerKeyFrame(String),
    ChangeDisplayName(String),
    Signaling(SignalingEvent),
    ProducerTransportClosed(String),
    ConsumerTransportClosed(String),
    Close,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Join => "join",
            Command::EnableMic => "enable_mic",
            Command::DisableMic => "disable_mic",
            Command::MuteMic => "mute_mic",
            Command::UnmuteMic => "unmute_mic",
            Command::EnableCam => "enable_cam",
            Command::DisableCam => "disable_cam",
            Command::ChangeCam => "change_cam",
            Command::EnableAudioOnly => "enable_audio_only",
            Command::DisableAudioOnly => "disable_audio_only",
            Command::MuteAudio => "mute_audio",
            Command::UnmuteAudio => "unmute_audio",
            Command::RestartIce => "restart_ice",
            Command::PauseConsumer(_) => "pause_consumer",
            Command::ResumeConsumer(_) => "resume_consumer",
            Command::RequestConsumerKeyFrame(_) => "request_consumer_key_frame",
            Command::ChangeDisplayName(_) => "change_display_name",
            Command::Signaling(_) => "signaling_event",
            Command::ProducerTransportClosed(_) => "producer_transport_closed",
            Command::ConsumerTransportClosed(_) => "consumer_transport_closed",
            Command::Close => "close",
        }
    }
}

/// Submission handle. Cloned into callers, the signaling forwarder and
/// transport-close callbacks.
#[derive(Clone)]
pub(crate) struct WorkQueue {
    tx: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
}

impl WorkQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Enqueue `command` unless the room is closing. Returns whether it was accepted.
    pub(crate) fn submit(&self, command: Command) -> bool {
        if self.is_closed() {
            debug!(command = command.name(), "Room closed, dropping command");
            return false;
        }
        self.tx.send(command).is_ok()
    }

    /// Flip the closed flag. Only the first caller gets `true`.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Enqueue the teardown command, bypassing the closed flag.
    pub(crate) fn enqueue_close(&self) {
        let _ = self.tx.send(Command::Close);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Drive `session` until it shuts down, then drop whatever is still queued.
pub(crate) async fn run(mut session: Session, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        debug!(command = command.name(), "Running command");
        session.handle(command).await;
        if session.is_terminated() {
            break;
        }
    }

    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    debug!(dropped, "Work queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_is_refused_after_close() {
        let (queue, mut rx) = WorkQueue::new();
        assert!(queue.submit(Command::EnableMic));
        assert!(queue.begin_close());
        assert!(!queue.begin_close());
        assert!(!queue.submit(Command::EnableCam));
        queue.enqueue_close();

        assert!(matches!(rx.try_recv(), Ok(Command::EnableMic)));
        assert!(matches!(rx.try_recv(), Ok(Command::Close)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clones_share_the_closed_flag() {
        let (queue, _rx) = WorkQueue::new();
        let other = queue.clone();
        assert!(other.begin_close());
        assert!(queue.is_closed());
        assert!(!queue.begin_close());
    }
}
