//! Public handle to a room.
//!
//! Every method enqueues a command and returns immediately. Outcomes arrive
//! through the [`RoomObserver`](crate::observer::RoomObserver) given at spawn
//! time; the connection state can also be read from the handle.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::observer::ConnectionState;
use crate::session::{Collaborators, RoomOptions, Session};
use crate::worker::{self, Command, WorkQueue};

#[derive(Clone)]
pub struct RoomClient {
    queue: WorkQueue,
    state: watch::Receiver<ConnectionState>,
}

impl RoomClient {
    /// Start the worker task for a room. Nothing is sent until [`join`](Self::join).
    pub fn spawn(options: RoomOptions, parts: Collaborators) -> (Self, JoinHandle<()>) {
        let (queue, rx) = WorkQueue::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let session = Session::new(options, parts, queue.clone(), state_tx);
        let handle = tokio::spawn(worker::run(session, rx));
        (
            Self {
                queue,
                state: state_rx,
            },
            handle,
        )
    }

    pub fn join(&self) {
        self.queue.submit(Command::Join);
    }

    pub fn enable_mic(&self) {
        self.queue.submit(Command::EnableMic);
    }

    pub fn disable_mic(&self) {
        self.queue.submit(Command::DisableMic);
    }

    pub fn mute_mic(&self) {
        self.queue.submit(Command::MuteMic);
    }

    pub fn unmute_mic(&self) {
        self.queue.submit(Command::UnmuteMic);
    }

    pub fn enable_cam(&self) {
        self.queue.submit(Command::EnableCam);
    }

    pub fn disable_cam(&self) {
        self.queue.submit(Command::DisableCam);
    }

    pub fn change_cam(&self) {
        self.queue.submit(Command::ChangeCam);
    }

    pub fn enable_audio_only(&self) {
        self.queue.submit(Command::EnableAudioOnly);
    }

    pub fn disable_audio_only(&self) {
        self.queue.submit(Command::DisableAudioOnly);
    }

    pub fn mute_audio(&self) {
        self.queue.submit(Command::MuteAudio);
    }

    pub fn unmute_audio(&self) {
        self.queue.submit(Command::UnmuteAudio);
    }

    pub fn restart_ice(&self) {
        self.queue.submit(Command::RestartIce);
    }

    pub fn pause_consumer(&self, consumer_id: impl Into<String>) {
        self.queue.submit(Command::PauseConsumer(consumer_id.into()));
    }

    pub fn resume_consumer(&self, consumer_id: impl Into<String>) {
        self.queue.submit(Command::ResumeConsumer(consumer_id.into()));
    }

    pub fn request_consumer_key_frame(&self, consumer_id: impl Into<String>) {
        self.queue
            .submit(Command::RequestConsumerKeyFrame(consumer_id.into()));
    }

    pub fn change_display_name(&self, display_name: impl Into<String>) {
        self.queue
            .submit(Command::ChangeDisplayName(display_name.into()));
    }

    /// Idempotent. Only the first call enqueues teardown; later submissions
    /// are refused from that point on.
    pub fn close(&self) {
        if self.queue.begin_close() {
            info!("Room close requested");
            self.queue.enqueue_close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the room has reached [`ConnectionState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // The sender only goes away when the worker exits, which is after Closed.
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}
