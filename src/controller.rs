//! Call orchestration
//!
//! [`CallController`] ties signaling to media: a call record reaching
//! `accepted` is what authorizes joining the room, a terminal record or an
//! explicit hang-up tears the session down, and one [`CallUiState`] watch
//! value gives embedders everything a call screen renders.

use crate::call::{AnswerOutcome, CallConfig, CallError, CallSignaling};
use crate::channel::SignalingChannel;
use crate::identity::ParticipantId;
use crate::media::{
    MediaError, MediaTransport, ParticipantSession, SessionSnapshot, SurfaceBindings,
};
use crate::render::TrackRenderer;
use crate::store::CallStore;
use crate::token::TokenProvider;
use crate::types::{
    CallEvent, CallId, CallRecord, CallStatus, ConnectionState, ErrorCategory, RoomName,
    VideoProfile,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Signaling configuration
    pub call: CallConfig,
    /// Local video capture profile
    pub video: VideoProfile,
    /// Surfaces the session renders into
    pub surfaces: SurfaceBindings,
}

/// Orchestration errors
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Signaling failed
    #[error(transparent)]
    Call(#[from] CallError),

    /// The media session failed
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl ControllerError {
    /// Machine-checkable category
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Call(e) => e.category(),
            Self::Media(e) => e.category(),
        }
    }
}

/// Everything a call screen needs, as one watchable value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallUiState {
    /// Call this side is currently part of
    pub active_call: Option<CallId>,
    /// Media connection state
    pub connection_state: ConnectionState,
    /// Whether the other party is in the room
    pub remote_participant_present: bool,
    /// Whether the local microphone is flowing
    pub local_audio_enabled: bool,
    /// Whether the local camera is flowing
    pub local_video_enabled: bool,
}

struct ActiveCall {
    call_id: CallId,
    peer: ParticipantId,
    placed_by_us: bool,
}

/// Builder for [`CallController`]
pub struct CallControllerBuilder<C: SignalingChannel> {
    channel: Arc<C>,
    transport: Arc<dyn MediaTransport>,
    tokens: Arc<dyn TokenProvider>,
    self_id: ParticipantId,
    config: ControllerConfig,
}

impl<C: SignalingChannel> CallControllerBuilder<C> {
    /// Start a builder with the required collaborators
    pub fn new(
        channel: Arc<C>,
        transport: Arc<dyn MediaTransport>,
        tokens: Arc<dyn TokenProvider>,
        self_id: ParticipantId,
    ) -> Self {
        Self {
            channel,
            transport,
            tokens,
            self_id,
            config: ControllerConfig::default(),
        }
    }

    /// Override the default configuration
    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build and start the controller
    pub fn build(self) -> Arc<CallController<C>> {
        let signaling = CallSignaling::new(
            CallStore::new(self.channel),
            self.self_id.clone(),
            self.config.call,
        );
        signaling.start();

        let renderer = Arc::new(TrackRenderer::new());
        let session = ParticipantSession::new(
            self.transport,
            self.tokens,
            renderer,
            self.config.surfaces,
            self.config.video,
        );

        let (ui, _) = watch::channel(CallUiState::default());
        let controller = Arc::new(CallController {
            signaling,
            session,
            self_id: self.self_id,
            ui,
            active: Mutex::new(None),
            outgoing_task: Mutex::new(None),
            mirror_task: Mutex::new(None),
        });
        controller.spawn_mirror();
        controller
    }
}

/// One participant's call endpoint: signaling plus media, orchestrated
pub struct CallController<C: SignalingChannel> {
    signaling: Arc<CallSignaling<C>>,
    session: Arc<ParticipantSession>,
    self_id: ParticipantId,
    ui: watch::Sender<CallUiState>,
    active: Mutex<Option<ActiveCall>>,
    outgoing_task: Mutex<Option<JoinHandle<()>>>,
    mirror_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: SignalingChannel> CallController<C> {
    /// Watch the call screen state
    #[must_use]
    pub fn ui_state(&self) -> watch::Receiver<CallUiState> {
        self.ui.subscribe()
    }

    /// Watch the single visible incoming call
    #[must_use]
    pub fn incoming_call(&self) -> watch::Receiver<Option<CallRecord>> {
        self.signaling.incoming_call()
    }

    /// Subscribe to call lifecycle events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.signaling.subscribe_events()
    }

    /// Media session, for direct observation
    #[must_use]
    pub fn session(&self) -> &Arc<ParticipantSession> {
        &self.session
    }

    /// Renderer, for registering UI surfaces
    #[must_use]
    pub fn renderer(&self) -> &Arc<TrackRenderer> {
        self.session.renderer()
    }

    fn spawn_mirror(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let mut snapshot = self.session.snapshot();
        let task = tokio::spawn(async move {
            loop {
                let current = snapshot.borrow_and_update().clone();
                controller.apply_session(&current);
                if snapshot.changed().await.is_err() {
                    break;
                }
            }
        });
        *self
            .mirror_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    fn apply_session(&self, snapshot: &SessionSnapshot) {
        let active_call = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|active| active.call_id.clone());
        self.ui.send_replace(CallUiState {
            active_call,
            connection_state: snapshot.connection_state,
            remote_participant_present: snapshot.remote_participant.is_some(),
            local_audio_enabled: snapshot.local_audio_enabled,
            local_video_enabled: snapshot.local_video_enabled,
        });
    }

    fn refresh_ui(&self) {
        let current = self.session.snapshot().borrow().clone();
        self.apply_session(&current);
    }

    fn set_active(&self, active: Option<ActiveCall>) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = active;
        self.refresh_ui();
    }

    fn clear_active_if(&self, call_id: &CallId) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active
            .as_ref()
            .is_some_and(|current| &current.call_id == call_id)
        {
            *active = None;
        }
        drop(active);
        self.refresh_ui();
    }

    async fn join_room(&self, room: &RoomName) {
        // A media failure here does not touch the call record; the accepted
        // status stands and the user retries or hangs up
        if let Err(e) = self.session.connect(room, &self.self_id).await {
            tracing::error!(error = %e, category = ?e.category(), "Media connect failed");
        }
    }

    /// Place a call
    ///
    /// Returns as soon as the call record is written. The controller then
    /// watches the record in the background and joins the room only once the
    /// receiver accepts; a rejection or cancellation just clears the call.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Call`] if the signaling store is
    /// unavailable.
    #[tracing::instrument(skip(self, display_name), fields(receiver = %receiver))]
    pub async fn place_call(
        self: &Arc<Self>,
        receiver: &ParticipantId,
        display_name: &str,
    ) -> Result<CallId, ControllerError> {
        let record = self.signaling.initiate(receiver, display_name).await?;
        self.set_active(Some(ActiveCall {
            call_id: record.call_id.clone(),
            peer: receiver.clone(),
            placed_by_us: true,
        }));

        let controller = Arc::clone(self);
        let mut status = self.signaling.watch_call(receiver, &record.call_id);
        let room = record.room_name.clone();
        let call_id = record.call_id.clone();
        let task = tokio::spawn(async move {
            loop {
                let current = *status.borrow_and_update();
                match current {
                    Some(CallStatus::Accepted) => {
                        controller.join_room(&room).await;
                        break;
                    }
                    Some(CallStatus::Rejected) | Some(CallStatus::Cancelled) => {
                        tracing::info!(call_id = %call_id, status = ?current, "Placed call ended unanswered");
                        controller.clear_active_if(&call_id);
                        break;
                    }
                    Some(CallStatus::Ringing) | None => {}
                }
                if status.changed().await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self
            .outgoing_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task)
        {
            previous.abort();
        }
        Ok(record.call_id)
    }

    /// Accept the visible incoming call and join its room
    ///
    /// The accept write happens first; only once the record is durably
    /// `accepted` does the media connect begin. If the call was already
    /// settled by the other side this is a quiet no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Call`] if signaling fails and
    /// [`ControllerError::Media`] if the subsequent connect fails; in the
    /// latter case the call record stays `accepted`.
    #[tracing::instrument(skip(self))]
    pub async fn accept_incoming(&self) -> Result<(), ControllerError> {
        match self.signaling.accept().await? {
            AnswerOutcome::Accepted(record) => {
                self.set_active(Some(ActiveCall {
                    call_id: record.call_id.clone(),
                    peer: record.caller_id.clone(),
                    placed_by_us: false,
                }));
                self.session.connect(&record.room_name, &self.self_id).await?;
                Ok(())
            }
            AnswerOutcome::AlreadyEnded(status) => {
                tracing::info!(?status, "Incoming call ended before answering");
                Ok(())
            }
        }
    }

    /// Reject the visible incoming call
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Call`] if signaling fails.
    pub async fn reject_incoming(&self) -> Result<(), ControllerError> {
        self.signaling.reject().await?;
        Ok(())
    }

    /// End the current call
    ///
    /// Tears the media session down unconditionally. If this side placed
    /// the call and it is still ringing, the hang-up doubles as a cancel;
    /// on an already-settled record the cancel is silently absorbed.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Call`] if a needed cancel write fails.
    #[tracing::instrument(skip(self))]
    pub async fn hang_up(&self) -> Result<(), ControllerError> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = self
            .outgoing_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.session.disconnect().await;

        if let Some(active) = active {
            if active.placed_by_us {
                self.signaling.cancel(&active.peer, &active.call_id).await?;
            }
        }
        self.refresh_ui();
        Ok(())
    }

    /// Toggle the local microphone, returning the new enabled state
    pub async fn toggle_audio(&self) -> bool {
        self.session.toggle_local_audio().await
    }

    /// Toggle the local camera, returning the new enabled state
    pub async fn toggle_video(&self) -> bool {
        self.session.toggle_local_video().await
    }

    /// Stop background tasks and tear down any session
    pub async fn shutdown(&self) {
        self.session.disconnect().await;
        self.signaling.shutdown();
        for slot in [&self.outgoing_task, &self.mirror_task] {
            if let Some(task) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                task.abort();
            }
        }
    }
}
