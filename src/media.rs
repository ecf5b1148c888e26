//! Live media session management
//!
//! One [`ParticipantSession`] is one side's presence in a call room:
//! captured local tracks, the room connection, and the remote participant's
//! subscribed tracks. The media transport itself is pluggable behind
//! [`MediaTransport`]; the session owns sequencing, cancellation, and
//! teardown, which are the parts that actually go wrong in production.

use crate::identity::ParticipantId;
use crate::render::{SurfaceId, TrackRenderer};
use crate::token::{AccessToken, TokenError, TokenProvider};
use crate::types::{ConnectionState, ErrorCategory, MediaKind, RoomName, TrackOrigin, VideoProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Why a room connect failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Network-level failure reaching the transport
    Network,
    /// The named room does not exist
    NotFound,
    /// Any other transport failure
    Other,
}

/// Media session errors
#[derive(Error, Debug)]
pub enum MediaError {
    /// Camera or microphone could not be acquired
    #[error("camera or microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// Token issuance failed
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Connecting to the room failed
    #[error("could not connect to the call room: {message}")]
    ConnectFailed {
        /// Failure classification
        kind: ConnectFailure,
        /// Transport-reported detail
        message: String,
    },

    /// Attaching a track to a surface failed
    #[error("track attach failed: {0}")]
    AttachFailed(String),

    /// The session was torn down while a connect was in flight
    #[error("session torn down during connect")]
    SessionClosing,

    /// A connect was issued while a session was already active
    #[error("a session is already active")]
    SessionActive,
}

impl MediaError {
    /// Machine-checkable category
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DeviceUnavailable(_) => ErrorCategory::DeviceUnavailable,
            Self::Token(_) => ErrorCategory::TokenIssuanceFailed,
            Self::ConnectFailed { kind, .. } => match kind {
                ConnectFailure::Network => ErrorCategory::TransportNetwork,
                ConnectFailure::NotFound => ErrorCategory::TransportNotFound,
                ConnectFailure::Other => ErrorCategory::TransportOther,
            },
            Self::AttachFailed(_) | Self::SessionClosing | Self::SessionActive => {
                ErrorCategory::TransportOther
            }
        }
    }
}

/// A single audio or video track
///
/// Local and remote tracks share one handle type: `set_enabled` and `stop`
/// act on local capture and are ignored by remote track implementations.
#[async_trait]
pub trait MediaTrack: std::fmt::Debug + Send + Sync {
    /// Transport-assigned track identifier
    fn id(&self) -> String;

    /// Audio or video
    fn kind(&self) -> MediaKind;

    /// Local capture or remote subscription
    fn origin(&self) -> TrackOrigin;

    /// Pause or resume the stream without renegotiating
    fn set_enabled(&self, enabled: bool);

    /// Whether the stream is currently flowing
    fn is_enabled(&self) -> bool;

    /// Bind the track to a rendering surface
    async fn attach(&self, surface: &SurfaceId, muted: bool) -> Result<(), MediaError>;

    /// Unbind the track from its surface
    async fn detach(&self);

    /// Stop capture and release the device
    async fn stop(&self);
}

/// Room-level event delivered by the transport
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A remote participant joined
    ParticipantConnected {
        /// Joining identity
        identity: ParticipantId,
    },
    /// A remote participant left
    ParticipantDisconnected {
        /// Leaving identity
        identity: ParticipantId,
    },
    /// A remote track became available
    TrackSubscribed {
        /// Publishing identity
        identity: ParticipantId,
        /// The track
        track: Arc<dyn MediaTrack>,
    },
    /// A remote track went away
    TrackUnsubscribed {
        /// Publishing identity
        identity: ParticipantId,
        /// Identifier of the removed track
        track_id: String,
    },
}

/// A live connection to one room
#[async_trait]
pub trait RoomHandle: Send + Sync {
    /// Remote identities present right now
    ///
    /// Participants who joined before this side connected only appear here,
    /// not as [`RoomEvent::ParticipantConnected`].
    fn participants(&self) -> Vec<ParticipantId>;

    /// Tracks already subscribed for one participant
    fn subscribed_tracks(&self, identity: &ParticipantId) -> Vec<Arc<dyn MediaTrack>>;

    /// Subscribe to room events
    fn events(&self) -> broadcast::Receiver<RoomEvent>;

    /// Leave the room
    async fn disconnect(&self);
}

/// Pluggable media transport
#[async_trait]
pub trait MediaTransport: Send + Sync + 'static {
    /// Capture a local track
    async fn acquire_local_track(
        &self,
        kind: MediaKind,
        profile: &VideoProfile,
    ) -> Result<Arc<dyn MediaTrack>, MediaError>;

    /// Connect to a room, publishing the given local tracks
    async fn connect(
        &self,
        token: &AccessToken,
        room: &RoomName,
        tracks: Vec<Arc<dyn MediaTrack>>,
    ) -> Result<Arc<dyn RoomHandle>, MediaError>;
}

/// Surfaces a session renders into
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceBindings {
    /// Self-view video surface
    pub local_video: SurfaceId,
    /// Remote video surface
    pub remote_video: SurfaceId,
    /// Remote audio sink
    pub remote_audio: SurfaceId,
}

impl Default for SurfaceBindings {
    fn default() -> Self {
        Self {
            local_video: SurfaceId::new("local-video"),
            remote_video: SurfaceId::new("remote-video"),
            remote_audio: SurfaceId::new("remote-audio"),
        }
    }
}

/// Observable state of a session at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Connection state
    pub connection_state: ConnectionState,
    /// Remote participant, when one is present
    pub remote_participant: Option<ParticipantId>,
    /// Whether the local microphone is flowing
    pub local_audio_enabled: bool,
    /// Whether the local camera is flowing
    pub local_video_enabled: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Idle,
            remote_participant: None,
            local_audio_enabled: false,
            local_video_enabled: false,
        }
    }
}

/// Session lifecycle event for observers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection state changed
    StateChanged(ConnectionState),
    /// The remote participant joined
    ParticipantJoined(ParticipantId),
    /// The remote participant left
    ParticipantLeft(ParticipantId),
    /// A remote track was routed to its surface
    TrackSubscribed {
        /// Audio or video
        kind: MediaKind,
    },
    /// A remote track went away
    TrackUnsubscribed {
        /// Identifier of the removed track
        track_id: String,
    },
    /// Local microphone toggled
    LocalAudioEnabled(bool),
    /// Local camera toggled
    LocalVideoEnabled(bool),
}

const EVENT_CAPACITY: usize = 64;

#[derive(Default)]
struct SessionInner {
    state: ConnectionState,
    room: Option<Arc<dyn RoomHandle>>,
    local_audio: Option<Arc<dyn MediaTrack>>,
    local_video: Option<Arc<dyn MediaTrack>>,
    remote_tracks: Vec<Arc<dyn MediaTrack>>,
    remote_participant: Option<ParticipantId>,
    event_task: Option<JoinHandle<()>>,
}

/// One side's live presence in a call room
pub struct ParticipantSession {
    transport: Arc<dyn MediaTransport>,
    tokens: Arc<dyn TokenProvider>,
    renderer: Arc<TrackRenderer>,
    surfaces: SurfaceBindings,
    profile: VideoProfile,
    /// Set by `disconnect`; checked after every await in `connect` so a
    /// hang-up during setup unwinds instead of finishing the connect.
    closing: AtomicBool,
    inner: Mutex<SessionInner>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl ParticipantSession {
    /// Create an idle session
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        tokens: Arc<dyn TokenProvider>,
        renderer: Arc<TrackRenderer>,
        surfaces: SurfaceBindings,
        profile: VideoProfile,
    ) -> Arc<Self> {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            transport,
            tokens,
            renderer,
            surfaces,
            profile,
            closing: AtomicBool::new(false),
            inner: Mutex::new(SessionInner::default()),
            snapshot,
            events,
        })
    }

    /// Renderer this session routes tracks through
    #[must_use]
    pub fn renderer(&self) -> &Arc<TrackRenderer> {
        &self.renderer
    }

    /// Watch the session state
    #[must_use]
    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    fn publish(&self, inner: &SessionInner) {
        self.snapshot.send_replace(SessionSnapshot {
            connection_state: inner.state,
            remote_participant: inner.remote_participant.clone(),
            local_audio_enabled: inner
                .local_audio
                .as_ref()
                .is_some_and(|track| track.is_enabled()),
            local_video_enabled: inner
                .local_video
                .as_ref()
                .is_some_and(|track| track.is_enabled()),
        });
    }

    fn set_state(&self, inner: &mut SessionInner, state: ConnectionState) {
        if inner.state != state {
            inner.state = state;
            self.publish(inner);
            let _ = self.events.send(SessionEvent::StateChanged(state));
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    async fn release_tracks(&self, tracks: &[Arc<dyn MediaTrack>]) {
        for track in tracks {
            track.detach().await;
            track.stop().await;
        }
    }

    async fn unwind(&self, inner: &mut SessionInner, acquired: &[Arc<dyn MediaTrack>]) {
        self.release_tracks(acquired).await;
        self.renderer.clear().await;
        self.set_state(inner, ConnectionState::Disconnected);
    }

    /// Connect to a room
    ///
    /// Acquires an access token, captures local audio and video, renders the
    /// self-view, joins the room, then wires up the remote participant. A
    /// concurrent [`disconnect`](Self::disconnect) aborts the attempt at the
    /// next step boundary and the partially acquired resources are released.
    #[tracing::instrument(skip(self), fields(room = %room, identity = %identity))]
    pub async fn connect(
        self: &Arc<Self>,
        room: &RoomName,
        identity: &ParticipantId,
    ) -> Result<(), MediaError> {
        let mut inner = self.inner.lock().await;
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(MediaError::SessionActive);
        }
        self.closing.store(false, Ordering::SeqCst);
        self.set_state(&mut inner, ConnectionState::Connecting);

        // Step 1: token
        let token = match self.tokens.get_access_token(identity, room).await {
            Ok(token) => token,
            Err(e) => {
                self.unwind(&mut inner, &[]).await;
                return Err(e.into());
            }
        };
        if self.is_closing() {
            self.unwind(&mut inner, &[]).await;
            return Err(MediaError::SessionClosing);
        }

        // Step 2: local video, rendered muted so the user never hears
        // themselves
        let video = match self
            .transport
            .acquire_local_track(MediaKind::Video, &self.profile)
            .await
        {
            Ok(track) => track,
            Err(e) => {
                self.unwind(&mut inner, &[]).await;
                return Err(e);
            }
        };
        if self.is_closing() {
            self.unwind(&mut inner, &[Arc::clone(&video)]).await;
            return Err(MediaError::SessionClosing);
        }
        if let Err(e) = self
            .renderer
            .offer_track(&self.surfaces.local_video, Arc::clone(&video))
            .await
        {
            tracing::warn!(error = %e, "Self-view attach failed");
        }

        // Step 3: local audio
        let audio = match self
            .transport
            .acquire_local_track(MediaKind::Audio, &self.profile)
            .await
        {
            Ok(track) => track,
            Err(e) => {
                self.unwind(&mut inner, &[Arc::clone(&video)]).await;
                return Err(e);
            }
        };
        if self.is_closing() {
            self.unwind(&mut inner, &[Arc::clone(&video), Arc::clone(&audio)])
                .await;
            return Err(MediaError::SessionClosing);
        }

        // Step 4: join the room with both tracks published
        let acquired = [Arc::clone(&video), Arc::clone(&audio)];
        let room_handle = match self
            .transport
            .connect(&token, room, vec![Arc::clone(&audio), Arc::clone(&video)])
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.unwind(&mut inner, &acquired).await;
                return Err(e);
            }
        };
        if self.is_closing() {
            room_handle.disconnect().await;
            self.unwind(&mut inner, &acquired).await;
            return Err(MediaError::SessionClosing);
        }

        // Step 5: wire up the remote side. Subscribe to events before
        // enumerating so nothing falls between the two.
        let room_events = room_handle.events();
        inner.local_video = Some(video);
        inner.local_audio = Some(audio);
        inner.room = Some(Arc::clone(&room_handle));
        self.set_state(&mut inner, ConnectionState::Connected);

        for existing in room_handle.participants() {
            tracing::debug!(identity = %existing, "Remote participant already in room");
            inner.remote_participant = Some(existing.clone());
            let _ = self
                .events
                .send(SessionEvent::ParticipantJoined(existing.clone()));
            for track in room_handle.subscribed_tracks(&existing) {
                self.route_remote_track(&mut inner, track).await;
            }
        }
        self.publish(&inner);

        let session = Arc::clone(self);
        inner.event_task = Some(tokio::spawn(async move {
            session.run_room_events(room_events).await;
        }));

        tracing::info!("Session connected");
        Ok(())
    }

    async fn run_room_events(self: Arc<Self>, mut events: broadcast::Receiver<RoomEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_room_event(event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Room event feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_room_event(&self, event: RoomEvent) {
        match event {
            RoomEvent::ParticipantConnected { identity } => {
                tracing::info!(identity = %identity, "Remote participant joined");
                let mut inner = self.inner.lock().await;
                inner.remote_participant = Some(identity.clone());
                self.publish(&inner);
                let _ = self.events.send(SessionEvent::ParticipantJoined(identity));
            }
            RoomEvent::ParticipantDisconnected { identity } => {
                tracing::info!(identity = %identity, "Remote participant left");
                let mut inner = self.inner.lock().await;
                inner.remote_participant = None;
                let departed: Vec<_> = inner.remote_tracks.drain(..).collect();
                for track in departed {
                    self.renderer.remove_track(&track.id()).await;
                }
                self.publish(&inner);
                let _ = self.events.send(SessionEvent::ParticipantLeft(identity));
            }
            RoomEvent::TrackSubscribed { track, .. } => {
                let mut inner = self.inner.lock().await;
                self.route_remote_track(&mut inner, track).await;
            }
            RoomEvent::TrackUnsubscribed { track_id, .. } => {
                let mut inner = self.inner.lock().await;
                inner.remote_tracks.retain(|track| track.id() != track_id);
                self.renderer.remove_track(&track_id).await;
                let _ = self
                    .events
                    .send(SessionEvent::TrackUnsubscribed { track_id });
            }
        }
    }

    async fn route_remote_track(&self, inner: &mut SessionInner, track: Arc<dyn MediaTrack>) {
        if inner
            .remote_tracks
            .iter()
            .any(|existing| existing.id() == track.id())
        {
            return;
        }
        let surface = match track.kind() {
            MediaKind::Audio => &self.surfaces.remote_audio,
            MediaKind::Video => &self.surfaces.remote_video,
        };
        let kind = track.kind();
        if let Err(e) = self.renderer.offer_track(surface, Arc::clone(&track)).await {
            tracing::warn!(error = %e, track_id = %track.id(), "Remote track attach failed");
        }
        inner.remote_tracks.push(track);
        let _ = self.events.send(SessionEvent::TrackSubscribed { kind });
    }

    /// Tear the session down
    ///
    /// Safe to call from any state and safe to call repeatedly. A connect
    /// attempt in flight observes the closing flag and unwinds itself.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.event_task.take() {
            task.abort();
        }
        if let Some(room) = inner.room.take() {
            room.disconnect().await;
        }
        let remote: Vec<_> = inner.remote_tracks.drain(..).collect();
        for track in remote {
            self.renderer.remove_track(&track.id()).await;
        }
        let locals: Vec<_> = inner
            .local_audio
            .take()
            .into_iter()
            .chain(inner.local_video.take())
            .collect();
        self.release_tracks(&locals).await;
        self.renderer.clear().await;
        inner.remote_participant = None;
        self.set_state(&mut inner, ConnectionState::Disconnected);
        tracing::info!("Session disconnected");
    }

    /// Toggle the local microphone, returning the new enabled state
    pub async fn toggle_local_audio(&self) -> bool {
        let inner = self.inner.lock().await;
        let enabled = match &inner.local_audio {
            Some(track) => {
                let enabled = !track.is_enabled();
                track.set_enabled(enabled);
                enabled
            }
            None => false,
        };
        self.publish(&inner);
        let _ = self.events.send(SessionEvent::LocalAudioEnabled(enabled));
        enabled
    }

    /// Toggle the local camera, returning the new enabled state
    pub async fn toggle_local_video(&self) -> bool {
        let inner = self.inner.lock().await;
        let enabled = match &inner.local_video {
            Some(track) => {
                let enabled = !track.is_enabled();
                track.set_enabled(enabled);
                enabled
            }
            None => false,
        };
        self.publish(&inner);
        let _ = self.events.send(SessionEvent::LocalVideoEnabled(enabled));
        enabled
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            MediaError::DeviceUnavailable("denied".into()).category(),
            ErrorCategory::DeviceUnavailable
        );
        assert_eq!(
            MediaError::ConnectFailed {
                kind: ConnectFailure::Network,
                message: "timeout".into()
            }
            .category(),
            ErrorCategory::TransportNetwork
        );
        assert_eq!(
            MediaError::ConnectFailed {
                kind: ConnectFailure::NotFound,
                message: "no such room".into()
            }
            .category(),
            ErrorCategory::TransportNotFound
        );
        assert_eq!(
            MediaError::Token(TokenError::Unavailable("down".into())).category(),
            ErrorCategory::TokenIssuanceFailed
        );
        assert_eq!(
            MediaError::SessionClosing.category(),
            ErrorCategory::TransportOther
        );
    }

    #[test]
    fn test_default_surfaces() {
        let surfaces = SurfaceBindings::default();
        assert_eq!(surfaces.local_video.as_str(), "local-video");
        assert_eq!(surfaces.remote_video.as_str(), "remote-video");
        assert_eq!(surfaces.remote_audio.as_str(), "remote-audio");
    }
}
