//! Shared test doubles: a scriptable media transport, room, and tracks.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use carecall::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};

/// Install a test log subscriber once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

static NEXT_TRACK_ID: AtomicUsize = AtomicUsize::new(1);

fn next_track_id(prefix: &str) -> String {
    format!("{prefix}-{}", NEXT_TRACK_ID.fetch_add(1, Ordering::SeqCst))
}

/// A track that records what the session does to it.
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: MediaKind,
    origin: TrackOrigin,
    enabled: AtomicBool,
    attached_to: Mutex<Option<(SurfaceId, bool)>>,
    stopped: AtomicBool,
}

impl MockTrack {
    pub fn local(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: next_track_id("local"),
            kind,
            origin: TrackOrigin::Local,
            enabled: AtomicBool::new(true),
            attached_to: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn remote(kind: MediaKind, id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            origin: TrackOrigin::Remote,
            enabled: AtomicBool::new(true),
            attached_to: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn attached_surface(&self) -> Option<SurfaceId> {
        self.attached_to
            .lock()
            .unwrap()
            .as_ref()
            .map(|(surface, _)| surface.clone())
    }

    pub fn attached_muted(&self) -> Option<bool> {
        self.attached_to
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, muted)| *muted)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn origin(&self) -> TrackOrigin {
        self.origin
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn attach(&self, surface: &SurfaceId, muted: bool) -> Result<(), MediaError> {
        *self.attached_to.lock().unwrap() = Some((surface.clone(), muted));
        Ok(())
    }

    async fn detach(&self) {
        *self.attached_to.lock().unwrap() = None;
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }
}

/// A room the test drives by hand.
pub struct MockRoom {
    participants: Mutex<Vec<ParticipantId>>,
    tracks: Mutex<HashMap<String, Vec<Arc<dyn MediaTrack>>>>,
    events: broadcast::Sender<RoomEvent>,
    disconnects: AtomicUsize,
}

impl MockRoom {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            participants: Mutex::new(Vec::new()),
            tracks: Mutex::new(HashMap::new()),
            events,
            disconnects: AtomicUsize::new(0),
        })
    }

    /// Seed a participant as already present before anyone connects.
    pub fn seed_participant(&self, identity: &ParticipantId) {
        self.participants.lock().unwrap().push(identity.clone());
    }

    /// Seed an already-subscribed track for a seeded participant.
    pub fn seed_track(&self, identity: &ParticipantId, track: Arc<dyn MediaTrack>) {
        self.tracks
            .lock()
            .unwrap()
            .entry(identity.as_str().to_string())
            .or_default()
            .push(track);
    }

    /// A participant joins after connect.
    pub fn join(&self, identity: &ParticipantId) {
        self.participants.lock().unwrap().push(identity.clone());
        let _ = self.events.send(RoomEvent::ParticipantConnected {
            identity: identity.clone(),
        });
    }

    /// A remote track becomes subscribed.
    pub fn publish_track(&self, identity: &ParticipantId, track: Arc<dyn MediaTrack>) {
        self.tracks
            .lock()
            .unwrap()
            .entry(identity.as_str().to_string())
            .or_default()
            .push(Arc::clone(&track));
        let _ = self.events.send(RoomEvent::TrackSubscribed {
            identity: identity.clone(),
            track,
        });
    }

    /// A remote track goes away.
    pub fn unpublish_track(&self, identity: &ParticipantId, track_id: &str) {
        if let Some(tracks) = self.tracks.lock().unwrap().get_mut(identity.as_str()) {
            tracks.retain(|track| track.id() != track_id);
        }
        let _ = self.events.send(RoomEvent::TrackUnsubscribed {
            identity: identity.clone(),
            track_id: track_id.to_string(),
        });
    }

    /// A participant leaves.
    pub fn leave(&self, identity: &ParticipantId) {
        self.participants
            .lock()
            .unwrap()
            .retain(|p| p != identity);
        let _ = self.events.send(RoomEvent::ParticipantDisconnected {
            identity: identity.clone(),
        });
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomHandle for MockRoom {
    fn participants(&self) -> Vec<ParticipantId> {
        self.participants.lock().unwrap().clone()
    }

    fn subscribed_tracks(&self, identity: &ParticipantId) -> Vec<Arc<dyn MediaTrack>> {
        self.tracks
            .lock()
            .unwrap()
            .get(identity.as_str())
            .cloned()
            .unwrap_or_default()
    }

    fn events(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// A transport whose failures and timing the test scripts.
pub struct MockTransport {
    room: Arc<MockRoom>,
    fail_device: Mutex<Option<MediaKind>>,
    connect_failure: Mutex<Option<ConnectFailure>>,
    hold_connect: Mutex<Option<Arc<Notify>>>,
    acquired: Mutex<Vec<Arc<MockTrack>>>,
    published: Mutex<Vec<String>>,
    connected_rooms: Mutex<Vec<RoomName>>,
    connect_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            room: MockRoom::new(),
            fail_device: Mutex::new(None),
            connect_failure: Mutex::new(None),
            hold_connect: Mutex::new(None),
            acquired: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            connected_rooms: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
        })
    }

    pub fn room(&self) -> Arc<MockRoom> {
        Arc::clone(&self.room)
    }

    /// Make acquisition of this track kind fail.
    pub fn fail_device(&self, kind: MediaKind) {
        *self.fail_device.lock().unwrap() = Some(kind);
    }

    /// Make room connects fail with the given classification.
    pub fn fail_connect(&self, kind: ConnectFailure) {
        *self.connect_failure.lock().unwrap() = Some(kind);
    }

    /// Block the next room connect until the returned gate is notified.
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.hold_connect.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Tracks handed out so far.
    pub fn acquired_tracks(&self) -> Vec<Arc<MockTrack>> {
        self.acquired.lock().unwrap().clone()
    }

    /// Track ids published into the room at connect time.
    pub fn published_tracks(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Rooms joined so far.
    pub fn connected_rooms(&self) -> Vec<RoomName> {
        self.connected_rooms.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn acquire_local_track(
        &self,
        kind: MediaKind,
        _profile: &VideoProfile,
    ) -> Result<Arc<dyn MediaTrack>, MediaError> {
        if *self.fail_device.lock().unwrap() == Some(kind) {
            return Err(MediaError::DeviceUnavailable(format!(
                "{kind:?} capture denied"
            )));
        }
        let track = MockTrack::local(kind);
        self.acquired.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }

    async fn connect(
        &self,
        _token: &AccessToken,
        room: &RoomName,
        tracks: Vec<Arc<dyn MediaTrack>>,
    ) -> Result<Arc<dyn RoomHandle>, MediaError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected_rooms.lock().unwrap().push(room.clone());
        let gate = self.hold_connect.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(kind) = *self.connect_failure.lock().unwrap() {
            return Err(MediaError::ConnectFailed {
                kind,
                message: "scripted failure".to_string(),
            });
        }
        self.published
            .lock()
            .unwrap()
            .extend(tracks.iter().map(|track| track.id()));
        let room: Arc<dyn RoomHandle> = self.room();
        Ok(room)
    }
}
