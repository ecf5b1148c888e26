//! Track-to-surface rendering
//!
//! UI surfaces (video elements, audio sinks) and media tracks become
//! available in either order: a surface can be registered before any track
//! exists, and a track can arrive before its surface mounts. The renderer
//! absorbs that ordering with one slot per surface holding at most one
//! attached track and at most one pending track.

use crate::media::{MediaError, MediaTrack};
use crate::types::{MediaKind, TrackOrigin};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identifier of a rendering surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    /// Wrap a surface identifier
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Default)]
struct Slot {
    registered: bool,
    attached: Option<Arc<dyn MediaTrack>>,
    pending: Option<Arc<dyn MediaTrack>>,
}

/// Binds tracks to surfaces, tolerating either arrival order
#[derive(Default)]
pub struct TrackRenderer {
    slots: Mutex<HashMap<SurfaceId, Slot>>,
}

impl TrackRenderer {
    /// Create a renderer with no surfaces
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Local video plays back without audio so the user does not hear
    /// their own microphone.
    fn muted(track: &Arc<dyn MediaTrack>) -> bool {
        track.origin() == TrackOrigin::Local && track.kind() == MediaKind::Video
    }

    /// Mark a surface as mounted and attach any track waiting for it
    pub async fn register_surface(&self, surface: &SurfaceId) -> Result<(), MediaError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(surface.clone()).or_default();
        slot.registered = true;
        if slot.attached.is_none() {
            if let Some(track) = slot.pending.take() {
                tracing::debug!(surface = %surface, track_id = %track.id(), "Attaching pending track");
                track.attach(surface, Self::muted(&track)).await?;
                slot.attached = Some(track);
            }
        }
        Ok(())
    }

    /// Mark a surface as unmounted, detaching whatever it shows
    pub async fn unregister_surface(&self, surface: &SurfaceId) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(surface) {
            slot.registered = false;
            slot.pending = None;
            if let Some(track) = slot.attached.take() {
                track.detach().await;
            }
        }
    }

    /// Route a track to a surface
    ///
    /// Attaches immediately if the surface is registered, otherwise parks
    /// the track until [`register_surface`](Self::register_surface) runs.
    /// Re-offering the already-attached track is a no-op; offering a
    /// different track detaches the previous one first.
    pub async fn offer_track(
        &self,
        surface: &SurfaceId,
        track: Arc<dyn MediaTrack>,
    ) -> Result<(), MediaError> {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(surface.clone()).or_default();

        if let Some(attached) = &slot.attached {
            if attached.id() == track.id() {
                return Ok(());
            }
        }

        if slot.registered {
            if let Some(previous) = slot.attached.take() {
                previous.detach().await;
            }
            tracing::debug!(surface = %surface, track_id = %track.id(), "Attaching track");
            track.attach(surface, Self::muted(&track)).await?;
            slot.attached = Some(track);
        } else {
            tracing::debug!(surface = %surface, track_id = %track.id(), "Parking track until surface registers");
            slot.pending = Some(track);
        }
        Ok(())
    }

    /// Drop a track from every slot it occupies
    pub async fn remove_track(&self, track_id: &str) {
        let mut slots = self.slots.lock().await;
        for slot in slots.values_mut() {
            if slot
                .pending
                .as_ref()
                .is_some_and(|track| track.id() == track_id)
            {
                slot.pending = None;
            }
            if slot
                .attached
                .as_ref()
                .is_some_and(|track| track.id() == track_id)
            {
                if let Some(track) = slot.attached.take() {
                    track.detach().await;
                }
            }
        }
    }

    /// Detach everything and drop all pending tracks
    ///
    /// Surface registrations survive, so a later call can reuse them.
    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.values_mut() {
            slot.pending = None;
            if let Some(track) = slot.attached.take() {
                track.detach().await;
            }
        }
    }

    /// Identifier of the track attached to a surface, if any
    pub async fn attached_track(&self, surface: &SurfaceId) -> Option<String> {
        let slots = self.slots.lock().await;
        slots
            .get(surface)
            .and_then(|slot| slot.attached.as_ref())
            .map(|track| track.id())
    }

    /// Number of surfaces currently showing a track
    pub async fn attached_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| slot.attached.is_some())
            .count()
    }
}
