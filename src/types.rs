//! Call types and data structures

use crate::identity::ParticipantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a call
///
/// Assigned by the signaling channel when the call record is created and
/// immutable afterwards. The global-index document for a call is keyed by
/// this identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Wrap an identifier assigned by the store
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the store has not assigned an identifier yet
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rendezvous room identifier for the media transport
///
/// Derived deterministically from the patient's identity so that both sides
/// of a call compute the same room regardless of who initiates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(String);

impl RoomName {
    /// Room for a given patient
    #[must_use]
    pub fn for_patient(patient: &ParticipantId) -> Self {
        Self(format!("call-{patient}"))
    }

    /// Room for an unordered pair of participants
    ///
    /// The patient is whichever side is not the caregiver. If neither side
    /// is the caregiver the lexicographically smaller identity is used, so
    /// the result stays symmetric for any pair.
    #[must_use]
    pub fn for_pair(a: &ParticipantId, b: &ParticipantId) -> Self {
        let patient = if a.is_caregiver() {
            b
        } else if b.is_caregiver() {
            a
        } else {
            a.min(b)
        };
        Self::for_patient(patient)
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call status stored in the signaling record
///
/// `Ringing` is the only non-terminal status. A ring timeout is written as
/// `Cancelled` by the receiver side; there is no stored "ended" status — a
/// side that loses a terminal-write race reads the winner's status and
/// reports the call as ended locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Waiting for the receiver to answer
    Ringing,
    /// Receiver accepted
    Accepted,
    /// Receiver rejected
    Rejected,
    /// Caller cancelled, or the ring timed out
    Cancelled,
}

impl CallStatus {
    /// Whether no further transition is permitted from this status
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Ringing)
    }
}

/// One signaling transaction between a caller and a receiver
///
/// Written once under the receiver's namespace and duplicated into a global
/// index keyed by `call_id`. Mutated exactly once, by whichever side reaches
/// a terminal status first; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// Call identifier (the document id; absent from the body until assigned)
    #[serde(default, skip_serializing_if = "CallId::is_unassigned")]
    pub call_id: CallId,
    /// Who initiated the call
    pub caller_id: ParticipantId,
    /// Who is being called
    pub receiver_id: ParticipantId,
    /// Caller-supplied display name, not validated
    pub caller_name: String,
    /// Media transport rendezvous room
    pub room_name: RoomName,
    /// Current status
    pub status: CallStatus,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the call was accepted, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the call was rejected, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    /// When the call was cancelled or timed out, if it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl CallRecord {
    /// Build a fresh ringing record for `initiate`
    #[must_use]
    pub fn ringing(
        caller_id: ParticipantId,
        receiver_id: ParticipantId,
        caller_name: impl Into<String>,
        room_name: RoomName,
    ) -> Self {
        Self {
            call_id: CallId::default(),
            caller_id,
            receiver_id,
            caller_name: caller_name.into(),
            room_name,
            status: CallStatus::Ringing,
            created_at: Utc::now(),
            accepted_at: None,
            rejected_at: None,
            cancelled_at: None,
        }
    }
}

/// Connection state of one side's live media session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session
    #[default]
    Idle,
    /// Acquiring devices or connecting to the transport room
    Connecting,
    /// Connected to the room
    Connected,
    /// Torn down
    Disconnected,
}

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Audio stream
    Audio,
    /// Video stream
    Video,
}

/// Where a track originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackOrigin {
    /// Captured from this side's devices
    Local,
    /// Subscribed from the remote participant
    Remote,
}

/// Bounded capture profile for local video
///
/// A tuning parameter for two-party calls, not a correctness contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoProfile {
    /// Capture width in pixels
    pub width: u32,
    /// Capture height in pixels
    pub height: u32,
    /// Capture frame rate
    pub frame_rate: u32,
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 24,
        }
    }
}

/// Machine-checkable category attached to every surfaced error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Signaling store read or write failed; manual retry only
    SignalingUnavailable,
    /// Token endpoint unreachable or returned an error
    TokenIssuanceFailed,
    /// Camera or microphone denied or absent
    DeviceUnavailable,
    /// Room connect failed: network error
    TransportNetwork,
    /// Room connect failed: room not found
    TransportNotFound,
    /// Room connect failed: anything else
    TransportOther,
    /// A terminal-state write lost a race; resolved silently
    StaleCallRace,
}

/// Call lifecycle event for observers
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// A call was initiated by this side
    Initiated {
        /// Call identifier
        call_id: CallId,
        /// Who is being called
        receiver: ParticipantId,
    },
    /// A ringing call became the visible incoming call
    IncomingObserved {
        /// Call identifier
        call_id: CallId,
    },
    /// A call reached `accepted`
    Accepted {
        /// Call identifier
        call_id: CallId,
    },
    /// A call reached `rejected`
    Rejected {
        /// Call identifier
        call_id: CallId,
    },
    /// A call reached `cancelled`
    Cancelled {
        /// Call identifier
        call_id: CallId,
    },
    /// The ring timeout fired and cancelled the call
    TimedOut {
        /// Call identifier
        call_id: CallId,
    },
}
