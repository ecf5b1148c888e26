//! Call signaling and live media orchestration for one-to-one telecare
//! video calls.
//!
//! A caregiver places a call; the patient's device surfaces a single
//! incoming-call notification, rings for a bounded time, and on accept both
//! sides meet in a deterministically named media room. Signaling is a small
//! replicated record (`ringing` plus three terminal statuses) carried over
//! any realtime document store; media is any transport that can capture
//! tracks and join rooms. Both seams are traits, so the crate runs
//! end-to-end in tests with the bundled in-memory channel.
//!
//! ## Quick start
//!
//! ```no_run
//! use carecall::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let channel = Arc::new(InMemoryChannel::new());
//! let signaling = CallSignaling::new(
//!     CallStore::new(Arc::clone(&channel)),
//!     ParticipantId::caregiver(),
//!     CallConfig::default(),
//! );
//! signaling.start();
//!
//! let record = signaling
//!     .initiate(&ParticipantId::new("patient-7"), "Dr. Lee")
//!     .await?;
//! println!("ringing in room {}", record.room_name);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]

pub mod call;
pub mod channel;
pub mod controller;
pub mod identity;
pub mod media;
pub mod memory;
pub mod render;
pub mod store;
pub mod token;
pub mod types;

pub use call::{AnswerOutcome, CallConfig, CallError, CallSignaling};
pub use channel::SignalingChannel;
pub use controller::{CallController, CallControllerBuilder, CallUiState, ControllerConfig};
pub use identity::ParticipantId;
pub use media::{MediaTransport, ParticipantSession};
pub use store::CallStore;
pub use token::TokenProvider;
pub use types::{CallId, CallRecord, CallStatus, ConnectionState, ErrorCategory, RoomName};

/// Commonly used types, in one import
pub mod prelude {
    pub use crate::call::{AnswerOutcome, CallConfig, CallError, CallSignaling};
    pub use crate::channel::{
        CollectionPath, CollectionSnapshot, Document, DocumentPath, SignalingChannel,
    };
    pub use crate::controller::{
        CallController, CallControllerBuilder, CallUiState, ControllerConfig, ControllerError,
    };
    pub use crate::identity::{ParticipantId, CAREGIVER_ID};
    pub use crate::media::{
        ConnectFailure, MediaError, MediaTrack, MediaTransport, ParticipantSession, RoomEvent,
        RoomHandle, SessionEvent, SessionSnapshot, SurfaceBindings,
    };
    pub use crate::memory::InMemoryChannel;
    pub use crate::render::{SurfaceId, TrackRenderer};
    pub use crate::store::{CallStore, SettleOutcome, StoreError};
    pub use crate::token::{AccessToken, StaticTokenProvider, TokenError, TokenProvider};
    pub use crate::types::{
        CallEvent, CallId, CallRecord, CallStatus, ConnectionState, ErrorCategory, MediaKind,
        RoomName, TrackOrigin, VideoProfile,
    };
}
