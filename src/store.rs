//! Call record store
//!
//! Typed wrapper around a [`SignalingChannel`] that owns the Call entity's
//! CRUD operations and query shape. A call is written once under the
//! receiver's namespace (`users/{id}/incoming_calls`) and duplicated into a
//! global index (`video_calls/{call_id}`) so audit and cleanup never need to
//! know which user owns a record. Records are never deleted.

use crate::channel::{CollectionPath, SignalingChannel};
use crate::identity::ParticipantId;
use crate::types::{CallId, CallRecord, CallStatus, ErrorCategory};
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;

/// Global index collection, keyed by call id
const GLOBAL_INDEX: &str = "video_calls";

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Channel read or write failed; the caller may retry manually
    #[error("signaling service unavailable: {0}")]
    SignalingUnavailable(String),

    /// No record exists for the call
    #[error("call not found: {0}")]
    CallNotFound(CallId),

    /// A stored record could not be decoded
    #[error("malformed call record: {0}")]
    MalformedRecord(String),
}

impl StoreError {
    /// Machine-checkable category
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::SignalingUnavailable
    }
}

/// Result of a terminal-state write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The transition was written
    Applied,
    /// Another side settled the call first; its status is adopted silently
    AlreadySettled(CallStatus),
}

/// Typed Call CRUD over a signaling channel
pub struct CallStore<C: SignalingChannel> {
    channel: Arc<C>,
}

impl<C: SignalingChannel> Clone for CallStore<C> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<C: SignalingChannel> CallStore<C> {
    /// Create a store over the given channel
    #[must_use]
    pub fn new(channel: Arc<C>) -> Self {
        Self { channel }
    }

    fn incoming_collection(receiver: &ParticipantId) -> CollectionPath {
        CollectionPath::new(format!("users/{receiver}/incoming_calls"))
    }

    fn global_collection() -> CollectionPath {
        CollectionPath::new(GLOBAL_INDEX)
    }

    fn unavailable(err: impl std::fmt::Display) -> StoreError {
        StoreError::SignalingUnavailable(err.to_string())
    }

    /// Create a ringing call record, fanning out to the receiver
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SignalingUnavailable`] if either write fails;
    /// no automatic retry is attempted.
    #[tracing::instrument(skip(self, record), fields(caller = %record.caller_id, receiver = %record.receiver_id))]
    pub async fn initiate(&self, record: CallRecord) -> Result<CallId, StoreError> {
        let body = serde_json::to_value(&record)
            .map_err(|e| StoreError::MalformedRecord(e.to_string()))?;

        let collection = Self::incoming_collection(&record.receiver_id);
        let assigned = self
            .channel
            .create(&collection, body)
            .await
            .map_err(Self::unavailable)?;
        let call_id = CallId::new(assigned);

        // Duplicate into the global index with the id embedded
        let mut indexed = record;
        indexed.call_id = call_id.clone();
        let indexed_body = serde_json::to_value(&indexed)
            .map_err(|e| StoreError::MalformedRecord(e.to_string()))?;
        self.channel
            .upsert(
                &Self::global_collection().doc(call_id.as_str()),
                indexed_body,
            )
            .await
            .map_err(Self::unavailable)?;

        tracing::info!(call_id = %call_id, room = %indexed.room_name, "Call initiated");
        Ok(call_id)
    }

    /// Read a call record from the receiver's namespace
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SignalingUnavailable`] if the read fails.
    pub async fn fetch(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
    ) -> Result<Option<CallRecord>, StoreError> {
        let path = Self::incoming_collection(receiver).doc(call_id.as_str());
        let value = self.channel.get(&path).await.map_err(Self::unavailable)?;
        match value {
            Some(data) => {
                let mut record: CallRecord = serde_json::from_value(data)
                    .map_err(|e| StoreError::MalformedRecord(e.to_string()))?;
                if record.call_id.is_unassigned() {
                    record.call_id = call_id.clone();
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Transition `ringing → accepted`
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or the channel fails.
    pub async fn accept(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
    ) -> Result<SettleOutcome, StoreError> {
        self.settle(receiver, call_id, CallStatus::Accepted).await
    }

    /// Transition `ringing → rejected`
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or the channel fails.
    pub async fn reject(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
    ) -> Result<SettleOutcome, StoreError> {
        self.settle(receiver, call_id, CallStatus::Rejected).await
    }

    /// Transition `ringing → cancelled`
    ///
    /// Used both for an explicit caller-side cancel and for the receiver's
    /// ring-timeout cancel; the stored status is the same.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or the channel fails.
    pub async fn cancel(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
    ) -> Result<SettleOutcome, StoreError> {
        self.settle(receiver, call_id, CallStatus::Cancelled).await
    }

    /// Read-then-write settle with last-write-wins semantics
    ///
    /// If the record is already terminal the write is skipped and the
    /// observed status returned; a lost race is not an error.
    #[tracing::instrument(skip(self), fields(receiver = %receiver, call_id = %call_id, status = ?status))]
    async fn settle(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
        status: CallStatus,
    ) -> Result<SettleOutcome, StoreError> {
        let current = self
            .fetch(receiver, call_id)
            .await?
            .ok_or_else(|| StoreError::CallNotFound(call_id.clone()))?;

        if current.status.is_terminal() {
            tracing::debug!(
                observed = ?current.status,
                "Call already settled, adopting stored status"
            );
            return Ok(SettleOutcome::AlreadySettled(current.status));
        }

        let now = Utc::now();
        let timestamp_field = match status {
            CallStatus::Accepted => "acceptedAt",
            CallStatus::Rejected => "rejectedAt",
            CallStatus::Cancelled => "cancelledAt",
            CallStatus::Ringing => {
                return Err(StoreError::MalformedRecord(
                    "ringing is not a terminal status".to_string(),
                ))
            }
        };
        let patch = json!({ "status": status, timestamp_field: now });

        let path = Self::incoming_collection(receiver).doc(call_id.as_str());
        self.channel
            .update(&path, patch.clone())
            .await
            .map_err(Self::unavailable)?;

        // Audit copy is best effort; a missing or failed index write does
        // not undo the authoritative transition.
        let index_path = Self::global_collection().doc(call_id.as_str());
        if let Err(e) = self.channel.update(&index_path, patch).await {
            tracing::warn!(error = %e, "Global index update failed");
        }

        tracing::info!("Call settled");
        Ok(SettleOutcome::Applied)
    }

    /// Watch one call's status as it changes in the store
    ///
    /// `None` until the record is first observed. The caller side uses this
    /// to find out when the receiver answers.
    pub fn watch_status(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
    ) -> watch::Receiver<Option<CallStatus>> {
        let (tx, rx) = watch::channel(None);
        let feed = self.channel.subscribe(&Self::incoming_collection(receiver));
        let doc_id = call_id.as_str().to_string();

        tokio::spawn(async move {
            let mut stream = BroadcastStream::new(feed);
            while let Some(snapshot) = stream.next().await {
                let Ok(snapshot) = snapshot else {
                    continue;
                };
                let status = snapshot
                    .iter()
                    .find(|doc| doc.id == doc_id)
                    .and_then(|doc| doc.data.get("status"))
                    .and_then(|status| {
                        serde_json::from_value::<CallStatus>(status.clone()).ok()
                    });
                if let Some(status) = status {
                    tx.send_if_modified(|current| {
                        if *current == Some(status) {
                            false
                        } else {
                            *current = Some(status);
                            true
                        }
                    });
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        rx
    }

    /// Subscribe to the receiver's single visible incoming call
    ///
    /// Delivers `Some(record)` while at least one call addressed to
    /// `receiver` is ringing, `None` otherwise. When several are ringing at
    /// once (duplicate initiations, stale records) only the single
    /// most-recently-created one is surfaced.
    pub fn subscribe_incoming(
        &self,
        receiver: &ParticipantId,
    ) -> watch::Receiver<Option<CallRecord>> {
        let (tx, rx) = watch::channel(None);
        let collection = Self::incoming_collection(receiver);
        let feed = self.channel.subscribe(&collection);
        let receiver_id = receiver.clone();

        tokio::spawn(async move {
            let mut stream = BroadcastStream::new(feed);
            while let Some(snapshot) = stream.next().await {
                let Ok(snapshot) = snapshot else {
                    // Lagged behind; the next snapshot is complete anyway
                    continue;
                };

                let ringing = snapshot
                    .into_iter()
                    .filter_map(|doc| {
                        let parsed: Result<CallRecord, _> = serde_json::from_value(doc.data);
                        match parsed {
                            Ok(mut record) => {
                                if record.call_id.is_unassigned() {
                                    record.call_id = CallId::new(doc.id);
                                }
                                Some(record)
                            }
                            Err(e) => {
                                tracing::warn!(doc_id = %doc.id, error = %e, "Skipping malformed call record");
                                None
                            }
                        }
                    })
                    .filter(|record| record.status == CallStatus::Ringing)
                    .max_by_key(|record| (record.created_at, record.call_id.clone()));

                if let Some(record) = &ringing {
                    tracing::debug!(
                        receiver = %receiver_id,
                        call_id = %record.call_id,
                        "Ringing call visible"
                    );
                }

                let changed = tx.send_if_modified(|current: &mut Option<CallRecord>| {
                    let current_key = current.as_ref().map(|r| (r.call_id.clone(), r.status));
                    let next_key = ringing.as_ref().map(|r| (r.call_id.clone(), r.status));
                    if current_key == next_key {
                        false
                    } else {
                        *current = ringing.clone();
                        true
                    }
                });
                let _ = changed;

                if tx.is_closed() {
                    break;
                }
            }
            tracing::debug!(receiver = %receiver_id, "Incoming call subscription ended");
        });

        rx
    }
}
