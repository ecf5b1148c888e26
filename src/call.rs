//! Call signaling state machine
//!
//! [`CallSignaling`] drives one participant's view of the call lifecycle:
//! placing calls, surfacing the single visible incoming call, answering,
//! and the ring timeout that keeps unanswered calls from ringing forever.
//! The status model is deliberately small. `ringing` is the only
//! non-terminal status, every answer-side action races fairly with the
//! caller's cancel, and whoever writes a terminal status first wins.

use crate::channel::SignalingChannel;
use crate::identity::ParticipantId;
use crate::store::{CallStore, SettleOutcome, StoreError};
use crate::types::{CallEvent, CallId, CallRecord, CallStatus, ErrorCategory, RoomName};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Signaling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// How long an incoming call rings before it is cancelled, in seconds
    pub ring_timeout_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
        }
    }
}

impl CallConfig {
    /// Ring timeout as a [`Duration`]
    #[must_use]
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

/// Signaling errors
#[derive(Error, Debug)]
pub enum CallError {
    /// Store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An answer-side action ran with no incoming call visible
    #[error("no incoming call")]
    NoIncomingCall,
}

impl CallError {
    /// Machine-checkable category
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::NoIncomingCall => ErrorCategory::StaleCallRace,
        }
    }
}

/// What answering an incoming call produced
#[derive(Debug, Clone)]
pub enum AnswerOutcome {
    /// This side won; proceed to the media session
    Accepted(CallRecord),
    /// The caller (or a timeout) settled the call first; do not connect
    AlreadyEnded(CallStatus),
}

const EVENT_CAPACITY: usize = 64;

#[derive(Default)]
struct RingState {
    /// Call the timer was last armed for; a timer is never re-armed for the
    /// same call, even after it fires.
    armed_for: Option<CallId>,
    timer: Option<JoinHandle<()>>,
}

/// One participant's call signaling endpoint
pub struct CallSignaling<C: SignalingChannel> {
    store: CallStore<C>,
    self_id: ParticipantId,
    config: CallConfig,
    incoming: watch::Sender<Option<CallRecord>>,
    events: broadcast::Sender<CallEvent>,
    ring: Mutex<RingState>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<C: SignalingChannel> CallSignaling<C> {
    /// Create a signaling endpoint for one participant
    pub fn new(store: CallStore<C>, self_id: ParticipantId, config: CallConfig) -> Arc<Self> {
        let (incoming, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            store,
            self_id,
            config,
            incoming,
            events,
            ring: Mutex::new(RingState::default()),
            watcher: Mutex::new(None),
        })
    }

    /// Identity this endpoint signals as
    #[must_use]
    pub fn self_id(&self) -> &ParticipantId {
        &self.self_id
    }

    /// Watch the single visible incoming call
    ///
    /// `Some` while a ringing call addressed to this participant exists,
    /// `None` otherwise. Never more than one at a time; concurrent ringing
    /// calls collapse to the most recently created.
    #[must_use]
    pub fn incoming_call(&self) -> watch::Receiver<Option<CallRecord>> {
        self.incoming.subscribe()
    }

    /// Subscribe to call lifecycle events
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Start observing incoming calls
    ///
    /// Idempotent; the observer runs until [`shutdown`](Self::shutdown) or
    /// drop.
    pub fn start(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher.is_some() {
            return;
        }
        let mut feed = self.store.subscribe_incoming(&self.self_id);
        let signaling = Arc::clone(self);
        *watcher = Some(tokio::spawn(async move {
            loop {
                let current = feed.borrow_and_update().clone();
                signaling.observe(current);
                if feed.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        if let Some(task) = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.cancel_ring_timer();
    }

    fn observe(self: &Arc<Self>, current: Option<CallRecord>) {
        match current {
            Some(record) => {
                tracing::info!(
                    call_id = %record.call_id,
                    caller = %record.caller_id,
                    "Incoming call"
                );
                self.arm_ring_timer(record.call_id.clone());
                let _ = self.events.send(CallEvent::IncomingObserved {
                    call_id: record.call_id.clone(),
                });
                self.incoming.send_replace(Some(record));
            }
            None => {
                self.cancel_ring_timer();
                self.incoming.send_replace(None);
            }
        }
    }

    /// Arm the ring timeout, measured from when the call was first observed
    /// here. At most one timer exists; a new call replaces the old timer.
    fn arm_ring_timer(self: &Arc<Self>, call_id: CallId) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if ring.armed_for.as_ref() == Some(&call_id) {
            return;
        }
        if let Some(timer) = ring.timer.take() {
            timer.abort();
        }
        ring.armed_for = Some(call_id.clone());
        let timeout = self.config.ring_timeout();
        let signaling = Arc::clone(self);
        ring.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            signaling.on_ring_timeout(call_id).await;
        }));
    }

    fn cancel_ring_timer(&self) {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = ring.timer.take() {
            timer.abort();
        }
    }

    async fn on_ring_timeout(&self, call_id: CallId) {
        tracing::info!(call_id = %call_id, "Ring timeout, cancelling unanswered call");
        match self.store.cancel(&self.self_id, &call_id).await {
            Ok(SettleOutcome::Applied) => {
                let _ = self.events.send(CallEvent::TimedOut {
                    call_id: call_id.clone(),
                });
            }
            Ok(SettleOutcome::AlreadySettled(status)) => {
                tracing::debug!(?status, "Call settled before the timeout write");
            }
            // No retry; if the cancel write fails the record stays ringing
            // in the store but the local notification is still cleared
            Err(e) => tracing::warn!(error = %e, "Ring timeout cancel failed"),
        }
        self.clear_incoming_if(&call_id);
    }

    fn clear_incoming_if(&self, call_id: &CallId) {
        self.incoming.send_if_modified(|current| {
            if current
                .as_ref()
                .is_some_and(|record| &record.call_id == call_id)
            {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    /// Place a call to `receiver`
    ///
    /// Returns the created record with its assigned id; the room name is
    /// derived from the pair so both sides compute the same one.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Store`] if the signaling store is unavailable.
    #[tracing::instrument(skip(self, caller_name), fields(receiver = %receiver))]
    pub async fn initiate(
        &self,
        receiver: &ParticipantId,
        caller_name: &str,
    ) -> Result<CallRecord, CallError> {
        let room = RoomName::for_pair(&self.self_id, receiver);
        let record = CallRecord::ringing(
            self.self_id.clone(),
            receiver.clone(),
            caller_name,
            room,
        );
        let call_id = self.store.initiate(record.clone()).await?;
        let _ = self.events.send(CallEvent::Initiated {
            call_id: call_id.clone(),
            receiver: receiver.clone(),
        });
        Ok(CallRecord { call_id, ..record })
    }

    /// Watch a placed call's status
    #[must_use]
    pub fn watch_call(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
    ) -> watch::Receiver<Option<CallStatus>> {
        self.store.watch_status(receiver, call_id)
    }

    /// Accept the visible incoming call
    ///
    /// If the caller cancelled (or a timeout fired) just before the accept
    /// write landed, the stored status is adopted and reported as
    /// [`AnswerOutcome::AlreadyEnded`] rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NoIncomingCall`] if nothing is ringing, or
    /// [`CallError::Store`] if the store is unavailable.
    #[tracing::instrument(skip(self))]
    pub async fn accept(&self) -> Result<AnswerOutcome, CallError> {
        let record = self
            .incoming
            .borrow()
            .clone()
            .ok_or(CallError::NoIncomingCall)?;
        self.cancel_ring_timer();

        let outcome = self.store.accept(&self.self_id, &record.call_id).await?;
        self.clear_incoming_if(&record.call_id);

        match outcome {
            SettleOutcome::Applied => {
                let _ = self.events.send(CallEvent::Accepted {
                    call_id: record.call_id.clone(),
                });
                Ok(AnswerOutcome::Accepted(CallRecord {
                    status: CallStatus::Accepted,
                    ..record
                }))
            }
            SettleOutcome::AlreadySettled(status) => {
                tracing::info!(?status, "Call ended before it could be accepted");
                Ok(AnswerOutcome::AlreadyEnded(status))
            }
        }
    }

    /// Reject the visible incoming call
    ///
    /// Losing the race to a caller-side cancel is not an error; either way
    /// the call is over.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NoIncomingCall`] if nothing is ringing, or
    /// [`CallError::Store`] if the store is unavailable.
    #[tracing::instrument(skip(self))]
    pub async fn reject(&self) -> Result<(), CallError> {
        let record = self
            .incoming
            .borrow()
            .clone()
            .ok_or(CallError::NoIncomingCall)?;
        self.cancel_ring_timer();

        let outcome = self.store.reject(&self.self_id, &record.call_id).await?;
        self.clear_incoming_if(&record.call_id);

        if matches!(outcome, SettleOutcome::Applied) {
            let _ = self.events.send(CallEvent::Rejected {
                call_id: record.call_id,
            });
        }
        Ok(())
    }

    /// Cancel a call this side placed
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Store`] if the store is unavailable.
    #[tracing::instrument(skip(self), fields(receiver = %receiver, call_id = %call_id))]
    pub async fn cancel(
        &self,
        receiver: &ParticipantId,
        call_id: &CallId,
    ) -> Result<(), CallError> {
        match self.store.cancel(receiver, call_id).await? {
            SettleOutcome::Applied => {
                let _ = self.events.send(CallEvent::Cancelled {
                    call_id: call_id.clone(),
                });
            }
            SettleOutcome::AlreadySettled(status) => {
                tracing::debug!(?status, "Call already settled");
            }
        }
        Ok(())
    }
}

impl<C: SignalingChannel> Drop for CallSignaling<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
