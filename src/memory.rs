//! In-process signaling channel
//!
//! A [`SignalingChannel`] backed by process memory. Used by the integration
//! tests and by embedders that do not need a durable store. Writes can be
//! made to fail on demand so unavailable-channel paths are testable.

use crate::channel::{CollectionPath, CollectionSnapshot, Document, DocumentPath, SignalingChannel};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// In-memory channel errors
#[derive(Error, Debug)]
pub enum MemoryChannelError {
    /// Injected or simulated unavailability
    #[error("signaling channel unavailable")]
    Unavailable,

    /// Update target does not exist
    #[error("document not found: {0}")]
    NotFound(String),
}

/// Feed capacity per collection; slow subscribers miss intermediate
/// snapshots but always receive a later, complete one.
const FEED_CAPACITY: usize = 64;

/// In-process realtime document store
#[derive(Default)]
pub struct InMemoryChannel {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    feeds: Mutex<HashMap<String, broadcast::Sender<CollectionSnapshot>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryChannel {
    /// Create an empty channel
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`MemoryChannelError::Unavailable`]
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with [`MemoryChannelError::Unavailable`]
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), MemoryChannelError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MemoryChannelError::Unavailable);
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), MemoryChannelError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MemoryChannelError::Unavailable);
        }
        Ok(())
    }

    fn feed(&self, collection: &str) -> broadcast::Sender<CollectionSnapshot> {
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        feeds
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .clone()
    }

    fn publish(&self, collection: &str) {
        let snapshot = {
            let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            collections.get(collection).cloned().unwrap_or_default()
        };
        // No subscribers is fine
        let _ = self.feed(collection).send(snapshot);
    }

    fn merge(target: &mut Value, patch: &Value) {
        if let (Some(target_map), Some(patch_map)) = (target.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_map {
                target_map.insert(key.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl SignalingChannel for InMemoryChannel {
    type Error = MemoryChannelError;

    async fn create(
        &self,
        collection: &CollectionPath,
        record: Value,
    ) -> Result<String, Self::Error> {
        self.check_write()?;
        let id = Uuid::new_v4().to_string();
        {
            let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            collections
                .entry(collection.as_str().to_string())
                .or_default()
                .push(Document {
                    id: id.clone(),
                    data: record,
                });
        }
        tracing::debug!(collection = %collection, doc_id = %id, "Document created");
        self.publish(collection.as_str());
        Ok(id)
    }

    async fn upsert(&self, path: &DocumentPath, record: Value) -> Result<(), Self::Error> {
        self.check_write()?;
        {
            let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            let docs = collections
                .entry(path.collection().as_str().to_string())
                .or_default();
            match docs.iter_mut().find(|d| d.id == path.id()) {
                Some(doc) => doc.data = record,
                None => docs.push(Document {
                    id: path.id().to_string(),
                    data: record,
                }),
            }
        }
        tracing::debug!(path = %path, "Document upserted");
        self.publish(path.collection().as_str());
        Ok(())
    }

    async fn update(&self, path: &DocumentPath, patch: Value) -> Result<(), Self::Error> {
        self.check_write()?;
        {
            let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
            let doc = collections
                .get_mut(path.collection().as_str())
                .and_then(|docs| docs.iter_mut().find(|d| d.id == path.id()))
                .ok_or_else(|| MemoryChannelError::NotFound(path.to_string()))?;
            Self::merge(&mut doc.data, &patch);
        }
        tracing::debug!(path = %path, "Document updated");
        self.publish(path.collection().as_str());
        Ok(())
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>, Self::Error> {
        self.check_read()?;
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(path.collection().as_str())
            .and_then(|docs| docs.iter().find(|d| d.id == path.id()))
            .map(|d| d.data.clone()))
    }

    fn subscribe(&self, collection: &CollectionPath) -> broadcast::Receiver<CollectionSnapshot> {
        let receiver = self.feed(collection.as_str()).subscribe();
        // Re-deliver the current contents so late subscribers start from a
        // complete snapshot; earlier subscribers just see a duplicate.
        self.publish(collection.as_str());
        receiver
    }
}
