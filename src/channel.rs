//! Signaling channel abstraction
//!
//! The signaling "protocol" is not a wire format: it is the Call record
//! itself, replicated through a document store that supports realtime
//! subscriptions. This module defines the narrow interface the core needs
//! from such a store. Delivery is at-least-once and carries no ordering
//! guarantee relative to the media transport's own events.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Path of a document collection, e.g. `users/patient-7/incoming_calls`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Build a collection path from pre-joined segments
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of a document inside this collection
    #[must_use]
    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    /// Get the inner path string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Path of a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    /// Collection the document lives in
    #[must_use]
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    /// Document identifier within its collection
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document together with its store-assigned identifier
#[derive(Debug, Clone)]
pub struct Document {
    /// Identifier assigned at creation
    pub id: String,
    /// Document body
    pub data: Value,
}

/// Full contents of one collection at one instant
pub type CollectionSnapshot = Vec<Document>;

/// Realtime document store used as the signaling channel
///
/// Implement this for your backing store. The core only needs per-user
/// scoped collections plus a global index collection, and a subscription
/// that re-delivers the whole matching record set on every change.
#[async_trait]
pub trait SignalingChannel: Send + Sync + 'static {
    /// Store error type
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a document, returning the assigned identifier
    async fn create(
        &self,
        collection: &CollectionPath,
        record: Value,
    ) -> Result<String, Self::Error>;

    /// Create or replace a document at a known path
    async fn upsert(&self, path: &DocumentPath, record: Value) -> Result<(), Self::Error>;

    /// Shallow-merge a partial record into an existing document
    async fn update(&self, path: &DocumentPath, patch: Value) -> Result<(), Self::Error>;

    /// Read a document, `None` if absent
    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>, Self::Error>;

    /// Subscribe to snapshots of a collection
    ///
    /// The current contents are delivered as the first snapshot; every
    /// subsequent write to the collection delivers a fresh one. Snapshots
    /// may be duplicated (at-least-once).
    fn subscribe(&self, collection: &CollectionPath) -> broadcast::Receiver<CollectionSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_display() {
        let calls = CollectionPath::new("users/patient-7/incoming_calls");
        assert_eq!(calls.as_str(), "users/patient-7/incoming_calls");

        let doc = calls.doc("abc123");
        assert_eq!(doc.to_string(), "users/patient-7/incoming_calls/abc123");
        assert_eq!(doc.id(), "abc123");
        assert_eq!(doc.collection(), &calls);
    }
}
