//! Pending mutation queue
//!
//! Every local write appends a [`Mutation`] here before anything talks to the
//! remote store. The queue is a single JSON-serialized array held under a
//! fixed key in its own sled database, so pending work survives restarts and
//! keeps its insertion order. A failed drain leaves the queue untouched; a
//! successful one removes only the prefix it replayed, so entries enqueued
//! mid-drain stay pending.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sled::Db;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::records::Collection;

/// Fixed key holding the serialized queue
const QUEUE_KEY: &[u8] = b"pending_mutations";

/// Kind of queued work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// A single queued intent to create, update or delete one remote record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub kind: MutationKind,
    pub collection: Collection,
    /// Always a plain string id, never a nested object
    pub entity_id: String,
    /// Full record for create, partial field set for update, absent for delete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
}

impl Mutation {
    pub fn create(
        collection: Collection,
        entity_id: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            kind: MutationKind::Create,
            collection,
            entity_id: entity_id.into(),
            fields: Some(fields),
        }
    }

    pub fn update(
        collection: Collection,
        entity_id: impl Into<String>,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            kind: MutationKind::Update,
            collection,
            entity_id: entity_id.into(),
            fields: Some(fields),
        }
    }

    pub fn delete(collection: Collection, entity_id: impl Into<String>) -> Self {
        Self {
            kind: MutationKind::Delete,
            collection,
            entity_id: entity_id.into(),
            fields: None,
        }
    }

    /// Validate shape before the mutation is accepted into the queue.
    ///
    /// The id check lives here, at the boundary, so a malformed id is rejected
    /// up front instead of poisoning the queue and halting every later drain.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.entity_id.trim().is_empty() {
            return Err(StoreError::InvalidIdentifier(format!(
                "{:?} mutation for {} has an empty id",
                self.kind, self.collection
            )));
        }

        match self.kind {
            MutationKind::Create | MutationKind::Update => {
                if self.fields.is_none() {
                    return Err(StoreError::InvalidMutation(format!(
                        "{:?} mutation for {}/{} carries no fields",
                        self.kind, self.collection, self.entity_id
                    )));
                }
            }
            MutationKind::Delete => {}
        }
        Ok(())
    }
}

/// Durable FIFO queue of pending mutations.
///
/// Every operation that rewrites the blob is a load-modify-persist sequence;
/// the internal lock serializes them so two concurrent enqueues (the engine
/// is `Arc`-shared) cannot overwrite each other's append. No lock is ever
/// held across an await: all sled calls are synchronous.
pub struct MutationQueue {
    db: Db,
    lock: Mutex<()>,
}

impl MutationQueue {
    /// Open or create the queue database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened sync queue database");
        Ok(Self {
            db,
            lock: Mutex::new(()),
        })
    }

    /// Validate and append a mutation to the tail of the queue.
    ///
    /// The local record write has already happened by the time this is
    /// called, so a persistence fault here means the write will never reach
    /// the remote store. Callers must treat that error as loud.
    pub fn enqueue(&self, mutation: Mutation) -> Result<(), StoreError> {
        mutation.validate()?;

        let _guard = self.lock.lock().expect("queue lock poisoned");
        let mut queue = self.read()?;
        queue.push(mutation);
        self.persist(&queue)?;

        debug!(pending = queue.len(), "Mutation enqueued");
        Ok(())
    }

    /// Full persisted sequence in original order; empty if none exists
    pub(crate) fn load(&self) -> Result<Vec<Mutation>, StoreError> {
        let _guard = self.lock.lock().expect("queue lock poisoned");
        self.read()
    }

    /// Atomically overwrite the persisted sequence
    pub(crate) fn replace(&self, queue: &[Mutation]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().expect("queue lock poisoned");
        self.persist(queue)
    }

    /// Drop the first `count` entries, keeping anything enqueued after the
    /// caller took its snapshot. Returns how many entries remain.
    pub(crate) fn remove_prefix(&self, count: usize) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().expect("queue lock poisoned");
        let queue = self.read()?;
        let rest = &queue[count.min(queue.len())..];
        self.persist(rest)?;
        Ok(rest.len())
    }

    /// Number of pending mutations
    pub fn pending(&self) -> Result<usize, StoreError> {
        Ok(self.load()?.len())
    }

    fn read(&self) -> Result<Vec<Mutation>, StoreError> {
        match self.db.get(QUEUE_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self, queue: &[Mutation]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(queue)?;
        self.db.insert(QUEUE_KEY, bytes)?;
        self.db.flush()?;
        Ok(())
    }
}
