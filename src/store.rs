//! Local record store
//!
//! Durable keyed storage for the four record collections, backed by sled.
//! Each collection lives in its own tree; documents are JSON objects keyed by
//! their string id. Writes land here synchronously before anything is queued
//! for the remote store, so a record is never pending sync without being
//! locally durable first.

use serde_json::{Map, Value};
use sled::Db;
use std::path::Path;
use tracing::info;

use crate::error::StoreError;
use crate::records::Collection;

/// Local record database
pub struct RecordStore {
    db: Db,
    athletes: sled::Tree,
    poles: sled::Tree,
    meets: sled::Tree,
    attempts: sled::Tree,
}

impl RecordStore {
    /// Open or create the record database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        let athletes = db.open_tree(Collection::Athletes.as_str())?;
        let poles = db.open_tree(Collection::Poles.as_str())?;
        let meets = db.open_tree(Collection::Meets.as_str())?;
        let attempts = db.open_tree(Collection::Attempts.as_str())?;

        info!(path = %path.as_ref().display(), "Opened record database");
        Ok(Self {
            db,
            athletes,
            poles,
            meets,
            attempts,
        })
    }

    fn tree(&self, collection: Collection) -> &sled::Tree {
        match collection {
            Collection::Athletes => &self.athletes,
            Collection::Poles => &self.poles,
            Collection::Meets => &self.meets,
            Collection::Attempts => &self.attempts,
        }
    }

    /// Insert a full document. The document must carry a non-empty string `id`.
    pub fn insert(
        &self,
        collection: Collection,
        fields: &Map<String, Value>,
    ) -> Result<String, StoreError> {
        let id = document_id(fields).ok_or_else(|| {
            StoreError::InvalidIdentifier(format!(
                "document for {collection} has no usable string id"
            ))
        })?;

        let bytes = serde_json::to_vec(fields)?;
        self.tree(collection).insert(id.as_bytes(), bytes)?;
        Ok(id)
    }

    /// Get a document by id
    pub fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        match self.tree(collection).get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Merge partial fields into an existing document and return the full
    /// updated document. Fields not named in `partial` are left untouched.
    pub fn update(
        &self,
        collection: Collection,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let mut doc = self
            .get(collection, id)?
            .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))?;

        for (key, value) in partial {
            doc.insert(key.clone(), value.clone());
        }

        let bytes = serde_json::to_vec(&doc)?;
        self.tree(collection).insert(id.as_bytes(), bytes)?;
        Ok(doc)
    }

    /// Delete a document. Returns whether it existed.
    pub fn remove(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        Ok(self.tree(collection).remove(id.as_bytes())?.is_some())
    }

    /// All documents in a collection, newest first by `createdAt`
    pub fn all(&self, collection: Collection) -> Result<Vec<Map<String, Value>>, StoreError> {
        let mut docs = Vec::new();
        for item in self.tree(collection).iter() {
            let (_, bytes) = item?;
            docs.push(serde_json::from_slice::<Map<String, Value>>(&bytes)?);
        }

        // RFC 3339 timestamps sort correctly as strings
        docs.sort_by(|a, b| {
            let a_ts = a.get("createdAt").and_then(Value::as_str).unwrap_or("");
            let b_ts = b.get("createdAt").and_then(Value::as_str).unwrap_or("");
            b_ts.cmp(a_ts)
        });
        Ok(docs)
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: Collection) -> usize {
        self.tree(collection).len()
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.tree(collection).is_empty()
    }

    /// Replace the entire contents of a collection with the given documents
    /// in one atomic batch. Every document must carry a usable string id; an
    /// invalid document faults the whole swap before anything is written.
    pub fn replace_all(
        &self,
        collection: Collection,
        docs: &[Map<String, Value>],
    ) -> Result<usize, StoreError> {
        let tree = self.tree(collection);

        let mut batch = sled::Batch::default();
        for key in tree.iter().keys() {
            batch.remove(key?);
        }
        for doc in docs {
            let id = document_id(doc).ok_or_else(|| {
                StoreError::InvalidIdentifier(format!(
                    "document for {collection} has no usable string id"
                ))
            })?;
            batch.insert(id.as_bytes(), serde_json::to_vec(doc)?);
        }

        tree.apply_batch(batch)?;
        Ok(docs.len())
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Extract a usable string id from a document, if it has one
pub fn document_id(fields: &Map<String, Value>) -> Option<String> {
    match fields.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id.clone()),
        _ => None,
    }
}
