//! Sync module - offline-first mutation replay
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Sync Core                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  MutationQueue      - durable FIFO of pending mutations (sled)  │
//! │  SyncEngine         - single-flight ordered replay with retry   │
//! │  ConnectivityTrigger- drains on startup and on reconnect        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A local write lands in the record store first, then its description is
//! enqueued. The engine drains the queue against the remote document store
//! whenever connectivity allows: strictly in order, stopping at the first
//! failure with the whole queue left intact, clearing it only after a fully
//! successful pass.

pub mod connectivity;
pub mod engine;
pub mod queue;

pub use connectivity::{ConnectivityTrigger, NetworkSource, NetworkState};
pub use engine::{DrainOutcome, SyncEngine, SyncOptions};
pub use queue::{Mutation, MutationKind, MutationQueue};

use serde_json::Value;
use tracing::{info, warn};

use crate::backend::RemoteBackend;
use crate::error::StoreError;
use crate::records::Collection;
use crate::store::{document_id, RecordStore};

/// Pull-refresh one collection from the remote store.
///
/// Fetches the full remote collection and replaces the local contents with
/// it. Remote documents without a usable string id are dropped rather than
/// imported. Returns the number of documents now in the local collection.
pub async fn refresh_collection(
    store: &RecordStore,
    backend: &dyn RemoteBackend,
    collection: Collection,
) -> Result<usize, StoreError> {
    let remote = backend.fetch_all(collection).await?;
    let total = remote.len();

    let mut docs = Vec::with_capacity(remote.len());
    for doc in remote {
        let mut fields = doc.fields;
        if document_id(&fields).is_none() {
            if doc.id.trim().is_empty() {
                warn!(collection = %collection, "Skipping remote document without usable id");
                continue;
            }
            fields.insert("id".into(), Value::String(doc.id));
        }
        docs.push(fields);
    }

    let inserted = store.replace_all(collection, &docs)?;
    info!(
        collection = %collection,
        inserted,
        skipped = total - inserted,
        "Refreshed collection from remote"
    );
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RemoteDocument;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    struct SnapshotBackend {
        documents: Vec<RemoteDocument>,
    }

    #[async_trait]
    impl RemoteBackend for SnapshotBackend {
        async fn put(
            &self,
            _collection: Collection,
            _id: &str,
            _fields: &Map<String, Value>,
            _merge: bool,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _collection: Collection, _id: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn fetch_all(
            &self,
            _collection: Collection,
        ) -> Result<Vec<RemoteDocument>, StoreError> {
            Ok(self.documents.clone())
        }
    }

    fn remote_doc(id: &str, brand: &str) -> RemoteDocument {
        let mut fields = Map::new();
        fields.insert("brand".into(), json!(brand));
        fields.insert("createdAt".into(), json!("2026-03-01T10:00:00Z"));
        RemoteDocument {
            id: id.to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn refresh_replaces_local_collection() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("records.sled")).unwrap();

        let mut stale = Map::new();
        stale.insert("id".into(), json!("stale"));
        stale.insert("brand".into(), json!("Old"));
        store.insert(Collection::Poles, &stale).unwrap();

        let backend = SnapshotBackend {
            documents: vec![remote_doc("p1", "UCS Spirit"), remote_doc("p2", "Pacer")],
        };

        let inserted = refresh_collection(&store, &backend, Collection::Poles)
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert!(store.get(Collection::Poles, "stale").unwrap().is_none());
        assert_eq!(
            store.get(Collection::Poles, "p1").unwrap().unwrap()["brand"],
            json!("UCS Spirit")
        );
    }

    #[tokio::test]
    async fn refresh_drops_documents_without_usable_id() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("records.sled")).unwrap();

        let backend = SnapshotBackend {
            documents: vec![remote_doc("p1", "UCS Spirit"), remote_doc("", "NoId")],
        };

        let inserted = refresh_collection(&store, &backend, Collection::Poles)
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.len(Collection::Poles), 1);
    }
}
