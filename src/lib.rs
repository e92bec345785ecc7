//! VaultLog Storage - local-first persistence for pole vault record keeping
//!
//! Manages athletes, poles, meets and per-attempt jump data in a durable
//! local store, and opportunistically synchronizes them to a remote document
//! store.
//!
//! ## Architecture
//!
//! - **RecordStore**: sled-backed local collections, written synchronously
//! - **MutationQueue**: durable FIFO of pending remote mutations
//! - **SyncEngine**: single-flight ordered replay against the remote store
//! - **ConnectivityTrigger**: drains at startup and on reconnect
//! - **RemoteBackend**: narrow document-store contract (put/merge/delete by id)
//!
//! ## Why a Separate Queue?
//!
//! | Problem | Solution |
//! |---------|----------|
//! | Writes while offline | Local store first, queue the remote intent |
//! | Process restart mid-sync | Queue persisted in its own database |
//! | Partial drain failure | Whole queue kept, replay from the start |
//! | Replayed remote writes | Every operation idempotent by id |
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/vaultlog/
//! ├── records.sled/          # Record collections
//! ├── sync.sled/             # Pending mutation queue
//! └── config.toml            # Configuration
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod records;
pub mod store;
pub mod sync;

// Re-exports
pub use backend::{HttpBackend, HttpBackendConfig, RemoteBackend, RemoteDocument};
pub use config::Config;
pub use error::StoreError;
pub use records::{
    Athlete, Attempt, AttemptResult, Collection, Gender, GenderGrouping, Meet, Pole,
};
pub use store::RecordStore;
pub use sync::{
    refresh_collection, ConnectivityTrigger, DrainOutcome, Mutation, MutationKind, MutationQueue,
    NetworkSource, NetworkState, SyncEngine, SyncOptions,
};
