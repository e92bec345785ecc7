//! Connectivity trigger
//!
//! Reachability is an injected capability rather than a host API dependency,
//! so hosts wire in whatever their platform reports and tests drive a
//! deterministic fake. The trigger kicks the sync engine once at startup and
//! again on every offline to online transition.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sync::engine::SyncEngine;

/// Network reachability signal consumed by the sync engine
pub trait NetworkSource: Send + Sync {
    /// Current reachability
    fn is_online(&self) -> bool;

    /// Subscribe to reachability changes
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Concrete network state a host flips from its platform's reachability events
pub struct NetworkState {
    tx: watch::Sender<bool>,
}

impl NetworkState {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Report a reachability change. Setting the same value twice is a no-op
    /// for subscribers.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl NetworkSource for NetworkState {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Watches the network signal and drains the sync engine on reconnect.
///
/// Holds a single subscription task; calling [`start`](Self::start) again
/// while the task is alive is a no-op, so installing the trigger twice cannot
/// double-drain.
pub struct ConnectivityTrigger {
    engine: Arc<SyncEngine>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityTrigger {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            handle: Mutex::new(None),
        }
    }

    /// Install the trigger. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock().expect("trigger handle lock poisoned");
        if handle.is_some() {
            debug!("Connectivity trigger already installed");
            return false;
        }

        let engine = Arc::clone(&self.engine);
        *handle = Some(tokio::spawn(async move {
            let mut rx = engine.network().subscribe();
            let mut was_online = *rx.borrow();

            // Attempt on startup: anything queued from a previous run
            drain_quietly(&engine).await;

            while rx.changed().await.is_ok() {
                let online = *rx.borrow();
                if online && !was_online {
                    info!("Connection restored, draining sync queue");
                    drain_quietly(&engine).await;
                }
                was_online = online;
            }
        }));

        info!("Connectivity trigger installed");
        true
    }

    /// Remove the trigger and stop its subscription task
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().expect("trigger handle lock poisoned").take() {
            handle.abort();
        }
    }
}

impl Drop for ConnectivityTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain without surfacing errors: sync is background best-effort, a failure
/// here waits for the next trigger.
async fn drain_quietly(engine: &SyncEngine) {
    if let Err(e) = engine.drain().await {
        warn!(error = %e, "Background sync failed, queue left intact");
    }
}
