// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observer registry and best-effort event fan-out.
//!
//! Each observer owns a bounded outbound queue. `publish` snapshots the
//! registry, delivers with `try_send` outside the lock, then drops every
//! observer whose queue was closed. A full queue loses that one event but
//! keeps the observer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::Event;

/// Default per-observer queue depth.
pub const OBSERVER_QUEUE: usize = 256;

/// Opaque observer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

/// A registered observer: its id and the sending half of its queue.
#[derive(Debug, Clone)]
pub struct ObserverConnection {
    pub id: ObserverId,
    tx: mpsc::Sender<Arc<Event>>,
}

impl ObserverConnection {
    /// Send directly to this observer, bypassing the registry.
    pub fn try_send(
        &self,
        event: Arc<Event>,
    ) -> Result<(), mpsc::error::TrySendError<Arc<Event>>> {
        self.tx.try_send(event)
    }
}

/// Concurrency-safe registry of observers.
#[derive(Debug, Default)]
pub struct Hub {
    observers: Mutex<HashMap<ObserverId, ObserverConnection>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection handle and its receiving queue. The connection is
    /// not registered until passed to [`Hub::register`].
    pub fn connect(&self, depth: usize) -> (ObserverConnection, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        (ObserverConnection { id, tx }, rx)
    }

    pub fn register(&self, conn: ObserverConnection) {
        debug!(observer = %conn.id, "observer registered");
        self.observers.lock().insert(conn.id, conn);
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let removed = self.observers.lock().remove(&id).is_some();
        if removed {
            debug!(observer = %id, "observer unregistered");
        }
        removed
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.observers.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer registered at call time.
    ///
    /// Returns the number of observers that accepted it. Never fails:
    /// observers whose queue is closed are unregistered.
    pub fn publish(&self, event: Event) -> usize {
        let event = Arc::new(event);
        let snapshot: Vec<ObserverConnection> = self.observers.lock().values().cloned().collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for conn in &snapshot {
            match conn.try_send(Arc::clone(&event)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(observer = %conn.id, "observer queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(conn.id),
            }
        }

        if !dead.is_empty() {
            let mut observers = self.observers.lock();
            for id in dead {
                if observers.remove(&id).is_some() {
                    debug!(observer = %id, "pruned closed observer");
                }
            }
        }

        delivered
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
