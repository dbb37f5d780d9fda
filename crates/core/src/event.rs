//! Domain event system: decoupled notifications between components.
//!
//! The engine and killer publish what they did; the daemon (and tests)
//! subscribe without either side knowing about the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::priority::{AccountId, Uid};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A bundle entered the index or moved within it
    BundlePriorityChanged {
        uid: Uid,
        bundle_name: String,
        account_id: AccountId,
        old_priority: Option<i32>,
        new_priority: i32,
        timestamp: DateTime<Utc>,
    },

    /// The last process of a bundle went away
    BundleRemoved {
        uid: Uid,
        bundle_name: String,
        timestamp: DateTime<Utc>,
    },

    /// Hot switch of the foreground account
    AccountSwitched {
        previous: Option<AccountId>,
        current: AccountId,
        timestamp: DateTime<Utc>,
    },

    /// The killer terminated a bundle
    BundleKilled {
        uid: Uid,
        bundle_name: String,
        priority: i32,
        freed_kb: u64,
        timestamp: DateTime<Utc>,
    },

    /// One `OnPressure` invocation finished
    PressurePass {
        kills: usize,
        freed_kb: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
