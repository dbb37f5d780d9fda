//! Read-only export of the engine's ordered index.
//!
//! The killer never touches live engine state. It asks a [`PrioritySource`]
//! for an immutable copy at the start of each pressure pass and reports its
//! kills back through the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::priority::{AccountId, Pid, Uid};

/// Kill bookkeeping state of a bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    #[default]
    Normal,
    /// Kill issued, termination not yet observed.
    WaitingForKill,
}

/// One row of the priority snapshot, in index order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePriorityInfo {
    pub uid: Uid,
    pub name: String,
    pub priority: i32,
    pub account_id: AccountId,
    pub state: BundleState,
    pub pinned: bool,
    /// Live pids of the bundle, ascending.
    pub pids: Vec<Pid>,
}

/// Where the killer gets its view of the world.
#[async_trait]
pub trait PrioritySource: Send + Sync {
    /// All live bundles ordered by `(priority asc, uid asc)`.
    async fn bundle_priority_snapshot(&self) -> Result<Vec<BundlePriorityInfo>, ServiceError>;

    /// Flag a bundle as killed so later passes skip it.
    /// Returns `false` if the bundle is already gone.
    async fn mark_waiting_for_kill(&self, uid: Uid) -> Result<bool, ServiceError>;
}
