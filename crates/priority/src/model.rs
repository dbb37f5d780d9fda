//! Entity records of the process → bundle → account hierarchy.
//!
//! Records reference each other by key only. The engine owns one table per
//! entity type, so removing an entity never leaves a dangling reference in
//! another table or in the ordered index.

use std::collections::BTreeSet;

use reclaimd_core::priority::FOREGROUND;
use reclaimd_core::{AccountId, BundleState, Pid, ReclaimReason, Uid};

/// Keep-alive signals currently asserted for a process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessFlags {
    pub background_task: bool,
    pub suspend_delay: bool,
    pub short_event: bool,
    pub data_ability: bool,
    pub foreground: bool,
    pub visible: bool,
    pub dist_device_connected: bool,
    pub extension: Option<ExtensionBinding>,
}

impl ProcessFlags {
    /// Any of the signals that hold a process at PERCEIVED.
    pub fn perceived(&self) -> bool {
        self.background_task || self.short_event || self.data_ability
    }
}

/// An extension process bound by another bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionBinding {
    pub caller_uid: Option<Uid>,
    /// Level the extension is held at while bound.
    pub floor: i32,
}

/// A boost waiting for its grace timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingGrace {
    pub token: u64,
    pub reason: ReclaimReason,
}

#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    pub uid: Uid,
    /// Lifecycle level before the account shift.
    pub level: i32,
    /// `level` with the owning account's shift applied.
    pub priority: i32,
    pub flags: ProcessFlags,
    pub grace: Option<PendingGrace>,
}

impl Process {
    pub fn new(pid: Pid, uid: Uid, level: i32) -> Self {
        Self {
            pid,
            uid,
            level,
            priority: level,
            flags: ProcessFlags {
                foreground: level == FOREGROUND,
                ..ProcessFlags::default()
            },
            grace: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub uid: Uid,
    pub name: String,
    pub account_id: AccountId,
    /// Minimum of the member processes' priorities.
    pub priority: i32,
    pub state: BundleState,
    pub pinned: bool,
    pub pids: BTreeSet<Pid>,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub is_current_foreground_account: bool,
    pub is_previous_account: bool,
    pub priority_shift: i32,
    pub uids: BTreeSet<Uid>,
}

impl Account {
    /// Offset added to every process level in this account.
    pub fn offset(&self) -> i32 {
        if self.is_current_foreground_account {
            -self.priority_shift
        } else {
            0
        }
    }
}
