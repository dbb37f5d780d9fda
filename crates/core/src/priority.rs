//! Identifiers and the reclaim priority scale.
//!
//! Lower values are kept alive longer; higher values are killed first.
//! The scale lines up with the kernel's `oom_score_adj` range so a bundle
//! priority can be mirrored into procfs unchanged.

/// Kernel process id.
pub type Pid = i32;

/// Application uid. Encodes the owning OS account (see [`derive_account_id`]).
pub type Uid = i32;

/// OS user account (session) id.
pub type AccountId = i32;

/// Pinned system bundles. Never killed and never moved by lifecycle events.
pub const SYSTEM: i32 = -1000;
pub const FOREGROUND: i32 = 0;
pub const VISIBLE: i32 = 1;
pub const SUSPEND_DELAY: i32 = 100;
/// Background task, short event, or data ability in progress.
pub const PERCEIVED: i32 = 200;
pub const DIST_DEVICE: i32 = 260;
pub const BACKGROUND: i32 = 400;
pub const FROZEN: i32 = 600;
pub const SUSPEND: i32 = 800;
pub const EMPTY: i32 = 900;
pub const UNKNOWN: i32 = 1000;

pub const OOM_SCORE_ADJ_MIN: i32 = -1000;
pub const OOM_SCORE_ADJ_MAX: i32 = 1000;

/// Number of uids reserved per account.
pub const UIDS_PER_ACCOUNT: Uid = 200_000;

/// Resolve the account that owns `uid`.
pub fn derive_account_id(uid: Uid) -> AccountId {
    uid / UIDS_PER_ACCOUNT
}

/// Clamp a priority into the range accepted by `/proc/<pid>/oom_score_adj`.
pub fn to_oom_score_adj(priority: i32) -> i32 {
    priority.clamp(OOM_SCORE_ADJ_MIN, OOM_SCORE_ADJ_MAX)
}

/// Name of the nearest named level at or above `priority` in importance.
///
/// Used for human-readable listings; account shifts make most real values
/// fall between levels.
pub fn level_name(priority: i32) -> &'static str {
    match priority {
        p if p <= SYSTEM => "system",
        p if p <= FOREGROUND => "foreground",
        p if p <= VISIBLE => "visible",
        p if p <= SUSPEND_DELAY => "suspend_delay",
        p if p <= PERCEIVED => "perceived",
        p if p <= DIST_DEVICE => "dist_device",
        p if p <= BACKGROUND => "background",
        p if p <= FROZEN => "frozen",
        p if p <= SUSPEND => "suspend",
        p if p <= EMPTY => "empty",
        _ => "unknown",
    }
}
