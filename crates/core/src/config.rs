//! ConfigProvider trait: tunables the engine and killer read at construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One step of the buffer → kill threshold table.
///
/// While free memory is below `buffer_kb`, bundles with priority
/// `>= min_priority` may be killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillTier {
    pub buffer_kb: u64,
    pub min_priority: i32,
}

impl KillTier {
    pub const fn new(buffer_kb: u64, min_priority: i32) -> Self {
        Self { buffer_kb, min_priority }
    }
}

pub trait ConfigProvider: Send + Sync {
    /// Bundle names pinned at system priority.
    fn system_pinned_bundle_names(&self) -> BTreeSet<String>;

    /// Kill tiers ordered by ascending `buffer_kb`.
    fn kill_tier_table(&self) -> Vec<KillTier>;

    /// Amount subtracted from every bundle of the foreground account.
    fn account_priority_shift(&self) -> i32;
}
