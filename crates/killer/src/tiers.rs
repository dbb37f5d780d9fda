//! Buffer → kill threshold mapping.

use reclaimd_core::{ConfigProvider, KillTier};

#[derive(Debug, Clone)]
pub struct KillTierTable {
    tiers: Vec<KillTier>,
}

impl KillTierTable {
    /// `tiers` must be ascending by `buffer_kb`; config validation enforces it.
    pub fn new(tiers: Vec<KillTier>) -> Self {
        Self { tiers }
    }

    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        Self::new(provider.kill_tier_table())
    }

    /// Lowest priority that may be killed at `buffer_kb` free, or `None` if
    /// memory is healthy. The first tier strictly above the buffer wins.
    pub fn min_priority_for(&self, buffer_kb: u64) -> Option<i32> {
        self.tiers
            .iter()
            .find(|tier| buffer_kb < tier.buffer_kb)
            .map(|tier| tier.min_priority)
    }

    /// Free memory at or above which no kill is needed.
    pub fn top_buffer_kb(&self) -> u64 {
        self.tiers.last().map_or(0, |tier| tier.buffer_kb)
    }

    pub fn tiers(&self) -> &[KillTier] {
        &self.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024;

    fn table() -> KillTierTable {
        KillTierTable::from_provider(&reclaimd_config::AppConfig::default())
    }

    #[test]
    fn ninety_megabytes_allows_foreground_kills() {
        assert_eq!(table().min_priority_for(90 * MB), Some(0));
    }

    #[test]
    fn tier_boundary_belongs_to_next_tier() {
        let table = table();
        assert_eq!(table.min_priority_for(100 * MB - 1), Some(0));
        assert_eq!(table.min_priority_for(100 * MB), Some(100));
        assert_eq!(table.min_priority_for(450 * MB), Some(400));
    }

    #[test]
    fn healthy_buffer_needs_no_kill() {
        let table = table();
        assert_eq!(table.min_priority_for(500 * MB), None);
        assert_eq!(table.min_priority_for(u64::MAX), None);
        assert_eq!(table.top_buffer_kb(), 500 * MB);
    }

    #[test]
    fn empty_table_never_kills() {
        let table = KillTierTable::new(Vec::new());
        assert_eq!(table.min_priority_for(0), None);
        assert_eq!(table.top_buffer_kb(), 0);
    }
}
