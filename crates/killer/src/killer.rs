//! The greedy kill loop behind `OnPressure`.
//!
//! One pass works from a single priority snapshot taken at its start. Each
//! iteration re-reads the live buffer, maps it to a minimum killable
//! priority, and kills the least important eligible bundle. The pass ends
//! when memory recovers, the kill cap is reached, nothing eligible remains,
//! or the buffer can no longer be read.
//!
//! A bundle whose kills were all refused is passed over for the rest of the
//! pass. It is neither marked nor counted against the cap, so a later pass
//! tries it again.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use reclaimd_core::{
    BundlePriorityInfo, BundleState, DomainEvent, EventBus, KernelError, KernelInterface,
    PrioritySource, Uid,
};
use tracing::{debug, info, warn};

use crate::tiers::KillTierTable;

/// Default per-pass kill cap.
pub const DEFAULT_MAX_KILLS_PER_PASS: usize = 3;

/// A bundle terminated during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KilledBundle {
    pub uid: Uid,
    pub name: String,
    pub priority: i32,
    pub freed_kb: u64,
}

/// Outcome of one `OnPressure` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub killed: Vec<KilledBundle>,
    pub freed_kb: u64,
}

pub struct LowMemoryKiller {
    source: Arc<dyn PrioritySource>,
    kernel: Arc<dyn KernelInterface>,
    bus: Arc<EventBus>,
    tiers: KillTierTable,
    max_kills_per_pass: usize,
}

impl LowMemoryKiller {
    pub fn new(
        source: Arc<dyn PrioritySource>,
        kernel: Arc<dyn KernelInterface>,
        bus: Arc<EventBus>,
        tiers: KillTierTable,
    ) -> Self {
        Self {
            source,
            kernel,
            bus,
            tiers,
            max_kills_per_pass: DEFAULT_MAX_KILLS_PER_PASS,
        }
    }

    pub fn with_max_kills_per_pass(mut self, max: usize) -> Self {
        self.max_kills_per_pass = max.max(1);
        self
    }

    pub fn tiers(&self) -> &KillTierTable {
        &self.tiers
    }

    /// Run one pass and return the KB freed.
    pub async fn on_pressure(&self) -> u64 {
        self.pressure_pass().await.freed_kb
    }

    /// Run one pass and report every kill it made.
    pub async fn pressure_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        let snapshot = match self.source.bundle_priority_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Priority snapshot unavailable, skipping pass");
                return report;
            }
        };
        let mut tried: HashSet<Uid> = HashSet::new();

        while report.killed.len() < self.max_kills_per_pass {
            let buffer_kb = match self.kernel.current_buffer_kb() {
                Ok(kb) => kb,
                Err(e) => {
                    warn!(error = %e, freed_kb = report.freed_kb, "Buffer read failed, aborting pass");
                    break;
                }
            };

            let Some(min_priority) = self.tiers.min_priority_for(buffer_kb) else {
                debug!(buffer_kb, "Buffer above top tier, no kill needed");
                break;
            };

            let Some(victim) = select_victim(&snapshot, min_priority, &tried) else {
                info!(buffer_kb, min_priority, "No killable bundle left");
                break;
            };
            tried.insert(victim.uid);

            let outcome = self.kill_bundle(victim);
            if outcome.landed == 0 {
                warn!(
                    uid = victim.uid,
                    bundle = %victim.name,
                    pids = victim.pids.len(),
                    "Every kill refused, trying next bundle"
                );
                continue;
            }
            let freed_kb = outcome.freed_kb;

            match self.source.mark_waiting_for_kill(victim.uid).await {
                Ok(true) => {}
                Ok(false) => debug!(uid = victim.uid, "Bundle vanished before it was marked"),
                Err(e) => warn!(uid = victim.uid, error = %e, "Could not mark bundle as killed"),
            }

            info!(
                uid = victim.uid,
                bundle = %victim.name,
                priority = victim.priority,
                buffer_kb,
                min_priority,
                freed_kb,
                "Killed bundle"
            );
            self.bus.publish(DomainEvent::BundleKilled {
                uid: victim.uid,
                bundle_name: victim.name.clone(),
                priority: victim.priority,
                freed_kb,
                timestamp: Utc::now(),
            });

            report.freed_kb += freed_kb;
            report.killed.push(KilledBundle {
                uid: victim.uid,
                name: victim.name.clone(),
                priority: victim.priority,
                freed_kb,
            });
        }

        if !report.killed.is_empty() {
            info!(kills = report.killed.len(), freed_kb = report.freed_kb, "Pressure pass finished");
        }
        self.bus.publish(DomainEvent::PressurePass {
            kills: report.killed.len(),
            freed_kb: report.freed_kb,
            timestamp: Utc::now(),
        });
        report
    }

    /// SIGKILL every pid of the bundle. Failed kills free nothing.
    fn kill_bundle(&self, bundle: &BundlePriorityInfo) -> KillOutcome {
        let mut outcome = KillOutcome::default();
        for &pid in &bundle.pids {
            match self.kernel.kill_process(pid) {
                Ok(kb) => {
                    outcome.freed_kb += kb;
                    outcome.landed += 1;
                }
                Err(KernelError::NoSuchProcess(_)) => {
                    debug!(pid, uid = bundle.uid, "Process already gone");
                    outcome.landed += 1;
                }
                Err(e) => warn!(pid, uid = bundle.uid, error = %e, "Kill failed"),
            }
        }
        outcome
    }
}

/// Result of signalling one bundle.
#[derive(Debug, Default)]
struct KillOutcome {
    freed_kb: u64,
    /// Pids that are gone afterwards, whether killed now or already exited.
    landed: usize,
}

/// The least important eligible bundle at or above `min_priority`.
fn select_victim<'a>(
    snapshot: &'a [BundlePriorityInfo],
    min_priority: i32,
    tried: &HashSet<Uid>,
) -> Option<&'a BundlePriorityInfo> {
    snapshot
        .iter()
        .rev()
        .take_while(|bundle| bundle.priority >= min_priority)
        .find(|bundle| {
            bundle.state != BundleState::WaitingForKill
                && !bundle.pinned
                && !tried.contains(&bundle.uid)
        })
}
