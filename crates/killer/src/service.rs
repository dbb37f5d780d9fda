//! The killer task queue.
//!
//! Passes run one at a time on a dedicated task. Pressure signals are
//! coalesced: while a signalled pass is still queued, further signals are
//! dropped instead of piling up behind it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reclaimd_core::ServiceError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::killer::{LowMemoryKiller, PassReport};

const QUEUE: &str = "killer";

enum Request {
    Signal,
    Pass { reply: oneshot::Sender<PassReport> },
}

/// Handle to the killer task.
#[derive(Clone)]
pub struct KillerService {
    requests: mpsc::Sender<Request>,
    signal_queued: Arc<AtomicBool>,
}

impl KillerService {
    pub fn spawn(killer: LowMemoryKiller, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let signal_queued = Arc::new(AtomicBool::new(false));
        let queued = signal_queued.clone();

        let handle = tokio::spawn(async move {
            info!("Low-memory killer started");
            while let Some(request) = rx.recv().await {
                match request {
                    Request::Signal => {
                        queued.store(false, Ordering::SeqCst);
                        killer.pressure_pass().await;
                    }
                    Request::Pass { reply } => {
                        let _ = reply.send(killer.pressure_pass().await);
                    }
                }
            }
            info!("Low-memory killer stopped");
        });

        (
            Self {
                requests: tx,
                signal_queued,
            },
            handle,
        )
    }

    /// Request a pass without waiting for it.
    pub fn on_pressure_signal(&self) {
        if self.signal_queued.swap(true, Ordering::SeqCst) {
            debug!("Pressure pass already queued");
            return;
        }
        if self.requests.try_send(Request::Signal).is_err() {
            self.signal_queued.store(false, Ordering::SeqCst);
            debug!("Killer queue full or closed, dropping pressure signal");
        }
    }

    /// Run a pass and return the KB it freed.
    pub async fn on_pressure(&self) -> Result<u64, ServiceError> {
        Ok(self.pressure_pass().await?.freed_kb)
    }

    /// Run a pass and return its full report.
    pub async fn pressure_pass(&self) -> Result<PassReport, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Pass { reply })
            .await
            .map_err(|_| ServiceError::QueueClosed(QUEUE))?;
        response.await.map_err(|_| ServiceError::ReplyDropped(QUEUE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::KillTierTable;
    use reclaimd_core::{
        BundleState, EventBus, KernelInterface, PrioritySource, ReclaimEvent, ReclaimReason,
    };
    use reclaimd_kernel::InMemoryKernel;
    use reclaimd_priority::{EngineSettings, PriorityService, ReclaimPriorityEngine};

    async fn setup(buffer_kb: u64) -> (KillerService, PriorityService, Arc<InMemoryKernel>) {
        let kernel = Arc::new(InMemoryKernel::new(buffer_kb));
        let bus = Arc::new(EventBus::default());
        let (priority, _) = PriorityService::spawn(
            ReclaimPriorityEngine::new(EngineSettings::default()),
            kernel.clone(),
            bus.clone(),
            16,
        );

        for (pid, uid) in [(1, 20010001), (2, 20010002)] {
            kernel.spawn(pid, 4096);
            let create = ReclaimEvent::new(pid, uid, format!("app.{uid}"), ReclaimReason::CreateProcess);
            priority.update_reclaim_priority(create).await.unwrap();
            let background = ReclaimEvent::new(pid, uid, "", ReclaimReason::Background);
            priority.update_reclaim_priority(background).await.unwrap();
        }

        let killer = LowMemoryKiller::new(
            Arc::new(priority.clone()),
            kernel.clone(),
            bus,
            KillTierTable::from_provider(&reclaimd_config::AppConfig::default()),
        );
        let (service, _) = KillerService::spawn(killer, 4);
        (service, priority, kernel)
    }

    #[tokio::test]
    async fn pass_marks_killed_bundle_waiting() {
        let (killer, priority, kernel) = setup(450 * 1024).await;
        kernel.set_reclaim_on_kill(false);

        let report = killer.pressure_pass().await.unwrap();
        assert_eq!(report.killed.len(), 2);
        assert_eq!(report.freed_kb, 8192);

        // Killed bundles stay in the index until termination is reported.
        let snapshot = priority.bundle_priority_snapshot().await.unwrap();
        assert!(snapshot.iter().all(|b| b.state == BundleState::WaitingForKill));

        // Second pass finds nothing new to kill.
        assert_eq!(killer.on_pressure().await.unwrap(), 0);
        assert!(kernel.live_pids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refused_kills_leave_bundles_killable() {
        let (killer, priority, kernel) = setup(1024).await;
        kernel.deny_kill(1);
        kernel.deny_kill(2);

        let report = killer.pressure_pass().await.unwrap();
        assert!(report.killed.is_empty());

        priority.reconcile(kernel.live_pids().unwrap()).await.unwrap();
        let snapshot = priority.bundle_priority_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|b| b.state == BundleState::Normal));

        kernel.allow_kill(1);
        kernel.allow_kill(2);
        let report = killer.pressure_pass().await.unwrap();
        assert_eq!(report.killed.len(), 2);
        assert!(kernel.live_pids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn signals_coalesce_while_queued() {
        let (killer, _priority, kernel) = setup(600 * 1024).await;
        for _ in 0..10 {
            killer.on_pressure_signal();
        }
        // A reply-carrying pass queues behind whatever signal was accepted.
        assert_eq!(killer.on_pressure().await.unwrap(), 0);
        assert!(kernel.killed().is_empty());

        kernel.set_buffer_kb(1024);
        killer.on_pressure_signal();
        killer.on_pressure().await.unwrap();
        assert_eq!(kernel.killed().len(), 2);
    }
}
