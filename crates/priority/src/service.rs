//! The engine task queue.
//!
//! One tokio task owns the [`ReclaimPriorityEngine`] and drains a bounded
//! queue, so every mutation, snapshot and grace expiry is serialized without
//! a lock. [`PriorityService`] is the cheap, cloneable handle callers post
//! through. Kernel writes and timer bookkeeping happen after each engine step
//! returns, never inside it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reclaimd_core::{
    AccountId, BundlePriorityInfo, DomainEvent, EventBus, KernelError, KernelInterface, Pid,
    PrioritySource, ReclaimEvent, ReclaimReason, ServiceError, Uid,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{Applied, Effect, ReclaimPriorityEngine};
use crate::grace::GraceTimers;

const QUEUE: &str = "priority";

enum Request {
    Update {
        event: ReclaimEvent,
        reply: oneshot::Sender<bool>,
    },
    HotSwitch {
        account: AccountId,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<BundlePriorityInfo>>,
    },
    MarkWaiting {
        uid: Uid,
        reply: oneshot::Sender<bool>,
    },
    Reconcile {
        live_pids: Vec<Pid>,
        reply: oneshot::Sender<usize>,
    },
    CheckInvariants {
        reply: oneshot::Sender<Result<(), String>>,
    },
    GraceExpired {
        pid: Pid,
        token: u64,
    },
}

/// Handle to the engine task.
#[derive(Clone)]
pub struct PriorityService {
    requests: mpsc::Sender<Request>,
}

impl PriorityService {
    /// Start the engine task. It runs until every handle is dropped.
    pub fn spawn(
        engine: ReclaimPriorityEngine,
        kernel: Arc<dyn KernelInterface>,
        bus: Arc<EventBus>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let mut worker = Worker {
            engine,
            kernel,
            bus,
            timers: GraceTimers::default(),
            requests: tx.downgrade(),
        };

        let handle = tokio::spawn(async move {
            info!(kernel = worker.kernel.name(), "Priority engine started");
            while let Some(request) = rx.recv().await {
                worker.handle(request);
            }
            info!("Priority engine stopped");
        });

        (Self { requests: tx }, handle)
    }

    /// Apply one lifecycle event. `false` means the event was rejected.
    pub async fn update_reclaim_priority(&self, event: ReclaimEvent) -> Result<bool, ServiceError> {
        self.call(|reply| Request::Update { event, reply }).await
    }

    /// Make `account` the foreground account.
    pub async fn on_account_hot_switch(&self, account: AccountId) -> Result<bool, ServiceError> {
        self.call(|reply| Request::HotSwitch { account, reply }).await
    }

    /// Drop tracked processes that are not in `live_pids`.
    /// Returns how many bundles changed or disappeared.
    pub async fn reconcile(&self, live_pids: Vec<Pid>) -> Result<usize, ServiceError> {
        self.call(|reply| Request::Reconcile { live_pids, reply }).await
    }

    pub async fn check_invariants(&self) -> Result<Result<(), String>, ServiceError> {
        self.call(|reply| Request::CheckInvariants { reply }).await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| ServiceError::QueueClosed(QUEUE))?;
        response.await.map_err(|_| ServiceError::ReplyDropped(QUEUE))
    }
}

#[async_trait]
impl PrioritySource for PriorityService {
    async fn bundle_priority_snapshot(&self) -> Result<Vec<BundlePriorityInfo>, ServiceError> {
        self.call(|reply| Request::Snapshot { reply }).await
    }

    async fn mark_waiting_for_kill(&self, uid: Uid) -> Result<bool, ServiceError> {
        self.call(|reply| Request::MarkWaiting { uid, reply }).await
    }
}

struct Worker {
    engine: ReclaimPriorityEngine,
    kernel: Arc<dyn KernelInterface>,
    bus: Arc<EventBus>,
    timers: GraceTimers,
    requests: mpsc::WeakSender<Request>,
}

impl Worker {
    fn handle(&mut self, request: Request) {
        // A dropped reply only means the caller stopped waiting.
        match request {
            Request::Update { event, reply } => {
                let accepted = self.update(&event);
                let _ = reply.send(accepted);
            }
            Request::HotSwitch { account, reply } => {
                let previous = self.engine.current_account();
                let accepted = match self.engine.on_account_hot_switch(account) {
                    Ok(applied) => {
                        self.publish_switch(previous, account);
                        self.finish(applied);
                        true
                    }
                    Err(e) => {
                        debug!(account, error = %e, "Account switch ignored");
                        false
                    }
                };
                let _ = reply.send(accepted);
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(self.engine.bundle_priority_snapshot());
            }
            Request::MarkWaiting { uid, reply } => {
                let _ = reply.send(self.engine.mark_waiting_for_kill(uid));
            }
            Request::Reconcile { live_pids, reply } => {
                let applied = self.engine.reconcile(&live_pids);
                let changed = applied.changes.len();
                self.finish(applied);
                let _ = reply.send(changed);
            }
            Request::CheckInvariants { reply } => {
                let _ = reply.send(self.engine.check_invariants());
            }
            Request::GraceExpired { pid, token } => match self.engine.expire_grace(pid, token) {
                Ok(applied) => {
                    self.timers.forget(pid);
                    self.finish(applied);
                }
                Err(e) => debug!(pid, token, error = %e, "Grace timer superseded"),
            },
        }
    }

    fn update(&mut self, event: &ReclaimEvent) -> bool {
        let previous = self.engine.current_account();
        match self.engine.update_reclaim_priority(event) {
            Ok(applied) => {
                if event.reason == ReclaimReason::OsAccountChanged {
                    if let Some(current) = self.engine.current_account() {
                        self.publish_switch(previous, current);
                    }
                }
                self.finish(applied);
                true
            }
            Err(e) => {
                debug!(
                    pid = event.pid,
                    uid = event.target_uid,
                    reason = %event.reason,
                    error = %e,
                    "Reclaim event rejected"
                );
                false
            }
        }
    }

    fn publish_switch(&self, previous: Option<AccountId>, current: AccountId) {
        self.bus.publish(DomainEvent::AccountSwitched {
            previous,
            current,
            timestamp: Utc::now(),
        });
    }

    /// Perform the side effects of a completed engine step.
    fn finish(&mut self, applied: Applied) {
        for change in applied.changes {
            let event = match change.new_priority {
                Some(new_priority) => DomainEvent::BundlePriorityChanged {
                    uid: change.uid,
                    bundle_name: change.bundle_name,
                    account_id: change.account_id,
                    old_priority: change.old_priority,
                    new_priority,
                    timestamp: Utc::now(),
                },
                None => DomainEvent::BundleRemoved {
                    uid: change.uid,
                    bundle_name: change.bundle_name,
                    timestamp: Utc::now(),
                },
            };
            self.bus.publish(event);
        }

        for effect in applied.effects {
            match effect {
                Effect::WriteOomScore { pid, priority } => {
                    match self.kernel.write_oom_score(pid, priority) {
                        Ok(()) => {}
                        Err(KernelError::NoSuchProcess(_)) => {
                            debug!(pid, "Process exited before oom_score_adj write");
                        }
                        Err(e) => warn!(pid, priority, error = %e, "Failed to mirror priority"),
                    }
                }
                Effect::ArmGraceTimer { pid, token, delay } => {
                    let requests = self.requests.clone();
                    self.timers.arm(pid, delay, async move {
                        if let Some(requests) = requests.upgrade() {
                            let _ = requests.send(Request::GraceExpired { pid, token }).await;
                        }
                    });
                }
                Effect::CancelGraceTimer { pid } => self.timers.cancel(pid),
            }
        }
    }
}
