//! The reclaim priority engine: a synchronous state machine over the
//! process → bundle → account hierarchy.
//!
//! Every public mutation runs to completion and leaves the hierarchy and the
//! ordered index in agreement. Kernel I/O never happens here: mutations
//! return the [`Effect`]s the caller must perform once the step is done.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use reclaimd_core::priority::{FOREGROUND, SYSTEM, UNKNOWN};
use reclaimd_core::{
    AccountId, BundlePriorityInfo, BundleState, ConfigProvider, EngineError, Pid, ReclaimEvent,
    ReclaimReason, Uid, derive_account_id,
};
use tracing::{debug, info, warn};

use crate::index::PriorityIndex;
use crate::model::{Account, Bundle, ExtensionBinding, PendingGrace, Process};
use crate::rules;

/// Tunables the engine is constructed with.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub pinned_bundles: BTreeSet<String>,
    pub priority_shift: i32,
    pub clamp_shifted_priority: bool,
    /// Zero disables grace-period reversion.
    pub grace_period: Duration,
}

impl EngineSettings {
    pub fn from_provider(provider: &dyn ConfigProvider) -> Self {
        Self {
            pinned_bundles: provider.system_pinned_bundle_names(),
            priority_shift: provider.account_priority_shift(),
            ..Self::default()
        }
    }

    pub fn with_clamp(mut self, clamp: bool) -> Self {
        self.clamp_shifted_priority = clamp;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pinned_bundles: BTreeSet::new(),
            priority_shift: 50,
            clamp_shifted_priority: false,
            grace_period: Duration::from_secs(20),
        }
    }
}

/// Work left for the caller after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    WriteOomScore { pid: Pid, priority: i32 },
    ArmGraceTimer { pid: Pid, token: u64, delay: Duration },
    CancelGraceTimer { pid: Pid },
}

/// A bundle that entered, moved within, or left the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityChange {
    pub uid: Uid,
    pub bundle_name: String,
    pub account_id: AccountId,
    pub old_priority: Option<i32>,
    /// `None` when the bundle was removed.
    pub new_priority: Option<i32>,
}

/// Outcome of a successful mutation.
#[derive(Debug, Default)]
pub struct Applied {
    pub changes: Vec<PriorityChange>,
    pub effects: Vec<Effect>,
}

struct Touched {
    bundle_name: String,
    account_id: AccountId,
    old_priority: Option<i32>,
}

/// Bookkeeping for one mutation: what it touched and what it must emit.
#[derive(Default)]
struct Txn {
    touched: BTreeMap<Uid, Touched>,
    new_pids: Vec<Pid>,
    effects: Vec<Effect>,
}

pub struct ReclaimPriorityEngine {
    settings: EngineSettings,
    processes: HashMap<Pid, Process>,
    bundles: HashMap<Uid, Bundle>,
    accounts: BTreeMap<AccountId, Account>,
    index: PriorityIndex,
    current_account: Option<AccountId>,
    previous_account: Option<AccountId>,
    next_grace_token: u64,
}

impl ReclaimPriorityEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            processes: HashMap::new(),
            bundles: HashMap::new(),
            accounts: BTreeMap::new(),
            index: PriorityIndex::new(),
            current_account: None,
            previous_account: None,
            next_grace_token: 0,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Apply one lifecycle event.
    pub fn update_reclaim_priority(&mut self, event: &ReclaimEvent) -> Result<Applied, EngineError> {
        let result = match event.reason {
            ReclaimReason::CreateProcess => self.create_process(event),
            ReclaimReason::ProcessTerminated => self.terminate_process(event),
            ReclaimReason::OsAccountChanged => {
                self.on_account_hot_switch(derive_account_id(event.target_uid))
            }
            ReclaimReason::ProcessReady => self
                .resolve_mutable(event.target_uid, event.pid)
                .map(|_| Applied::default()),
            reason => self.apply_lifecycle(event, reason),
        };

        if result.is_ok() {
            debug!(
                pid = event.pid,
                uid = event.target_uid,
                reason = %event.reason,
                priority = ?self.index.priority_of(event.target_uid),
                "Reclaim priority updated"
            );
        }
        debug_assert_eq!(self.check_invariants(), Ok(()));
        result
    }

    /// Make `new_account` the foreground account: its bundles are promoted by
    /// the priority shift and the previous foreground account's are demoted.
    pub fn on_account_hot_switch(&mut self, new_account: AccountId) -> Result<Applied, EngineError> {
        if self.current_account == Some(new_account) {
            return Err(EngineError::AccountUnchanged(new_account));
        }

        let previous = self.current_account.replace(new_account);
        self.previous_account = previous;
        for account in self.accounts.values_mut() {
            account.is_current_foreground_account = account.id == new_account;
            account.is_previous_account = Some(account.id) == previous;
        }

        let affected: Vec<Uid> = [previous, Some(new_account)]
            .into_iter()
            .flatten()
            .filter_map(|id| self.accounts.get(&id))
            .flat_map(|account| account.uids.iter().copied())
            .collect();

        let mut txn = Txn::default();
        for &uid in &affected {
            self.touch(uid, &mut txn);
        }
        for &uid in &affected {
            self.resettle_bundle(uid);
        }

        info!(
            previous = ?previous,
            current = new_account,
            bundles = affected.len(),
            "Foreground account switched"
        );
        debug_assert_eq!(self.check_invariants(), Ok(()));
        Ok(self.commit(txn))
    }

    /// Revert the boost a grace timer was armed for, unless a later event
    /// superseded it.
    pub fn expire_grace(&mut self, pid: Pid, token: u64) -> Result<Applied, EngineError> {
        let pending = self
            .processes
            .get(&pid)
            .and_then(|p| p.grace)
            .filter(|g| g.token == token)
            .ok_or(EngineError::StaleGraceTimer(pid))?;
        let revert = rules::grace_revert(pending.reason).ok_or(EngineError::StaleGraceTimer(pid))?;

        let mut txn = Txn::default();
        let uid = self.processes.get(&pid).map_or(0, |p| p.uid);
        self.touch(uid, &mut txn);
        if let Some(process) = self.processes.get_mut(&pid) {
            process.grace = None;
            rules::apply(process, revert, None);
        }
        self.settle_process(pid);
        self.refresh_bundle(uid);

        debug!(pid, uid, boost = %pending.reason, "Grace period expired");
        debug_assert_eq!(self.check_invariants(), Ok(()));
        Ok(self.commit(txn))
    }

    /// Flag a bundle as killed. Returns `false` if it is gone.
    pub fn mark_waiting_for_kill(&mut self, uid: Uid) -> bool {
        match self.bundles.get_mut(&uid) {
            Some(bundle) => {
                bundle.state = BundleState::WaitingForKill;
                true
            }
            None => false,
        }
    }

    /// Drop every tracked process that is not in `live_pids`.
    pub fn reconcile(&mut self, live_pids: &[Pid]) -> Applied {
        let live: HashSet<Pid> = live_pids.iter().copied().collect();
        let mut dead: Vec<Pid> = self
            .processes
            .keys()
            .filter(|pid| !live.contains(pid))
            .copied()
            .collect();
        dead.sort_unstable();

        let mut txn = Txn::default();
        for &pid in &dead {
            self.remove_process(pid, &mut txn);
        }
        if !dead.is_empty() {
            info!(count = dead.len(), "Dropped processes that are no longer alive");
        }
        debug_assert_eq!(self.check_invariants(), Ok(()));
        self.commit(txn)
    }

    /// Immutable copy of the index, most important first.
    pub fn bundle_priority_snapshot(&self) -> Vec<BundlePriorityInfo> {
        self.index
            .iter()
            .filter_map(|(_, uid)| self.bundles.get(&uid))
            .map(|bundle| BundlePriorityInfo {
                uid: bundle.uid,
                name: bundle.name.clone(),
                priority: bundle.priority,
                account_id: bundle.account_id,
                state: bundle.state,
                pinned: bundle.pinned,
                pids: bundle.pids.iter().copied().collect(),
            })
            .collect()
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn bundle(&self, uid: Uid) -> Option<&Bundle> {
        self.bundles.get(&uid)
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn index(&self) -> &PriorityIndex {
        &self.index
    }

    pub fn current_account(&self) -> Option<AccountId> {
        self.current_account
    }

    pub fn previous_account(&self) -> Option<AccountId> {
        self.previous_account
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Verify hierarchy/index agreement. Any `Err` is a defect.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.index.is_consistent() || self.index.len() != self.bundles.len() {
            return Err(format!(
                "index holds {} entries for {} bundles",
                self.index.len(),
                self.bundles.len()
            ));
        }

        for bundle in self.bundles.values() {
            if self.index.priority_of(bundle.uid) != Some(bundle.priority) {
                return Err(format!("bundle {} is indexed at a stale priority", bundle.uid));
            }
            if bundle.account_id != derive_account_id(bundle.uid) {
                return Err(format!("bundle {} filed under account {}", bundle.uid, bundle.account_id));
            }
            let min = bundle
                .pids
                .iter()
                .map(|pid| {
                    self.processes
                        .get(pid)
                        .filter(|p| p.uid == bundle.uid)
                        .map(|p| p.priority)
                        .ok_or_else(|| format!("bundle {} lists foreign pid {pid}", bundle.uid))
                })
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .min()
                .ok_or_else(|| format!("bundle {} has no processes", bundle.uid))?;
            if min != bundle.priority {
                return Err(format!(
                    "bundle {} priority {} != min of processes {min}",
                    bundle.uid, bundle.priority
                ));
            }
            let listed = self
                .accounts
                .get(&bundle.account_id)
                .is_some_and(|a| a.uids.contains(&bundle.uid));
            if !listed {
                return Err(format!("bundle {} missing from its account", bundle.uid));
            }
        }

        for process in self.processes.values() {
            let owned = self
                .bundles
                .get(&process.uid)
                .is_some_and(|b| b.pids.contains(&process.pid));
            if !owned {
                return Err(format!("process {} is orphaned", process.pid));
            }
        }

        for account in self.accounts.values() {
            if account.uids.is_empty() {
                return Err(format!("account {} is empty", account.id));
            }
            if account.uids.iter().any(|uid| !self.bundles.contains_key(uid)) {
                return Err(format!("account {} lists a removed bundle", account.id));
            }
        }

        Ok(())
    }

    // ── Per-reason handlers ─────────────────────────────────────────────

    fn create_process(&mut self, event: &ReclaimEvent) -> Result<Applied, EngineError> {
        let (pid, uid) = (event.pid, event.target_uid);
        let mut txn = Txn::default();

        if let Some(existing) = self.processes.get(&pid) {
            if existing.uid == uid {
                debug!(pid, uid, "Process already tracked");
                return Ok(Applied::default());
            }
            warn!(pid, old_uid = existing.uid, uid, "Pid reused, dropping stale process");
            self.remove_process(pid, &mut txn);
        }

        let account_id = derive_account_id(uid);
        self.ensure_account(account_id).uids.insert(uid);

        if self.bundles.contains_key(&uid) {
            self.touch(uid, &mut txn);
        } else {
            let pinned = self.settings.pinned_bundles.contains(&event.bundle_name);
            if pinned {
                info!(uid, bundle = %event.bundle_name, "Pinned system bundle");
            }
            self.bundles.insert(
                uid,
                Bundle {
                    uid,
                    name: event.bundle_name.clone(),
                    account_id,
                    priority: if pinned { SYSTEM } else { FOREGROUND },
                    state: BundleState::Normal,
                    pinned,
                    pids: BTreeSet::new(),
                },
            );
            txn.touched.insert(
                uid,
                Touched {
                    bundle_name: event.bundle_name.clone(),
                    account_id,
                    old_priority: None,
                },
            );
        }

        let level = match self.bundles.get_mut(&uid) {
            Some(bundle) => {
                bundle.state = BundleState::Normal;
                bundle.pids.insert(pid);
                if bundle.pinned { SYSTEM } else { FOREGROUND }
            }
            None => return Err(EngineError::UnknownBundle(uid)),
        };
        self.processes.insert(pid, Process::new(pid, uid, level));
        txn.new_pids.push(pid);

        self.settle_process(pid);
        self.refresh_bundle(uid);
        Ok(self.commit(txn))
    }

    fn terminate_process(&mut self, event: &ReclaimEvent) -> Result<Applied, EngineError> {
        let (pid, uid) = (event.pid, event.target_uid);
        if !self.processes.get(&pid).is_some_and(|p| p.uid == uid) {
            return Err(EngineError::UnknownProcess { pid, uid });
        }

        let mut txn = Txn::default();
        self.remove_process(pid, &mut txn);
        Ok(self.commit(txn))
    }

    fn apply_lifecycle(
        &mut self,
        event: &ReclaimEvent,
        reason: ReclaimReason,
    ) -> Result<Applied, EngineError> {
        let (pid, uid) = (event.pid, event.target_uid);
        self.resolve_mutable(uid, pid)?;

        let binding = (reason == ReclaimReason::BindExtension).then(|| {
            let caller_level = event.caller_uid.and_then(|caller| self.bundle_level(caller));
            ExtensionBinding {
                caller_uid: event.caller_uid,
                floor: rules::extension_floor(caller_level),
            }
        });

        let grace_period = self.settings.grace_period;
        let token = if reason.arms_grace_timer() && !grace_period.is_zero() {
            self.next_grace_token += 1;
            Some(self.next_grace_token)
        } else {
            None
        };

        let mut txn = Txn::default();
        self.touch(uid, &mut txn);

        let process = self
            .processes
            .get_mut(&pid)
            .ok_or(EngineError::UnknownProcess { pid, uid })?;
        if process.grace.take().is_some() {
            txn.effects.push(Effect::CancelGraceTimer { pid });
        }
        rules::apply(process, reason, binding);
        if let Some(token) = token {
            process.grace = Some(PendingGrace { token, reason });
            txn.effects.push(Effect::ArmGraceTimer {
                pid,
                token,
                delay: grace_period,
            });
        }

        self.settle_process(pid);
        self.refresh_bundle(uid);
        Ok(self.commit(txn))
    }

    // ── Hierarchy helpers ───────────────────────────────────────────────

    /// The event targets a live, non-pinned process.
    /// Most important unshifted level among the bundle's processes.
    fn bundle_level(&self, uid: Uid) -> Option<i32> {
        let bundle = self.bundles.get(&uid)?;
        bundle
            .pids
            .iter()
            .filter_map(|pid| self.processes.get(pid))
            .map(|process| process.level)
            .min()
    }

    fn resolve_mutable(&self, uid: Uid, pid: Pid) -> Result<(), EngineError> {
        let bundle = self.bundles.get(&uid).ok_or(EngineError::UnknownBundle(uid))?;
        if !bundle.pids.contains(&pid) {
            return Err(EngineError::UnknownProcess { pid, uid });
        }
        if bundle.pinned {
            return Err(EngineError::PinnedBundle {
                uid,
                bundle_name: bundle.name.clone(),
            });
        }
        Ok(())
    }

    fn ensure_account(&mut self, id: AccountId) -> &mut Account {
        let is_current = self.current_account == Some(id);
        let is_previous = self.previous_account == Some(id);
        let priority_shift = self.settings.priority_shift;
        self.accounts.entry(id).or_insert_with(|| Account {
            id,
            is_current_foreground_account: is_current,
            is_previous_account: is_previous,
            priority_shift,
            uids: BTreeSet::new(),
        })
    }

    /// Record a bundle's priority before the transaction changes it.
    fn touch(&self, uid: Uid, txn: &mut Txn) {
        if txn.touched.contains_key(&uid) {
            return;
        }
        if let Some(bundle) = self.bundles.get(&uid) {
            txn.touched.insert(
                uid,
                Touched {
                    bundle_name: bundle.name.clone(),
                    account_id: bundle.account_id,
                    old_priority: Some(bundle.priority),
                },
            );
        }
    }

    fn remove_process(&mut self, pid: Pid, txn: &mut Txn) -> Option<Process> {
        let process = self.processes.remove(&pid)?;
        if process.grace.is_some() {
            txn.effects.push(Effect::CancelGraceTimer { pid });
        }

        let uid = process.uid;
        self.touch(uid, txn);
        let bundle = self.bundles.get_mut(&uid)?;
        bundle.pids.remove(&pid);

        if bundle.pids.is_empty() {
            let account_id = bundle.account_id;
            self.bundles.remove(&uid);
            self.index.remove(uid);
            let emptied = self.accounts.get_mut(&account_id).is_some_and(|account| {
                account.uids.remove(&uid);
                account.uids.is_empty()
            });
            if emptied {
                self.accounts.remove(&account_id);
                debug!(account_id, "Account has no bundles left");
            }
        } else if process.priority <= bundle.priority {
            self.refresh_bundle(uid);
        }
        Some(process)
    }

    /// Recompute a process's priority from its level and account shift.
    fn settle_process(&mut self, pid: Pid) {
        let Some(process) = self.processes.get_mut(&pid) else {
            return;
        };
        if self.bundles.get(&process.uid).is_some_and(|b| b.pinned) {
            process.priority = SYSTEM;
            return;
        }
        let offset = self
            .accounts
            .get(&derive_account_id(process.uid))
            .map_or(0, Account::offset);
        process.priority = shifted(process.level, offset, self.settings.clamp_shifted_priority);
    }

    fn resettle_bundle(&mut self, uid: Uid) {
        let pids: Vec<Pid> = self
            .bundles
            .get(&uid)
            .map(|b| b.pids.iter().copied().collect())
            .unwrap_or_default();
        for pid in pids {
            self.settle_process(pid);
        }
        self.refresh_bundle(uid);
    }

    /// Recompute a bundle's priority and move its index entry.
    fn refresh_bundle(&mut self, uid: Uid) {
        let Some(bundle) = self.bundles.get_mut(&uid) else {
            return;
        };
        bundle.priority = if bundle.pinned {
            SYSTEM
        } else {
            bundle
                .pids
                .iter()
                .filter_map(|pid| self.processes.get(pid))
                .map(|p| p.priority)
                .min()
                .unwrap_or(UNKNOWN)
        };
        self.index.upsert(uid, bundle.priority);
    }

    fn commit(&self, txn: Txn) -> Applied {
        let Txn {
            touched,
            new_pids,
            mut effects,
        } = txn;
        let new_pids: HashSet<Pid> = new_pids.into_iter().collect();
        let mut changes = Vec::new();

        for (uid, before) in touched {
            match self.bundles.get(&uid) {
                Some(bundle) => {
                    let moved = before.old_priority != Some(bundle.priority);
                    if moved {
                        changes.push(PriorityChange {
                            uid,
                            bundle_name: bundle.name.clone(),
                            account_id: bundle.account_id,
                            old_priority: before.old_priority,
                            new_priority: Some(bundle.priority),
                        });
                    }
                    effects.extend(
                        bundle
                            .pids
                            .iter()
                            .filter(|pid| moved || new_pids.contains(pid))
                            .map(|&pid| Effect::WriteOomScore {
                                pid,
                                priority: bundle.priority,
                            }),
                    );
                }
                None if before.old_priority.is_some() => changes.push(PriorityChange {
                    uid,
                    bundle_name: before.bundle_name,
                    account_id: before.account_id,
                    old_priority: before.old_priority,
                    new_priority: None,
                }),
                None => {}
            }
        }

        Applied { changes, effects }
    }
}

/// Apply an account offset to a level. With `clamp`, a promotion never takes
/// a priority below FOREGROUND unless the level already was.
fn shifted(level: i32, offset: i32, clamp: bool) -> i32 {
    let priority = level + offset;
    if clamp && offset < 0 {
        priority.max(level.min(FOREGROUND))
    } else {
        priority
    }
}
