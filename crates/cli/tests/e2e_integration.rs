//! End-to-end integration tests for reclaimd.
//!
//! These tests wire the real engine queue, killer queue and in-memory kernel
//! together the way `reclaimd daemon` does, then drive them with lifecycle
//! events and memory pressure.

use std::sync::Arc;
use std::time::Duration;

use reclaimd_config::AppConfig;
use reclaimd_core::priority::{BACKGROUND, FOREGROUND, SUSPEND, SYSTEM};
use reclaimd_core::{
    BundleState, DomainEvent, EventBus, KernelInterface, Pid, PrioritySource, ReclaimEvent,
    ReclaimReason, Uid,
};
use reclaimd_kernel::InMemoryKernel;
use reclaimd_killer::{KillTierTable, KillerService, LowMemoryKiller};
use reclaimd_priority::{EngineSettings, PriorityService, ReclaimPriorityEngine};

const MB: u64 = 1024;

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    kernel: Arc<InMemoryKernel>,
    bus: Arc<EventBus>,
    priority: PriorityService,
    killer: KillerService,
}

impl Harness {
    fn new(config: &AppConfig, buffer_kb: u64) -> Self {
        let kernel = Arc::new(InMemoryKernel::new(buffer_kb));
        let bus = Arc::new(EventBus::new(1024));

        let settings = EngineSettings::from_provider(config)
            .with_clamp(config.account.clamp_shifted_priority)
            .with_grace_period(Duration::from_millis(config.grace.grace_period_ms));
        let (priority, _) = PriorityService::spawn(
            ReclaimPriorityEngine::new(settings),
            kernel.clone(),
            bus.clone(),
            config.runtime.queue_capacity,
        );
        let killer = LowMemoryKiller::new(
            Arc::new(priority.clone()),
            kernel.clone(),
            bus.clone(),
            KillTierTable::from_provider(config),
        )
        .with_max_kills_per_pass(config.killer.max_kills_per_pass);
        let (killer, _) = KillerService::spawn(killer, config.runtime.queue_capacity);

        Self {
            kernel,
            bus,
            priority,
            killer,
        }
    }

    async fn launch(&self, pid: Pid, uid: Uid, name: &str, rss_kb: u64) {
        self.kernel.spawn(pid, rss_kb);
        assert!(self.send(pid, uid, name, ReclaimReason::CreateProcess).await);
    }

    async fn send(&self, pid: Pid, uid: Uid, name: &str, reason: ReclaimReason) -> bool {
        self.priority
            .update_reclaim_priority(ReclaimEvent::new(pid, uid, name, reason))
            .await
            .unwrap()
    }

    async fn priority_of(&self, uid: Uid) -> Option<i32> {
        self.priority
            .bundle_priority_snapshot()
            .await
            .unwrap()
            .into_iter()
            .find(|b| b.uid == uid)
            .map(|b| b.priority)
    }

    async fn assert_consistent(&self) {
        assert_eq!(self.priority.check_invariants().await.unwrap(), Ok(()));
    }
}

// ── E2E: Lifecycle to oom_score_adj ──────────────────────────────────────

#[tokio::test]
async fn e2e_lifecycle_mirrors_kernel_scores() {
    let h = Harness::new(&AppConfig::default(), 1024 * MB);
    h.launch(100, 20010001, "a.b.c", 4 * MB).await;
    assert_eq!(h.kernel.oom_score(100), Some(FOREGROUND));

    h.send(100, 20010001, "a.b.c", ReclaimReason::Background).await;
    assert_eq!(h.kernel.oom_score(100), Some(BACKGROUND));

    h.send(100, 20010001, "a.b.c", ReclaimReason::SuspendDelayStart).await;
    assert_eq!(h.priority_of(20010001).await, Some(100));

    h.send(100, 20010001, "a.b.c", ReclaimReason::SuspendDelayEnd).await;
    assert_eq!(h.priority_of(20010001).await, Some(BACKGROUND));

    h.kernel.exit(100);
    h.send(100, 20010001, "a.b.c", ReclaimReason::ProcessTerminated).await;
    assert_eq!(h.priority_of(20010001).await, None);
    assert!(h.priority.bundle_priority_snapshot().await.unwrap().is_empty());
    h.assert_consistent().await;
}

#[tokio::test]
async fn e2e_multi_process_bundle_follows_most_important() {
    let h = Harness::new(&AppConfig::default(), 1024 * MB);
    h.launch(100, 20010001, "mail", MB).await;
    h.launch(101, 20010001, "mail", MB).await;
    h.send(101, 20010001, "mail", ReclaimReason::Background).await;
    assert_eq!(h.priority_of(20010001).await, Some(FOREGROUND));

    h.send(100, 20010001, "mail", ReclaimReason::ProcessTerminated).await;
    assert_eq!(h.priority_of(20010001).await, Some(BACKGROUND));
    // The surviving process is rewritten when its bundle moves.
    assert_eq!(h.kernel.oom_score(101), Some(BACKGROUND));
    h.assert_consistent().await;
}

// ── E2E: Pressure and kills ──────────────────────────────────────────────

#[tokio::test]
async fn e2e_pressure_kills_least_important_first() {
    let h = Harness::new(&AppConfig::default(), 1024 * MB);
    h.launch(1, 20010001, "foreground.app", 30 * MB).await;
    h.launch(2, 20010002, "background.app", 30 * MB).await;
    h.send(2, 20010002, "background.app", ReclaimReason::Background).await;
    h.launch(3, 20010003, "suspended.app", 30 * MB).await;
    h.send(3, 20010003, "suspended.app", ReclaimReason::ApplicationSuspend).await;

    // 350 MB free → priority >= 300 is killable. Two kills lift the buffer
    // into the 500 MB tier, where the foreground app is out of reach.
    h.kernel.set_buffer_kb(350 * MB);
    let report = h.killer.pressure_pass().await.unwrap();

    let killed: Vec<Uid> = report.killed.iter().map(|k| k.uid).collect();
    assert_eq!(killed, vec![20010003, 20010002]);
    assert_eq!(report.freed_kb, 60 * MB);
    assert!(h.kernel.is_alive(1));

    let snapshot = h.priority.bundle_priority_snapshot().await.unwrap();
    let waiting: Vec<Uid> = snapshot
        .iter()
        .filter(|b| b.state == BundleState::WaitingForKill)
        .map(|b| b.uid)
        .collect();
    assert_eq!(waiting, vec![20010002, 20010003]);
}

#[tokio::test]
async fn e2e_kill_cap_and_termination_cleanup() {
    let h = Harness::new(&AppConfig::default(), 10 * MB);
    h.kernel.set_reclaim_on_kill(false);
    for i in 0..5 {
        let uid = 20010010 + i;
        h.launch(200 + i, uid, &format!("app{i}"), MB).await;
        h.send(200 + i, uid, &format!("app{i}"), ReclaimReason::Background).await;
    }

    assert_eq!(h.killer.on_pressure().await.unwrap(), 3 * MB);
    assert_eq!(h.kernel.killed().len(), 3);

    // The platform reports the deaths; the reconciler catches the rest.
    for pid in h.kernel.killed() {
        let uid = 20010010 + (pid - 200);
        h.send(pid, uid, "", ReclaimReason::ProcessTerminated).await;
    }
    assert_eq!(h.priority.bundle_priority_snapshot().await.unwrap().len(), 2);

    assert_eq!(h.killer.on_pressure().await.unwrap(), 2 * MB);
    let live = h.kernel.live_pids().unwrap();
    assert_eq!(h.priority.reconcile(live).await.unwrap(), 2);
    assert!(h.priority.bundle_priority_snapshot().await.unwrap().is_empty());
    h.assert_consistent().await;
}

#[tokio::test]
async fn e2e_pinned_bundles_survive_any_pressure() {
    let h = Harness::new(&AppConfig::default(), 0);
    h.launch(10, 1000, "com.ohos.systemui", 500 * MB).await;
    h.launch(11, 20010001, "game", MB).await;

    assert!(!h.send(10, 1000, "com.ohos.systemui", ReclaimReason::Background).await);
    assert_eq!(h.kernel.oom_score(10), Some(SYSTEM));

    let report = h.killer.pressure_pass().await.unwrap();
    assert_eq!(report.killed.len(), 1);
    assert_eq!(report.killed[0].uid, 20010001);
    assert!(h.kernel.is_alive(10));
}

#[tokio::test]
async fn e2e_failed_buffer_read_stops_killing() {
    let h = Harness::new(&AppConfig::default(), 0);
    h.launch(1, 20010001, "app", MB).await;
    h.kernel.fail_buffer_reads();

    assert_eq!(h.killer.on_pressure().await.unwrap(), 0);
    assert!(h.kernel.killed().is_empty());
}

// ── E2E: Multi-account ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_account_switch_reorders_kill_candidates() {
    let h = Harness::new(&AppConfig::default(), 1024 * MB);
    h.priority.on_account_hot_switch(100).await.unwrap();

    // Same lifecycle level in two accounts
    h.launch(1, 20010001, "owner.app", MB).await;
    h.send(1, 20010001, "owner.app", ReclaimReason::Background).await;
    h.launch(2, 20210001, "guest.app", MB).await;
    h.send(2, 20210001, "guest.app", ReclaimReason::Background).await;

    assert_eq!(h.priority_of(20010001).await, Some(BACKGROUND - 50));
    assert_eq!(h.priority_of(20210001).await, Some(BACKGROUND));

    // Switching via an event carrying any uid of the new account
    assert!(h.send(0, 20200000, "", ReclaimReason::OsAccountChanged).await);
    assert_eq!(h.priority_of(20010001).await, Some(BACKGROUND));
    assert_eq!(h.priority_of(20210001).await, Some(BACKGROUND - 50));
    assert_eq!(h.kernel.oom_score(2), Some(BACKGROUND - 50));

    // 360 MB free → priority >= 300 killable; the demoted owner app goes first
    h.kernel.set_reclaim_on_kill(false);
    h.kernel.set_buffer_kb(360 * MB);
    let report = h.killer.pressure_pass().await.unwrap();
    assert_eq!(report.killed[0].uid, 20010001);
    h.assert_consistent().await;
}

#[tokio::test]
async fn e2e_clamped_shift_keeps_foreground_floor() {
    let mut config = AppConfig::default();
    config.account.clamp_shifted_priority = true;
    let h = Harness::new(&config, 1024 * MB);

    h.launch(1, 20010001, "owner.app", MB).await;
    h.launch(2, 20010002, "owner.other", MB).await;
    h.send(2, 20010002, "owner.other", ReclaimReason::ApplicationSuspend).await;
    h.priority.on_account_hot_switch(100).await.unwrap();

    assert_eq!(h.priority_of(20010001).await, Some(FOREGROUND));
    assert_eq!(h.priority_of(20010002).await, Some(SUSPEND - 50));
}

// ── E2E: Grace period ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_grace_period_reverts_ability_start() {
    let h = Harness::new(&AppConfig::default(), 1024 * MB);
    h.launch(1, 20010001, "widget", MB).await;
    h.send(1, 20010001, "widget", ReclaimReason::Background).await;
    h.send(1, 20010001, "widget", ReclaimReason::AbilityStart).await;
    assert_eq!(h.priority_of(20010001).await, Some(FOREGROUND));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.priority_of(20010001).await, Some(FOREGROUND));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.priority_of(20010001).await, Some(BACKGROUND));
    assert_eq!(h.kernel.oom_score(1), Some(BACKGROUND));
}

#[tokio::test(start_paused = true)]
async fn e2e_grace_cancelled_by_later_event() {
    let h = Harness::new(&AppConfig::default(), 1024 * MB);
    h.launch(1, 20010001, "widget", MB).await;
    h.send(1, 20010001, "widget", ReclaimReason::AbilityStart).await;
    h.send(1, 20010001, "widget", ReclaimReason::EventStart).await;
    h.send(1, 20010001, "widget", ReclaimReason::Background).await;
    assert_eq!(h.priority_of(20010001).await, Some(200));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.priority_of(20010001).await, Some(200));
}

// ── E2E: Domain events ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_domain_events_trace_a_kill() {
    let h = Harness::new(&AppConfig::default(), 0);
    let mut rx = h.bus.subscribe();
    h.launch(1, 20010001, "victim", 8 * MB).await;
    h.killer.on_pressure().await.unwrap();

    let mut saw_change = false;
    let mut saw_kill = false;
    let mut saw_pass = false;
    while let Ok(event) = rx.try_recv() {
        match event.as_ref() {
            DomainEvent::BundlePriorityChanged { uid: 20010001, .. } => saw_change = true,
            DomainEvent::BundleKilled { uid: 20010001, freed_kb, .. } => {
                assert_eq!(*freed_kb, 8 * MB);
                saw_kill = true;
            }
            DomainEvent::PressurePass { kills: 1, .. } => saw_pass = true,
            _ => {}
        }
    }
    assert!(saw_change && saw_kill && saw_pass);
}

// ── E2E: Configuration ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_config_file_drives_services() {
    let toml_src = r#"
pinned_bundles = ["com.vendor.keeper"]

[account]
priority_shift = 100

[killer]
max_kills_per_pass = 1

[[kill_tiers]]
buffer_kb = 1024
min_priority = 500
"#;
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), toml_src).unwrap();
    let config = AppConfig::load_from(file.path()).unwrap();

    let h = Harness::new(&config, 512);
    h.kernel.set_reclaim_on_kill(false);
    h.launch(1, 1001, "com.vendor.keeper", MB).await;
    h.launch(2, 20010001, "a", MB).await;
    h.send(2, 20010001, "a", ReclaimReason::ApplicationSuspend).await;
    h.launch(3, 20010002, "b", MB).await;
    h.send(3, 20010002, "b", ReclaimReason::ApplicationSuspend).await;
    h.launch(4, 20010003, "c", MB).await;

    h.priority.on_account_hot_switch(100).await.unwrap();
    assert_eq!(h.priority_of(20010001).await, Some(SUSPEND - 100));

    // Cap of one; foreground app (-100) is below min priority 500.
    let report = h.killer.pressure_pass().await.unwrap();
    assert_eq!(report.killed.len(), 1);
    assert_eq!(report.killed[0].uid, 20010002);
    assert!(h.kernel.is_alive(1));
    assert!(h.kernel.is_alive(4));
}
