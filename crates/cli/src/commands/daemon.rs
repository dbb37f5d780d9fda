//! `reclaimd daemon`: the composition root.
//!
//! Builds the kernel collaborator, the priority engine queue, the killer
//! queue and the pressure monitor, then feeds lifecycle events into the
//! engine until interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reclaimd_config::AppConfig;
use reclaimd_core::{DomainEvent, EventBus, KernelInterface, ReclaimEvent, Result};
use reclaimd_kernel::ProcfsKernel;
use reclaimd_killer::{KillTierTable, KillerService, LowMemoryKiller, PressureMonitor};
use reclaimd_priority::{EngineSettings, PriorityService, ReclaimPriorityEngine};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Handles to the two task queues.
pub struct Services {
    pub priority: PriorityService,
    pub killer: KillerService,
}

/// Spawn the engine and killer queues wired to `kernel`.
pub fn start_services(
    config: &AppConfig,
    kernel: Arc<dyn KernelInterface>,
    bus: Arc<EventBus>,
) -> Services {
    let settings = EngineSettings::from_provider(config)
        .with_clamp(config.account.clamp_shifted_priority)
        .with_grace_period(Duration::from_millis(config.grace.grace_period_ms));
    let (priority, _engine_handle) = PriorityService::spawn(
        ReclaimPriorityEngine::new(settings),
        kernel.clone(),
        bus.clone(),
        config.runtime.queue_capacity,
    );

    let killer = LowMemoryKiller::new(
        Arc::new(priority.clone()),
        kernel,
        bus,
        KillTierTable::from_provider(config),
    )
    .with_max_kills_per_pass(config.killer.max_kills_per_pass);
    let (killer, _killer_handle) = KillerService::spawn(killer, config.runtime.queue_capacity);

    Services { priority, killer }
}

/// Parse one line of the event stream. Blank and `#` lines yield `None`.
pub fn parse_event_line(line: &str) -> Option<serde_json::Result<ReclaimEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

pub async fn run(events: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load()?;

    println!("🧠 reclaimd — Starting memory-pressure arbitration");
    println!("   procfs:      {}", config.kernel.proc_root.display());
    println!("   Kill tiers:  {}", config.kill_tiers.len());
    println!(
        "   Killer:      {}",
        if config.killer.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "   Events:      {}",
        events
            .as_deref()
            .map_or_else(|| "none".to_string(), |p| p.display().to_string())
    );

    let kernel: Arc<dyn KernelInterface> = Arc::new(ProcfsKernel::new(&config.kernel.proc_root));
    if config.killer.enabled {
        let buffer_kb = kernel.current_buffer_kb()?;
        info!(buffer_kb, "Free buffer readable");
    }
    let bus = Arc::new(EventBus::default());
    spawn_event_logger(&bus);

    let services = start_services(&config, kernel.clone(), bus);
    services
        .priority
        .on_account_hot_switch(config.account.foreground_account)
        .await?;

    if config.killer.enabled {
        PressureMonitor::new(
            kernel.clone(),
            services.killer.clone(),
            config.top_tier_kb(),
            config.killer.psi_some_avg10_threshold,
            Duration::from_millis(config.killer.poll_interval_ms),
        )
        .spawn();
        info!(poll_interval_ms = config.killer.poll_interval_ms, "Pressure monitor started");
    }

    if config.runtime.reconcile_interval_secs > 0 {
        spawn_reconciler(
            kernel,
            services.priority.clone(),
            Duration::from_secs(config.runtime.reconcile_interval_secs),
        );
    }

    if let Some(path) = events {
        let priority = services.priority.clone();
        tokio::spawn(async move {
            if let Err(e) = feed_events(&path, &priority).await {
                warn!(path = %path.display(), error = %e, "Event source failed");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

/// Read events line by line and post each to the engine.
async fn feed_events(path: &Path, priority: &PriorityService) -> Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut accepted = 0usize;
    let mut rejected = 0usize;
    let mut number = 0usize;

    while let Some(line) = lines.next_line().await? {
        number += 1;
        match parse_event_line(&line) {
            None => {}
            Some(Ok(event)) => {
                if priority.update_reclaim_priority(event).await? {
                    accepted += 1;
                } else {
                    rejected += 1;
                }
            }
            Some(Err(source)) => {
                let e = reclaimd_core::Error::Input { line: number, source };
                warn!(error = %e, "Skipping malformed event");
            }
        }
    }

    info!(accepted, rejected, "Event source closed");
    Ok(())
}

fn spawn_reconciler(kernel: Arc<dyn KernelInterface>, priority: PriorityService, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let live = match kernel.live_pids() {
                Ok(pids) => pids,
                Err(e) => {
                    warn!(error = %e, "Could not list live pids");
                    continue;
                }
            };
            match priority.reconcile(live).await {
                Ok(changed) => debug!(changed, "Reconciled with kernel"),
                Err(e) => {
                    warn!(error = %e, "Priority engine gone, stopping reconciler");
                    break;
                }
            }
        }
    });
}

fn spawn_event_logger(bus: &EventBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.as_ref() {
                    DomainEvent::BundleKilled { uid, bundle_name, freed_kb, .. } => {
                        info!(uid, bundle = %bundle_name, freed_kb, "Bundle killed");
                    }
                    DomainEvent::AccountSwitched { previous, current, .. } => {
                        info!(previous = ?previous, current, "Account switched");
                    }
                    other => debug!(event = ?other, "Domain event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
