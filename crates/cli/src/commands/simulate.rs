//! `reclaimd simulate`: Replay a scenario against an in-memory kernel.
//!
//! The script holds one JSON step per line:
//!
//! ```text
//! {"spawn": {"pid": 100, "rss_kb": 20480}}
//! {"event": {"pid": 100, "target_uid": 20010001, "bundle_name": "a.b.c", "reason": "CREATE_PROCESS"}}
//! {"switch_account": {"account": 101}}
//! {"buffer": {"kb": 92160}}
//! "pressure"
//! "snapshot"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use reclaimd_config::AppConfig;
use reclaimd_core::priority::level_name;
use reclaimd_core::{
    AccountId, BundlePriorityInfo, Error, EventBus, Pid, PrioritySource, ReclaimEvent,
    ReclaimReason, Result,
};
use reclaimd_kernel::InMemoryKernel;
use serde::Deserialize;

use super::daemon::{Services, start_services};

/// Resident size given to processes the script creates without a `spawn`.
const DEFAULT_RSS_KB: u64 = 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Spawn { pid: Pid, rss_kb: u64 },
    Event(ReclaimEvent),
    SwitchAccount { account: AccountId },
    Buffer { kb: u64 },
    Pressure,
    Snapshot,
}

pub fn parse_script(source: &str) -> Result<Vec<Step>> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|source| Error::Input { line: n + 1, source })
        })
        .collect()
}

pub async fn run(script: PathBuf, buffer_mb: u64) -> Result<()> {
    let source = std::fs::read_to_string(&script)?;
    let steps = parse_script(&source)?;
    let config = AppConfig::load()?;

    println!("🧪 reclaimd simulate — {} step(s)", steps.len());
    println!("   Start buffer: {buffer_mb} MB\n");

    let kernel = Arc::new(InMemoryKernel::new(start_buffer_kb(buffer_mb)));
    let bus = Arc::new(EventBus::default());
    let services = start_services(&config, kernel.clone(), bus);

    for step in steps {
        apply_step(step, &services, &kernel).await?;
    }

    println!();
    print_snapshot(&services.priority.bundle_priority_snapshot().await?);
    Ok(())
}

/// `--buffer-mb` in KB, saturating on absurd inputs.
fn start_buffer_kb(buffer_mb: u64) -> u64 {
    buffer_mb.saturating_mul(1024)
}

async fn apply_step(
    step: Step,
    services: &Services,
    kernel: &InMemoryKernel,
) -> Result<()> {
    match step {
        Step::Spawn { pid, rss_kb } => kernel.spawn(pid, rss_kb),
        Step::Event(event) => {
            match event.reason {
                ReclaimReason::CreateProcess if !kernel.is_alive(event.pid) => {
                    kernel.spawn(event.pid, DEFAULT_RSS_KB);
                }
                ReclaimReason::ProcessTerminated => kernel.exit(event.pid),
                _ => {}
            }
            let label = format!("{} pid={} uid={}", event.reason, event.pid, event.target_uid);
            let accepted = services.priority.update_reclaim_priority(event).await?;
            println!("  {} {label}", if accepted { "✅" } else { "⏭️ " });
        }
        Step::SwitchAccount { account } => {
            let switched = services.priority.on_account_hot_switch(account).await?;
            println!("  🔀 account {account}{}", if switched { "" } else { " (unchanged)" });
        }
        Step::Buffer { kb } => {
            kernel.set_buffer_kb(kb);
            println!("  📉 buffer = {kb} KB");
        }
        Step::Pressure => {
            let report = services.killer.pressure_pass().await?;
            for kill in &report.killed {
                println!(
                    "  💀 killed {} (uid {}, priority {}) freed {} KB",
                    kill.name, kill.uid, kill.priority, kill.freed_kb
                );
            }
            println!(
                "  ⚡ pressure pass: {} kill(s), {} KB freed",
                report.killed.len(),
                report.freed_kb
            );
        }
        Step::Snapshot => print_snapshot(&services.priority.bundle_priority_snapshot().await?),
    }
    Ok(())
}

fn print_snapshot(snapshot: &[BundlePriorityInfo]) {
    println!("  {:>10}  {:>9}  {:<14}  {:>7}  {:<16}  BUNDLE", "UID", "PRIORITY", "LEVEL", "ACCOUNT", "STATE");
    for bundle in snapshot {
        let state = match (bundle.pinned, bundle.state) {
            (true, _) => "pinned".to_string(),
            (false, state) => format!("{state:?}"),
        };
        println!(
            "  {:>10}  {:>9}  {:<14}  {:>7}  {:<16}  {}",
            bundle.uid,
            bundle.priority,
            level_name(bundle.priority),
            bundle.account_id,
            state,
            bundle.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_step_kinds() {
        let script = r#"
# setup
{"spawn": {"pid": 100, "rss_kb": 2048}}
{"event": {"pid": 100, "target_uid": 20010001, "bundle_name": "a.b.c", "reason": "CREATE_PROCESS"}}
{"switch_account": {"account": 101}}
{"buffer": {"kb": 92160}}
"pressure"
"snapshot"
"#;
        let steps = parse_script(script).unwrap();
        assert_eq!(steps.len(), 6);
        assert!(matches!(steps[0], Step::Spawn { pid: 100, rss_kb: 2048 }));
        assert!(matches!(&steps[1], Step::Event(e) if e.reason == ReclaimReason::CreateProcess));
        assert!(matches!(steps[4], Step::Pressure));
    }

    #[test]
    fn reports_failing_line_number() {
        let err = parse_script("\"pressure\"\n{\"bogus\": 1}").unwrap_err();
        assert!(matches!(err, Error::Input { line: 2, .. }), "{err}");
    }

    #[test]
    fn huge_start_buffer_saturates() {
        assert_eq!(start_buffer_kb(u64::MAX), u64::MAX);
        assert_eq!(start_buffer_kb(1024), 1024 * 1024);
    }
}
