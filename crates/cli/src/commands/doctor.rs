//! `reclaimd doctor`: Diagnose system health.

use reclaimd_config::AppConfig;
use reclaimd_core::KernelInterface;
use reclaimd_kernel::ProcfsKernel;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 reclaimd Doctor — System Diagnostics");
    println!("=======================================\n");

    let mut issues = 0;

    // Check config
    let config_path = AppConfig::config_path();
    let config = if config_path.exists() {
        match AppConfig::load() {
            Ok(config) => {
                println!("  ✅ Config file valid ({})", config_path.display());
                config
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                issues += 1;
                AppConfig::default()
            }
        }
    } else {
        println!("  ⚠️  No config file at {}, using defaults", config_path.display());
        AppConfig::default()
    };

    let kernel = ProcfsKernel::new(&config.kernel.proc_root);

    match kernel.current_buffer_kb() {
        Ok(kb) => println!("  ✅ meminfo readable ({} MB available)", kb / 1024),
        Err(e) => {
            println!("  ❌ Cannot read free memory: {e}");
            issues += 1;
        }
    }

    match kernel.live_pids() {
        Ok(pids) => println!("  ✅ Process list readable ({} pids)", pids.len()),
        Err(e) => {
            println!("  ❌ Cannot enumerate processes: {e}");
            issues += 1;
        }
    }

    match kernel.memory_pressure() {
        Ok(Some(_)) => println!("  ✅ PSI memory pressure available"),
        Ok(None) => println!("  ⚠️  PSI unavailable, monitor falls back to buffer polling"),
        Err(e) => {
            println!("  ⚠️  PSI unreadable: {e}");
            issues += 1;
        }
    }

    let oom_adj = kernel.root().join("self").join("oom_score_adj");
    if oom_adj.exists() {
        println!("  ✅ oom_score_adj present");
    } else {
        println!("  ❌ {} missing, priorities cannot be mirrored", oom_adj.display());
        issues += 1;
    }

    if config.killer.enabled {
        println!("  ✅ Low-memory killer enabled");
    } else {
        println!("  ⚠️  Low-memory killer disabled in config");
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
