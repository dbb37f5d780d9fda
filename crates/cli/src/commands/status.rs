//! `reclaimd status`: Show memory pressure as the killer sees it.

use reclaimd_config::AppConfig;
use reclaimd_core::KernelInterface;
use reclaimd_core::priority::level_name;
use reclaimd_kernel::ProcfsKernel;
use reclaimd_killer::KillTierTable;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let kernel = ProcfsKernel::new(&config.kernel.proc_root);
    let tiers = KillTierTable::from_provider(&config);

    println!("🧠 reclaimd Status");
    println!("==================");
    println!("  Config:        {}", AppConfig::config_path().display());
    println!("  procfs:        {}", kernel.root().display());
    println!("  Account shift: {}", config.account.priority_shift);
    println!("  Grace period:  {} ms", config.grace.grace_period_ms);
    println!("  Kill cap:      {} per pass", config.killer.max_kills_per_pass);

    println!();
    match kernel.current_buffer_kb() {
        Ok(buffer_kb) => {
            println!("  Buffer:        {} MB ({buffer_kb} KB)", buffer_kb / 1024);
            match tiers.min_priority_for(buffer_kb) {
                Some(min) => println!(
                    "  Kill tier:     ⚠️  priority >= {min} ({}) is killable",
                    level_name(min)
                ),
                None => println!("  Kill tier:     ✅ above top tier, nothing killable"),
            }
        }
        Err(e) => println!("  Buffer:        ❌ {e}"),
    }

    match kernel.memory_pressure() {
        Ok(Some(psi)) => println!(
            "  PSI:           some avg10 {:.2}, full avg10 {:.2}",
            psi.some_avg10, psi.full_avg10
        ),
        Ok(None) => println!("  PSI:           unavailable"),
        Err(e) => println!("  PSI:           ❌ {e}"),
    }

    match kernel.live_pids() {
        Ok(pids) => println!("  Processes:     {}", pids.len()),
        Err(e) => println!("  Processes:     ❌ {e}"),
    }

    Ok(())
}
