//! `reclaimd config`: Configuration management commands.

use reclaimd_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed and validated");

            let mut warnings = Vec::new();

            if config.pinned_bundles.is_empty() {
                warnings.push("No pinned bundles: every bundle is killable");
            }

            if config.grace.grace_period_ms == 0 {
                warnings.push("Grace period disabled: boosts persist until an explicit end event");
            }

            if !config.killer.enabled {
                warnings.push("Low-memory killer disabled");
            }

            if config.account.clamp_shifted_priority && config.account.priority_shift == 0 {
                warnings.push("clamp_shifted_priority has no effect with priority_shift = 0");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Pinned:     {}", config.pinned_bundles.join(", "));
            println!("   Shift:      {}", config.account.priority_shift);
            println!("   Kill tiers: {}", config.kill_tiers.len());
            for tier in &config.kill_tiers {
                println!(
                    "     < {:>6} KB → priority >= {}",
                    tier.buffer_kb, tier.min_priority
                );
            }
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}
