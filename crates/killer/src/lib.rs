//! Low-memory killer for reclaimd.
//!
//! Reacts to memory pressure by killing the least important bundles the
//! priority engine reports, until free memory recovers above the configured
//! kill tiers or the per-pass cap is reached.

pub mod killer;
pub mod monitor;
pub mod service;
pub mod tiers;

pub use killer::{DEFAULT_MAX_KILLS_PER_PASS, KilledBundle, LowMemoryKiller, PassReport};
pub use monitor::PressureMonitor;
pub use service::KillerService;
pub use tiers::KillTierTable;
