//! Background sampler that turns kernel pressure into killer signals.

use std::sync::Arc;
use std::time::Duration;

use reclaimd_core::{KernelInterface, MemoryPressure};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::service::KillerService;

pub struct PressureMonitor {
    kernel: Arc<dyn KernelInterface>,
    killer: KillerService,
    top_tier_kb: u64,
    psi_threshold: f64,
    poll_interval: Duration,
}

impl PressureMonitor {
    pub fn new(
        kernel: Arc<dyn KernelInterface>,
        killer: KillerService,
        top_tier_kb: u64,
        psi_threshold: f64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kernel,
            killer,
            top_tier_kb,
            psi_threshold,
            poll_interval,
        }
    }

    /// Poll forever on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if self.sample() {
                    self.killer.on_pressure_signal();
                }
            }
        })
    }

    /// Read the kernel once. Returns whether a pass is warranted.
    pub fn sample(&self) -> bool {
        let buffer_kb = match self.kernel.current_buffer_kb() {
            Ok(kb) => Some(kb),
            Err(e) => {
                warn!(error = %e, "Buffer read failed");
                None
            }
        };
        let pressure = match self.kernel.memory_pressure() {
            Ok(pressure) => pressure,
            Err(e) => {
                debug!(error = %e, "PSI read failed");
                None
            }
        };

        let triggered = under_pressure(buffer_kb, pressure, self.top_tier_kb, self.psi_threshold);
        if triggered {
            debug!(
                buffer_kb = ?buffer_kb,
                psi_some_avg10 = ?pressure.map(|p| p.some_avg10),
                "Memory pressure detected"
            );
        }
        triggered
    }
}

fn under_pressure(
    buffer_kb: Option<u64>,
    pressure: Option<MemoryPressure>,
    top_tier_kb: u64,
    psi_threshold: f64,
) -> bool {
    let low_buffer = buffer_kb.is_some_and(|kb| kb < top_tier_kb);
    let stalled = pressure.is_some_and(|p| p.some_avg10 >= psi_threshold);
    low_buffer || stalled
}
