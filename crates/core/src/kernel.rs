//! KernelInterface trait: the synchronous procfs / cgroup collaborator.
//!
//! The engine mirrors priorities through it and the killer reads pressure
//! and terminates processes through it. Implementations: procfs (real
//! devices) and in-memory (tests, simulation).

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::priority::Pid;

/// Memory pressure-stall information (`/proc/pressure/memory`), in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPressure {
    pub some_avg10: f64,
    pub full_avg10: f64,
}

pub trait KernelInterface: Send + Sync {
    /// Implementation name (e.g., "procfs", "in_memory").
    fn name(&self) -> &str;

    /// Free memory headroom in KB.
    fn current_buffer_kb(&self) -> Result<u64, KernelError>;

    /// Every pid currently alive.
    fn live_pids(&self) -> Result<Vec<Pid>, KernelError>;

    /// Kill `pid` and report how much memory (KB) it held.
    fn kill_process(&self, pid: Pid) -> Result<u64, KernelError>;

    /// Mirror a reclaim priority into the kernel's OOM score for `pid`.
    fn write_oom_score(&self, pid: Pid, priority: i32) -> Result<(), KernelError>;

    /// PSI stall averages, if the kernel exposes them.
    fn memory_pressure(&self) -> Result<Option<MemoryPressure>, KernelError> {
        Ok(None)
    }
}
