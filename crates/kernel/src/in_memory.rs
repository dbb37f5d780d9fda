//! In-memory kernel: useful for testing and `reclaimd simulate`.
//!
//! Processes are pids with a resident size. Killing one removes it and,
//! unless disabled, returns its memory to the buffer, so kill loops see
//! pressure recover the way they would on a device.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use reclaimd_core::priority::to_oom_score_adj;
use reclaimd_core::{KernelError, KernelInterface, MemoryPressure, Pid};

#[derive(Debug, Default)]
struct State {
    /// `None` makes buffer reads fail.
    buffer_kb: Option<u64>,
    reclaim_on_kill: bool,
    processes: BTreeMap<Pid, u64>,
    oom_scores: HashMap<Pid, i32>,
    killed: Vec<Pid>,
    /// Pids whose kill is refused with `PermissionDenied`.
    protected: HashSet<Pid>,
    pressure: Option<MemoryPressure>,
}

pub struct InMemoryKernel {
    state: Mutex<State>,
}

impl InMemoryKernel {
    pub fn new(buffer_kb: u64) -> Self {
        Self {
            state: Mutex::new(State {
                buffer_kb: Some(buffer_kb),
                reclaim_on_kill: true,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a live process holding `rss_kb`.
    pub fn spawn(&self, pid: Pid, rss_kb: u64) {
        self.state().processes.insert(pid, rss_kb);
    }

    /// Remove a process without counting it as a kill.
    pub fn exit(&self, pid: Pid) {
        self.state().processes.remove(&pid);
    }

    pub fn set_buffer_kb(&self, buffer_kb: u64) {
        self.state().buffer_kb = Some(buffer_kb);
    }

    /// Make every following buffer read fail until `set_buffer_kb`.
    pub fn fail_buffer_reads(&self) {
        self.state().buffer_kb = None;
    }

    /// Whether killed memory flows back into the buffer.
    pub fn set_reclaim_on_kill(&self, enabled: bool) {
        self.state().reclaim_on_kill = enabled;
    }

    /// Refuse to kill `pid` until `allow_kill`.
    pub fn deny_kill(&self, pid: Pid) {
        self.state().protected.insert(pid);
    }

    pub fn allow_kill(&self, pid: Pid) {
        self.state().protected.remove(&pid);
    }

    pub fn set_memory_pressure(&self, pressure: MemoryPressure) {
        self.state().pressure = Some(pressure);
    }

    pub fn oom_score(&self, pid: Pid) -> Option<i32> {
        self.state().oom_scores.get(&pid).copied()
    }

    /// Pids killed so far, in kill order.
    pub fn killed(&self) -> Vec<Pid> {
        self.state().killed.clone()
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        self.state().processes.contains_key(&pid)
    }
}

impl KernelInterface for InMemoryKernel {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn current_buffer_kb(&self) -> Result<u64, KernelError> {
        self.state().buffer_kb.ok_or_else(|| KernelError::Io {
            path: "memory.buffer".into(),
            reason: "read failed".into(),
        })
    }

    fn live_pids(&self) -> Result<Vec<Pid>, KernelError> {
        Ok(self.state().processes.keys().copied().collect())
    }

    fn kill_process(&self, pid: Pid) -> Result<u64, KernelError> {
        let mut state = self.state();
        if state.protected.contains(&pid) && state.processes.contains_key(&pid) {
            return Err(KernelError::PermissionDenied(format!("kill pid {pid}")));
        }
        let rss_kb = state
            .processes
            .remove(&pid)
            .ok_or(KernelError::NoSuchProcess(pid))?;
        state.killed.push(pid);
        state.oom_scores.remove(&pid);
        if state.reclaim_on_kill {
            if let Some(buffer) = state.buffer_kb.as_mut() {
                *buffer += rss_kb;
            }
        }
        Ok(rss_kb)
    }

    fn write_oom_score(&self, pid: Pid, priority: i32) -> Result<(), KernelError> {
        let mut state = self.state();
        if !state.processes.contains_key(&pid) {
            return Err(KernelError::NoSuchProcess(pid));
        }
        state.oom_scores.insert(pid, to_oom_score_adj(priority));
        Ok(())
    }

    fn memory_pressure(&self) -> Result<Option<MemoryPressure>, KernelError> {
        Ok(self.state().pressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_returns_memory_to_buffer() {
        let kernel = InMemoryKernel::new(1000);
        kernel.spawn(10, 250);
        assert_eq!(kernel.kill_process(10).unwrap(), 250);
        assert_eq!(kernel.current_buffer_kb().unwrap(), 1250);
        assert_eq!(kernel.killed(), vec![10]);
        assert!(!kernel.is_alive(10));
    }

    #[test]
    fn denied_kill_leaves_process_alive() {
        let kernel = InMemoryKernel::new(1000);
        kernel.spawn(10, 250);
        kernel.deny_kill(10);
        assert!(matches!(kernel.kill_process(10), Err(KernelError::PermissionDenied(_))));
        assert!(kernel.is_alive(10));
        assert_eq!(kernel.current_buffer_kb().unwrap(), 1000);

        kernel.allow_kill(10);
        assert_eq!(kernel.kill_process(10).unwrap(), 250);
    }

    #[test]
    fn kill_without_reclaim_keeps_buffer() {
        let kernel = InMemoryKernel::new(1000);
        kernel.set_reclaim_on_kill(false);
        kernel.spawn(10, 250);
        kernel.kill_process(10).unwrap();
        assert_eq!(kernel.current_buffer_kb().unwrap(), 1000);
    }

    #[test]
    fn second_kill_is_no_such_process() {
        let kernel = InMemoryKernel::new(0);
        kernel.spawn(10, 1);
        kernel.kill_process(10).unwrap();
        assert!(matches!(kernel.kill_process(10), Err(KernelError::NoSuchProcess(10))));
    }

    #[test]
    fn failing_buffer_reads() {
        let kernel = InMemoryKernel::new(0);
        kernel.fail_buffer_reads();
        assert!(kernel.current_buffer_kb().is_err());
        kernel.set_buffer_kb(5);
        assert_eq!(kernel.current_buffer_kb().unwrap(), 5);
    }

    #[test]
    fn oom_scores_only_for_live_pids() {
        let kernel = InMemoryKernel::new(0);
        kernel.spawn(7, 1);
        kernel.write_oom_score(7, 450).unwrap();
        assert_eq!(kernel.oom_score(7), Some(450));
        assert!(kernel.write_oom_score(8, 0).is_err());
    }
}
