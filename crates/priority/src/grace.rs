//! Per-process grace timers.
//!
//! At most one timer is outstanding per pid. Arming replaces (and aborts)
//! the previous one. A fired timer only posts a message back to the engine
//! queue; whether it still applies is decided there by its token.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use reclaimd_core::Pid;
use tokio::task::JoinHandle;

#[derive(Default)]
pub(crate) struct GraceTimers {
    timers: HashMap<Pid, JoinHandle<()>>,
}

impl GraceTimers {
    /// Run `on_fire` after `delay` unless cancelled or re-armed first.
    pub(crate) fn arm<F>(&mut self, pid: Pid, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });
        if let Some(previous) = self.timers.insert(pid, handle) {
            previous.abort();
        }
    }

    pub(crate) fn cancel(&mut self, pid: Pid) {
        if let Some(handle) = self.timers.remove(&pid) {
            handle.abort();
        }
    }

    /// Drop the bookkeeping for a timer that already fired.
    pub(crate) fn forget(&mut self, pid: Pid) {
        self.timers.remove(&pid);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for GraceTimers {
    fn drop(&mut self) {
        for handle in self.timers.values() {
            handle.abort();
        }
    }
}
