//! procfs-backed kernel collaborator.
//!
//! All paths hang off a configurable root so the same code runs against
//! `/proc` on a device and against a fixture tree in tests.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid as NixPid;
use reclaimd_core::priority::to_oom_score_adj;
use reclaimd_core::{KernelError, KernelInterface, MemoryPressure, Pid};
use tracing::debug;

use crate::psi::parse_memory_pressure;

pub struct ProcfsKernel {
    root: PathBuf,
}

impl ProcfsKernel {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: &Path) -> Result<String, KernelError> {
        fs::read_to_string(path).map_err(|e| io_error(path, e))
    }

    /// Resident set size of `pid` in KB, from `VmRSS` in `status`.
    pub fn resident_kb(&self, pid: Pid) -> Result<u64, KernelError> {
        let path = self.root.join(pid.to_string()).join("status");
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KernelError::NoSuchProcess(pid),
            _ => io_error(&path, e),
        })?;
        // Kernel threads have no VmRSS line
        Ok(find_kb_field(&content, "VmRSS:").unwrap_or(0))
    }
}

impl Default for ProcfsKernel {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl KernelInterface for ProcfsKernel {
    fn name(&self) -> &str {
        "procfs"
    }

    fn current_buffer_kb(&self) -> Result<u64, KernelError> {
        let path = self.root.join("meminfo");
        let content = self.read(&path)?;
        find_kb_field(&content, "MemAvailable:").ok_or_else(|| KernelError::Parse {
            path: path.display().to_string(),
            reason: "no MemAvailable line".into(),
        })
    }

    fn live_pids(&self) -> Result<Vec<Pid>, KernelError> {
        let entries = fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))?;
        let mut pids: Vec<Pid> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<Pid>().ok())
            .filter(|pid| *pid > 0)
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn kill_process(&self, pid: Pid) -> Result<u64, KernelError> {
        let freed_kb = self.resident_kb(pid)?;
        kill(NixPid::from_raw(pid), Signal::SIGKILL).map_err(|errno| match errno {
            Errno::ESRCH => KernelError::NoSuchProcess(pid),
            Errno::EPERM => KernelError::PermissionDenied(format!("kill {pid}")),
            other => KernelError::Signal {
                pid,
                reason: other.desc().into(),
            },
        })?;
        debug!(pid, freed_kb, "Sent SIGKILL");
        Ok(freed_kb)
    }

    fn write_oom_score(&self, pid: Pid, priority: i32) -> Result<(), KernelError> {
        let path = self.root.join(pid.to_string()).join("oom_score_adj");
        fs::write(&path, to_oom_score_adj(priority).to_string()).map_err(|e| match e.kind() {
            ErrorKind::NotFound => KernelError::NoSuchProcess(pid),
            ErrorKind::PermissionDenied => KernelError::PermissionDenied(path.display().to_string()),
            _ => io_error(&path, e),
        })
    }

    fn memory_pressure(&self) -> Result<Option<MemoryPressure>, KernelError> {
        let path = self.root.join("pressure").join("memory");
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            // Kernel built without CONFIG_PSI
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        parse_memory_pressure(&content)
            .map(Some)
            .map_err(|reason| KernelError::Parse {
                path: path.display().to_string(),
                reason,
            })
    }
}

fn io_error(path: &Path, e: std::io::Error) -> KernelError {
    KernelError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Value of a `Key:   1234 kB` line.
fn find_kb_field(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|v| v.parse().ok())
}
