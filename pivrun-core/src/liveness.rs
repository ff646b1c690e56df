//! Process liveness probing.
//!
//! A registry entry is live when the OS still reports the process it was
//! created for. A bare pid existence check is not enough: once the original
//! process exits the OS may hand the same pid to an unrelated process. Each
//! record therefore carries the process start time captured at launch, and a
//! live pid whose start time differs is treated as dead.

use std::collections::HashMap;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

use crate::types::{InstanceRecord, ProcessId};

/// Start times reported for the same process may drift by a second between
/// two samples because they are derived from boot time plus ticks.
const START_TIME_TOLERANCE_SECS: u64 = 1;

/// Answers "is this the process I launched, and is it still running?".
pub trait LivenessProbe {
    /// Start time (seconds since the Unix epoch) of the process currently
    /// bound to `pid`, or `None` if no such process is running.
    fn start_time(&self, pid: ProcessId) -> Option<u64>;

    /// Whether `pid` is running and, when `expected_start` is known, still
    /// bound to the process that started at that time.
    fn is_live(&self, pid: ProcessId, expected_start: Option<u64>) -> bool {
        match (self.start_time(pid), expected_start) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual.abs_diff(expected) <= START_TIME_TOLERANCE_SECS,
        }
    }

    /// Convenience wrapper over [`LivenessProbe::is_live`] for a registry entry.
    fn is_record_live(&self, record: &InstanceRecord) -> bool {
        self.is_live(record.process_id, record.process_start_time)
    }
}

/// Probe backed by the operating system's process table (via `sysinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl LivenessProbe for SystemProbe {
    fn start_time(&self, pid: ProcessId) -> Option<u64> {
        if pid.0 == 0 {
            return None;
        }
        let pid = Pid::from_u32(pid.0);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing(),
        );
        let process = system.process(pid)?;
        // Exited children that were never reaped still occupy their pid.
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }
        Some(process.start_time())
    }
}

/// Probe with a fixed process table. Used by tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    live: HashMap<ProcessId, u64>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `pid` as running with the given start time.
    pub fn with_process(mut self, pid: u32, start_time: u64) -> Self {
        self.live.insert(ProcessId(pid), start_time);
        self
    }
}

impl LivenessProbe for StaticProbe {
    fn start_time(&self, pid: ProcessId) -> Option<u64> {
        self.live.get(&pid).copied()
    }
}
