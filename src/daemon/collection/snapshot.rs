//! Process list capability. [SystemSnapshot] is the real source, tests mock [ProcessSnapshot].

use anyhow::{bail, Result};
use sysinfo::{ProcessesToUpdate, System};

/// Intended to serve as a contract for anything that can list running processes.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSnapshot {
    /// Names of running processes, in a stable order.
    fn snapshot(&mut self) -> Result<Vec<String>>;
}

/// Lists processes through `sysinfo`, ordered by pid so the fallback pass of the resolver is
/// deterministic.
pub struct SystemSnapshot {
    system: System,
}

impl SystemSnapshot {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSnapshot for SystemSnapshot {
    fn snapshot(&mut self) -> Result<Vec<String>> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let mut processes = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| (*pid, process.name().to_string_lossy().into_owned()))
            .collect::<Vec<_>>();
        if processes.is_empty() {
            bail!("process list is empty");
        }
        processes.sort_by_key(|(pid, _)| *pid);
        Ok(processes.into_iter().map(|(_, name)| name).collect())
    }
}
