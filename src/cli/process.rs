use std::{path::Path, process::Stdio};

use anyhow::{anyhow, Result};
use sysinfo::{get_current_pid, ProcessesToUpdate, Signal, System};
use tracing::info;

use crate::daemon::args::Source;

/// Stops every daemon started from `daemon_path`. Returns how many were stopped.
///
/// On unix the daemon gets SIGTERM and saves the running interval before exiting.
pub fn kill_previous_servers(daemon_path: &Path) -> Result<usize> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let current_id = get_current_pid().map_err(|e| anyhow!("Can't find the current process {e}"))?;
    let mut stopped = 0;
    for (pid, process) in system.processes().iter() {
        if *pid == current_id {
            continue;
        }

        if process
            .exe()
            .filter(|v| v.exists())
            .filter(|v| daemon_path == *v)
            .is_some()
        {
            info!("Stopping daemon {pid}");
            // This will forcefully terminate the process on Windows. Anything better will require a
            // lot more work.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
            process.wait();
            stopped += 1;
        }
    }
    Ok(stopped)
}

/// Shuts down previous daemons and starts a new one. The daemon detaches itself, so the spawned
/// process exits right after forking.
pub fn restart_server(daemon_path: &Path, dir: Option<&Path>, source: Source) -> Result<()> {
    kill_previous_servers(daemon_path)?;
    let mut command = std::process::Command::new(daemon_path);
    if let Some(dir) = dir {
        command.arg("--dir").arg(dir);
    }
    command.args(["--source", source_arg(source)]);

    #[cfg(feature = "win")]
    {
        use std::os::windows::process::CommandExt;
        use windows::Win32::System::Threading::DETACHED_PROCESS;
        command.creation_flags(DETACHED_PROCESS.0);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());

    println!("Spawning {daemon_path:?}");
    #[allow(clippy::zombie_processes)]
    let _ = command.spawn()?;
    println!("Success");
    Ok(())
}

fn source_arg(source: Source) -> &'static str {
    match source {
        Source::Browser => "browser",
        Source::Desktop => "desktop",
    }
}
