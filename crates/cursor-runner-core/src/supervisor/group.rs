//! Process-group spawn and two-phase termination, shared by the pipe and
//! pseudoterminal backends (spec §4.A, §4.B).
//!
//! POSIX: the child is made a process-group leader at spawn time so that a
//! single signal can reach it and every descendant it forks. Windows has no
//! equivalent primitive; `taskkill /T` walks the process tree rooted at the
//! child instead, which is the best available approximation.

use std::time::Duration;

use tracing::debug;

/// Delay between the terminate signal and the kill-immediately escalation.
pub const ESCALATION_GRACE: Duration = Duration::from_secs(1);

/// Make `command`'s eventual child its own process-group leader.
///
/// On POSIX, `setpgid(0, 0)` means the child's pgid equals its own pid once
/// spawned, so callers can use `child.id()` as the group id for signaling.
#[cfg(unix)]
pub fn configure_process_group(command: &mut tokio::process::Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
pub fn configure_process_group(_command: &mut tokio::process::Command) {}

/// Send a terminate signal to the whole process group, with a direct
/// fallback to the immediate child (spec §4.B step 1).
///
/// Callers must not invoke this again after a terminal exit has already
/// been observed for this handle.
#[cfg(unix)]
pub fn terminate_group(pgid: i32, child_pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Err(e) = signal::kill(Pid::from_raw(-pgid), Signal::SIGTERM) {
        debug!(pgid, error = %e, "SIGTERM to process group failed (may have already exited)");
    }
    if let Err(e) = signal::kill(Pid::from_raw(child_pid as i32), Signal::SIGTERM) {
        debug!(child_pid, error = %e, "SIGTERM to child failed (may have already exited)");
    }
}

/// Escalate to an unconditional kill of the whole process group (spec §4.B
/// step 2).
#[cfg(unix)]
pub fn kill_group(pgid: i32, child_pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Err(e) = signal::kill(Pid::from_raw(-pgid), Signal::SIGKILL) {
        debug!(pgid, error = %e, "SIGKILL to process group failed (may have already exited)");
    }
    if let Err(e) = signal::kill(Pid::from_raw(child_pid as i32), Signal::SIGKILL) {
        debug!(child_pid, error = %e, "SIGKILL to child failed (may have already exited)");
    }
}

#[cfg(windows)]
pub fn terminate_group(_pgid: i32, child_pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &child_pid.to_string(), "/T"])
        .output();
}

#[cfg(windows)]
pub fn kill_group(_pgid: i32, child_pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &child_pid.to_string(), "/T", "/F"])
        .output();
}
