//! Pseudoterminal backend for the Agent Execution Supervisor (spec §4.A).
//!
//! Chosen by default (`PtyMode::Auto`) so the Agent CLI sees a real
//! terminal, which most interactive CLIs require to render progress output
//! correctly. Falls back to [`super::pipe::run_piped`] if pty allocation
//! fails, unless the caller forced pty mode on.
//!
//! A pty slave is its own session leader on POSIX, so the child's process
//! group id equals its pid with no extra `setpgid` call needed.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, PtyPair, PtySize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use super::group::{kill_group, terminate_group, ESCALATION_GRACE};
use super::{
    loggable_command_line, AgentCommand, CancelSignal, ExecutionOutcome, SupervisorError, SupervisorLimits,
    SupervisorResult,
};
use crate::error::CoreError;

/// An opened, spawned pty session, ready to be driven by [`run_pty`].
///
/// Opening and spawning happen together because `portable_pty`'s API ties
/// the slave handle's lifetime to the spawn call.
pub struct PtySession {
    pair: PtyPair,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    pid: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to allocate pseudoterminal: {0}")]
pub struct PtyOpenError(String);

pub fn try_open(command: &AgentCommand) -> Result<PtySession, PtyOpenError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| PtyOpenError(e.to_string()))?;

    let mut builder = CommandBuilder::new(&command.program);
    builder.args(&command.args);
    builder.cwd(&command.cwd);
    for (key, value) in &command.env {
        builder.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(builder)
        .map_err(|e| PtyOpenError(e.to_string()))?;
    let pid = child
        .process_id()
        .ok_or_else(|| PtyOpenError("child exited before its pid could be observed".into()))?;

    Ok(PtySession {
        pair,
        child: Arc::new(Mutex::new(child)),
        pid,
    })
}

enum Event {
    Output(Vec<u8>),
    ReaderClosed,
    Exited(std::io::Result<portable_pty::ExitStatus>),
}

pub async fn run_pty(
    session: PtySession,
    command: AgentCommand,
    limits: SupervisorLimits,
    mut cancel: CancelSignal,
) -> SupervisorResult {
    let PtySession { pair, child, pid } = session;
    let pgid = pid as i32;

    info!(
        pid,
        command = %loggable_command_line(&command),
        workspace = %command.cwd.display(),
        mode = "pty",
        "agent process spawned"
    );

    let mut reader = pair.master.try_clone_reader().map_err(|e| SupervisorError {
        source: CoreError::SpawnFailed(format!("failed to clone pty reader: {e}")),
        partial_stdout: String::new(),
        partial_stderr: String::new(),
        exit_code: None,
    })?;
    let writer = pair.master.take_writer().map_err(|e| SupervisorError {
        source: CoreError::SpawnFailed(format!("failed to acquire pty writer: {e}")),
        partial_stdout: String::new(),
        partial_stderr: String::new(),
        exit_code: None,
    })?;
    let writer = Arc::new(Mutex::new(writer));

    let (tx, mut rx) = mpsc::channel::<Event>(256);

    let reader_tx = tx.clone();
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let _ = reader_tx.blocking_send(Event::ReaderClosed);
                    break;
                }
                Ok(n) => {
                    if reader_tx.blocking_send(Event::Output(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let wait_child = Arc::clone(&child);
    let wait_tx = tx.clone();
    std::thread::spawn(move || {
        let status = wait_child.lock().expect("child mutex poisoned").wait();
        let _ = wait_tx.blocking_send(Event::Exited(status));
    });
    drop(tx);

    let mut stdout_buf = String::new();
    let mut total_bytes: usize = 0;
    let mut reader_closed = false;
    let mut host_key_responded = false;
    let host_key_patterns: Vec<String> = limits
        .host_key_prompt_patterns
        .iter()
        .map(|p| p.to_ascii_lowercase())
        .collect();

    let hard_deadline = Instant::now() + limits.hard_timeout;
    let mut idle_deadline: Option<Instant> = None;
    let spawn_instant = Instant::now();
    let mut heartbeat = time::interval(Duration::from_secs(30));
    heartbeat.tick().await;

    let exit_status = loop {
        let idle_sleep = async {
            match idle_deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = &mut cancel => {
                warn!(pid, "execution cancelled, terminating process group");
                terminate_and_wait(&child, pgid, pid).await;
                return Err(SupervisorError {
                    source: CoreError::Cancelled,
                    partial_stdout: stdout_buf,
                    partial_stderr: String::new(),
                    exit_code: None,
                });
            }

            _ = time::sleep_until(hard_deadline) => {
                warn!(pid, limit_secs = limits.hard_timeout.as_secs(), "hard timeout exceeded");
                terminate_and_wait(&child, pgid, pid).await;
                return Err(SupervisorError {
                    source: CoreError::HardTimeout { limit_secs: limits.hard_timeout.as_secs() },
                    partial_stdout: stdout_buf,
                    partial_stderr: String::new(),
                    exit_code: None,
                });
            }

            _ = idle_sleep, if idle_deadline.is_some() => {
                warn!(pid, limit_secs = limits.idle_timeout.as_secs(), "idle timeout exceeded");
                terminate_and_wait(&child, pgid, pid).await;
                return Err(SupervisorError {
                    source: CoreError::IdleTimeout { limit_secs: limits.idle_timeout.as_secs() },
                    partial_stdout: stdout_buf,
                    partial_stderr: String::new(),
                    exit_code: None,
                });
            }

            maybe_event = rx.recv(), if !reader_closed => {
                match maybe_event {
                    Some(Event::Output(bytes)) => {
                        idle_deadline = Some(Instant::now() + limits.idle_timeout);

                        if total_bytes + bytes.len() > limits.max_output_bytes {
                            warn!(pid, limit_bytes = limits.max_output_bytes, "output size exceeded, terminating");
                            terminate_and_wait(&child, pgid, pid).await;
                            return Err(SupervisorError {
                                source: CoreError::OutputOverflow { limit_bytes: limits.max_output_bytes },
                                partial_stdout: stdout_buf,
                                partial_stderr: String::new(),
                                exit_code: None,
                            });
                        }
                        total_bytes += bytes.len();
                        stdout_buf.push_str(&String::from_utf8_lossy(&bytes));

                        if !host_key_responded {
                            let lower = stdout_buf.to_ascii_lowercase();
                            if host_key_patterns.iter().any(|p| lower.contains(p.as_str())) {
                                host_key_responded = true;
                                info!(pid, "host-key prompt detected, sending auto-response");
                                let writer = Arc::clone(&writer);
                                let _ = tokio::task::spawn_blocking(move || {
                                    let mut w = writer.lock().expect("pty writer mutex poisoned");
                                    let _ = w.write_all(b"yes\r");
                                    let _ = w.flush();
                                })
                                .await;
                            }
                        }
                    }
                    Some(Event::ReaderClosed) => reader_closed = true,
                    Some(Event::Exited(status)) => break status,
                    None => reader_closed = true,
                }
            }

            _ = heartbeat.tick() => {
                debug!(
                    pid,
                    elapsed_secs = spawn_instant.elapsed().as_secs(),
                    idle_armed = idle_deadline.is_some(),
                    bytes_seen = total_bytes,
                    "heartbeat",
                );
            }
        }
    };

    while let Some(event) = rx.recv().await {
        match event {
            Event::Output(bytes) => {
                if total_bytes + bytes.len() <= limits.max_output_bytes {
                    stdout_buf.push_str(&String::from_utf8_lossy(&bytes));
                }
                total_bytes += bytes.len();
            }
            Event::ReaderClosed | Event::Exited(_) => {}
        }
    }

    let status = exit_status.map_err(|e| SupervisorError {
        source: CoreError::Process(e.to_string()),
        partial_stdout: stdout_buf.clone(),
        partial_stderr: String::new(),
        exit_code: None,
    })?;

    if total_bytes > limits.max_output_bytes {
        return Err(SupervisorError {
            source: CoreError::OutputOverflow { limit_bytes: limits.max_output_bytes },
            partial_stdout: stdout_buf,
            partial_stderr: String::new(),
            exit_code: Some(status.exit_code() as i32),
        });
    }

    Ok(ExecutionOutcome {
        exit_code: status.exit_code() as i32,
        stdout: stdout_buf,
        stderr: String::new(),
        used_pty: true,
    })
}

async fn terminate_and_wait(child: &Arc<Mutex<Box<dyn Child + Send + Sync>>>, pgid: i32, pid: u32) {
    terminate_group(pgid, pid);

    // `Child::wait` blocks the calling thread until the process actually
    // exits, so it has to run on a blocking-pool thread; racing it against
    // the grace sleep (rather than a non-blocking `try_wait` poll) is what
    // gives the child the full escalation window before SIGKILL.
    let child_for_wait = Arc::clone(child);
    let wait_handle = tokio::task::spawn_blocking(move || {
        let mut c = child_for_wait.lock().expect("child mutex poisoned");
        c.wait()
    });

    tokio::select! {
        _ = wait_handle => return,
        _ = time::sleep(ESCALATION_GRACE) => {}
    }

    kill_group(pgid, pid);
    let child_for_kill = Arc::clone(child);
    let _ = tokio::task::spawn_blocking(move || {
        let mut c = child_for_kill.lock().expect("child mutex poisoned");
        let _ = c.kill();
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn shell_command(script: &str) -> AgentCommand {
        AgentCommand {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: vec![],
            cwd: PathBuf::from("/tmp"),
        }
    }

    fn force_on_limits() -> SupervisorLimits {
        SupervisorLimits {
            hard_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(5),
            max_output_bytes: 1024 * 1024,
            use_pty: crate::config::PtyMode::ForceOn,
            host_key_prompt_patterns: super::super::default_host_key_prompt_patterns(),
        }
    }

    #[tokio::test]
    async fn pty_session_captures_output() {
        let cmd = shell_command("echo from-pty");
        let session = try_open(&cmd).expect("pty should open on this platform");
        let (_tx, rx) = oneshot::channel();
        let outcome = run_pty(session, cmd, force_on_limits(), rx)
            .await
            .expect("should succeed");
        assert!(outcome.used_pty);
        assert!(outcome.stdout.contains("from-pty"));
    }

    #[tokio::test]
    async fn host_key_prompt_gets_single_auto_response() {
        let cmd = shell_command(
            "echo 'Are you sure you want to continue connecting (yes/no)?'; read ans; echo got:$ans",
        );
        let session = try_open(&cmd).expect("pty should open on this platform");
        let (_tx, rx) = oneshot::channel();
        let outcome = run_pty(session, cmd, force_on_limits(), rx)
            .await
            .expect("should succeed");
        assert!(outcome.stdout.contains("got:yes"));
    }

    #[tokio::test]
    async fn hard_timeout_terminates_pty_session() {
        let cmd = shell_command("sleep 5");
        let session = try_open(&cmd).expect("pty should open on this platform");
        let (_tx, rx) = oneshot::channel();
        let mut limits = force_on_limits();
        limits.hard_timeout = Duration::from_millis(100);
        let err = run_pty(session, cmd, limits, rx)
            .await
            .expect_err("should time out");
        assert_eq!(err.kind(), "HardTimeout");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let cmd = shell_command("true");
        let bad = AgentCommand {
            program: "/no/such/binary-xyz".to_string(),
            args: vec![],
            env: vec![],
            cwd: cmd.cwd.clone(),
        };
        assert!(try_open(&bad).is_err());
    }

    #[tokio::test]
    async fn output_overflow_never_exposes_bytes_past_the_cap() {
        let cmd = shell_command("echo 0123456789");
        let session = try_open(&cmd).expect("pty should open on this platform");
        let (_tx, rx) = oneshot::channel();
        let mut limits = force_on_limits();
        limits.max_output_bytes = 5;
        let err = run_pty(session, cmd, limits, rx).await.expect_err("should overflow");
        assert_eq!(err.kind(), "OutputOverflow");
        assert!(err.partial_stdout.len() <= 5, "partial_stdout must not contain bytes past the cap: {:?}", err.partial_stdout);
    }

    #[tokio::test]
    async fn terminate_and_wait_honors_the_full_escalation_grace_before_kill() {
        // A child that ignores SIGTERM must survive the full grace window
        // before the SIGKILL escalation lands.
        let cmd = shell_command("trap '' TERM; sleep 5");
        let session = try_open(&cmd).expect("pty should open on this platform");
        let pid = session.pid;
        let pgid = pid as i32;
        let child = Arc::clone(&session.child);

        let started = Instant::now();
        terminate_and_wait(&child, pgid, pid).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= ESCALATION_GRACE, "expected at least the full escalation grace, got {elapsed:?}");
    }
}
