//! Pipe-based backend for the Agent Execution Supervisor (spec §4.A).
//!
//! Used whenever a pseudoterminal is disabled or unavailable. Output is read
//! as raw byte chunks rather than lines so the output-size limit is
//! enforced at the byte it is exceeded, not at the next line boundary.

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use super::group::{configure_process_group, kill_group, terminate_group, ESCALATION_GRACE};
use super::{
    loggable_command_line, AgentCommand, CancelSignal, ExecutionOutcome, SupervisorError, SupervisorLimits,
    SupervisorResult,
};
use crate::error::CoreError;

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

pub async fn run_piped(
    command: AgentCommand,
    limits: SupervisorLimits,
    mut cancel: CancelSignal,
) -> SupervisorResult {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .envs(command.env.iter().cloned())
        .kill_on_drop(true)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    configure_process_group(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| SupervisorError {
        source: CoreError::SpawnFailed(e.to_string()),
        partial_stdout: String::new(),
        partial_stderr: String::new(),
        exit_code: None,
    })?;

    let pid = child.id().ok_or_else(|| SupervisorError {
        source: CoreError::SpawnFailed("child exited before its pid could be observed".into()),
        partial_stdout: String::new(),
        partial_stderr: String::new(),
        exit_code: None,
    })?;
    let pgid = pid as i32;

    info!(
        pid,
        command = %loggable_command_line(&command),
        workspace = %command.cwd.display(),
        mode = "pipe",
        "agent process spawned"
    );

    let (tx, mut rx) = mpsc::channel::<Chunk>(256);

    let stdout: ChildStdout = child.stdout.take().expect("stdout configured as piped");
    let stderr: ChildStderr = child.stderr.take().expect("stderr configured as piped");
    tokio::spawn(pump_stdout(stdout, tx.clone()));
    tokio::spawn(pump_stderr(stderr, tx.clone()));
    drop(tx);

    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    let mut total_bytes: usize = 0;
    let mut channel_closed = false;

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
                terminate_and_wait(&mut child, pgid, pid).await;
                return Err(SupervisorError {
                    source: CoreError::Cancelled,
                    partial_stdout: stdout_buf,
                    partial_stderr: stderr_buf,
                    exit_code: None,
                });
            }

            _ = time::sleep_until(hard_deadline) => {
                warn!(pid, limit_secs = limits.hard_timeout.as_secs(), "hard timeout exceeded");
                terminate_and_wait(&mut child, pgid, pid).await;
                return Err(SupervisorError {
                    source: CoreError::HardTimeout { limit_secs: limits.hard_timeout.as_secs() },
                    partial_stdout: stdout_buf,
                    partial_stderr: stderr_buf,
                    exit_code: None,
                });
            }

            _ = idle_sleep, if idle_deadline.is_some() => {
                warn!(pid, limit_secs = limits.idle_timeout.as_secs(), "idle timeout exceeded");
                terminate_and_wait(&mut child, pgid, pid).await;
                return Err(SupervisorError {
                    source: CoreError::IdleTimeout { limit_secs: limits.idle_timeout.as_secs() },
                    partial_stdout: stdout_buf,
                    partial_stderr: stderr_buf,
                    exit_code: None,
                });
            }

            maybe_chunk = rx.recv(), if !channel_closed => {
                match maybe_chunk {
                    Some(chunk) => {
                        idle_deadline = Some(Instant::now() + limits.idle_timeout);
                        let len = chunk_len(&chunk);

                        if total_bytes + len > limits.max_output_bytes {
                            warn!(pid, limit_bytes = limits.max_output_bytes, "output size exceeded, terminating");
                            terminate_and_wait(&mut child, pgid, pid).await;
                            return Err(SupervisorError {
                                source: CoreError::OutputOverflow { limit_bytes: limits.max_output_bytes },
                                partial_stdout: stdout_buf,
                                partial_stderr: stderr_buf,
                                exit_code: None,
                            });
                        }
                        total_bytes += len;
                        append_chunk(chunk, &mut stdout_buf, &mut stderr_buf);
                    }
                    None => channel_closed = true,
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

            status = child.wait() => {
                break status;
            }
        }
    };

    while let Some(chunk) = rx.recv().await {
        let len = chunk_len(&chunk);
        if total_bytes + len <= limits.max_output_bytes {
            append_chunk(chunk, &mut stdout_buf, &mut stderr_buf);
        }
        total_bytes += len;
    }

    let status = exit_status.map_err(|e| SupervisorError {
        source: CoreError::Process(e.to_string()),
        partial_stdout: stdout_buf.clone(),
        partial_stderr: stderr_buf.clone(),
        exit_code: None,
    })?;

    if total_bytes > limits.max_output_bytes {
        return Err(SupervisorError {
            source: CoreError::OutputOverflow { limit_bytes: limits.max_output_bytes },
            partial_stdout: stdout_buf,
            partial_stderr: stderr_buf,
            exit_code: status.code(),
        });
    }

    Ok(ExecutionOutcome {
        exit_code: status.code().unwrap_or(-1),
        stdout: stdout_buf,
        stderr: stderr_buf,
        used_pty: false,
    })
}

fn chunk_len(chunk: &Chunk) -> usize {
    match chunk {
        Chunk::Stdout(bytes) | Chunk::Stderr(bytes) => bytes.len(),
    }
}

/// Appends the chunk's bytes to the matching buffer. Callers must check
/// the prospective total against the output cap *before* calling this, so
/// bytes past the cap are never exposed in a partial-output error (spec
/// §4.A "Output-size overflow").
fn append_chunk(chunk: Chunk, stdout_buf: &mut String, stderr_buf: &mut String) {
    match chunk {
        Chunk::Stdout(bytes) => stdout_buf.push_str(&String::from_utf8_lossy(&bytes)),
        Chunk::Stderr(bytes) => stderr_buf.push_str(&String::from_utf8_lossy(&bytes)),
    }
}

async fn pump_stdout(mut reader: ChildStdout, tx: mpsc::Sender<Chunk>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(Chunk::Stdout(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn pump_stderr(mut reader: ChildStderr, tx: mpsc::Sender<Chunk>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(Chunk::Stderr(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn terminate_and_wait(child: &mut tokio::process::Child, pgid: i32, pid: u32) {
    terminate_group(pgid, pid);
    tokio::select! {
        _ = child.wait() => return,
        _ = time::sleep(ESCALATION_GRACE) => {}
    }
    kill_group(pgid, pid);
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PtyMode;
    use std::path::PathBuf;
    use std::time::Duration as StdDuration;

    fn limits(hard: u64, idle: u64, max_bytes: usize) -> SupervisorLimits {
        SupervisorLimits {
            hard_timeout: StdDuration::from_millis(hard),
            idle_timeout: StdDuration::from_millis(idle),
            max_output_bytes: max_bytes,
            use_pty: PtyMode::ForceOff,
            host_key_prompt_patterns: super::super::default_host_key_prompt_patterns(),
        }
    }

    fn echo_command(args: Vec<&str>) -> AgentCommand {
        AgentCommand {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), args.join(" ")],
            env: vec![],
            cwd: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn successful_completion_captures_stdout() {
        let cmd = echo_command(vec!["echo hello"]);
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let outcome = run_piped(cmd, limits(5_000, 5_000, 1024 * 1024), rx)
            .await
            .expect("process should succeed");
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("hello"));
        assert!(!outcome.used_pty);
    }

    #[tokio::test]
    async fn nonzero_exit_is_still_a_terminal_outcome() {
        let cmd = echo_command(vec!["exit 3"]);
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let outcome = run_piped(cmd, limits(5_000, 5_000, 1024 * 1024), rx)
            .await
            .expect("abnormal exit is still Ok, not a supervisor error");
        assert_eq!(outcome.exit_code, 3);
    }

    #[tokio::test]
    async fn hard_timeout_terminates_and_reports_partial_output() {
        let cmd = echo_command(vec!["echo partial; sleep 5"]);
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let err = run_piped(cmd, limits(100, 5_000, 1024 * 1024), rx)
            .await
            .expect_err("should time out");
        assert_eq!(err.kind(), "HardTimeout");
        assert!(err.partial_stdout.contains("partial"));
    }

    #[tokio::test]
    async fn idle_timeout_is_not_armed_before_first_byte() {
        // Silence before any output is observed must never trip idle
        // timeout (spec §4.A "Only armed after the first byte has been
        // observed"); a clean exit after that silence is still a success.
        let cmd = echo_command(vec!["sleep 0.3; exit 0"]);
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let outcome = run_piped(cmd, limits(5_000, 200, 1024 * 1024), rx)
            .await
            .expect("idle timeout must not fire before first output byte");
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn output_overflow_terminates_process() {
        let cmd = echo_command(vec!["echo 0123456789"]);
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let err = run_piped(cmd, limits(5_000, 5_000, 5), rx)
            .await
            .expect_err("should overflow");
        assert_eq!(err.kind(), "OutputOverflow");
        assert!(err.to_string().contains("Output size exceeded"));
        assert!(err.to_string().contains("bytes"));
    }

    #[tokio::test]
    async fn cancellation_is_reported_before_exit() {
        let cmd = echo_command(vec!["sleep 5"]);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(run_piped(cmd, limits(10_000, 10_000, 1024 * 1024), rx));
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let _ = tx.send(());
        let err = handle.await.unwrap().expect_err("should be cancelled");
        assert_eq!(err.kind(), "Cancelled");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let cmd = AgentCommand {
            program: "/no/such/binary-xyz".to_string(),
            args: vec![],
            env: vec![],
            cwd: PathBuf::from("/tmp"),
        };
        let (_tx, rx) = tokio::sync::oneshot::channel();
        let err = run_piped(cmd, limits(5_000, 5_000, 1024 * 1024), rx)
            .await
            .expect_err("should fail to spawn");
        assert_eq!(err.kind(), "SpawnFailed");
    }
}
