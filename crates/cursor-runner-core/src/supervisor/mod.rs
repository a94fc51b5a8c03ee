//! Agent Execution Supervisor (spec §4.A): spawns the Agent CLI as a
//! detached process-group leader, enforces hard/idle/output-size limits,
//! and reports a single terminal outcome.

mod group;
mod pipe;
mod pty;

use std::path::PathBuf;
use std::time::Duration;

use crate::config::PtyMode;
use crate::error::CoreError;
use crate::security::SecretRedactor;

pub use pipe::run_piped;
pub use pty::run_pty;

/// Command line and environment for a single Agent CLI invocation.
///
/// Invariant: `program` is resolved before spawn; arguments are passed
/// verbatim, with no shell interpretation.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

/// Per-invocation limits and mode selection, derived from
/// [`crate::config::SupervisorSettings`] plus any per-request overrides.
#[derive(Debug, Clone)]
pub struct SupervisorLimits {
    pub hard_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_output_bytes: usize,
    pub use_pty: PtyMode,
    pub host_key_prompt_patterns: Vec<String>,
}

impl Default for SupervisorLimits {
    fn default() -> Self {
        Self {
            hard_timeout: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(300),
            max_output_bytes: 10 * 1024 * 1024,
            use_pty: PtyMode::Auto,
            host_key_prompt_patterns: default_host_key_prompt_patterns(),
        }
    }
}

/// Default host-key-prompt patterns scanned for in pseudoterminal mode
/// (spec §4.A "Input channel").
pub fn default_host_key_prompt_patterns() -> Vec<String> {
    vec!["Are you sure you want to continue connecting".to_string()]
}

/// Render the command line for the single spawn-time log record (spec §4.A
/// "Observable side effects": "command, workspace, mode"), with any
/// embedded secret-shaped tokens in the prompt/args redacted first.
pub(crate) fn loggable_command_line(command: &AgentCommand) -> String {
    let joined = std::iter::once(command.program.as_str())
        .chain(command.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    SecretRedactor::new().redact_line(&joined).into_owned()
}

/// Successful terminal outcome of a supervised run (spec §4.A "Result").
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub used_pty: bool,
}

/// Failure outcome, carrying enough partial state for the caller to surface
/// a useful error without re-reading process state that no longer exists
/// (spec §4.A "Result", failure branch).
#[derive(Debug)]
pub struct SupervisorError {
    pub source: CoreError,
    pub partial_stdout: String,
    pub partial_stderr: String,
    pub exit_code: Option<i32>,
}

impl SupervisorError {
    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

pub type SupervisorResult = Result<ExecutionOutcome, SupervisorError>;

/// Signal sent on cancellation (component A listens for this and tears the
/// process group down the same way a hard timeout would).
pub type CancelSignal = tokio::sync::oneshot::Receiver<()>;

/// Spawn and supervise the Agent CLI, selecting pseudoterminal or pipe I/O
/// per `limits.use_pty` (spec §4.A step 1).
///
/// `used_pty` in the outcome always reflects the mode actually used, which
/// may differ from a `PtyMode::Auto` request if pseudoterminal allocation
/// failed and the supervisor fell back to pipes.
pub async fn supervise(
    command: AgentCommand,
    limits: SupervisorLimits,
    cancel: CancelSignal,
) -> SupervisorResult {
    let want_pty = match limits.use_pty {
        PtyMode::ForceOff => false,
        PtyMode::ForceOn => true,
        PtyMode::Auto => true,
    };

    if !want_pty {
        return run_piped(command, limits, cancel).await;
    }

    match pty::try_open(&command) {
        Ok(session) => run_pty(session, command, limits, cancel).await,
        Err(_) if limits.use_pty == PtyMode::ForceOn => {
            run_pty_forced_error(&command).await
        }
        Err(_) => run_piped(command, limits, cancel).await,
    }
}

async fn run_pty_forced_error(command: &AgentCommand) -> SupervisorResult {
    Err(SupervisorError {
        source: CoreError::SpawnFailed(format!(
            "failed to allocate pseudoterminal for {}",
            command.program
        )),
        partial_stdout: String::new(),
        partial_stderr: String::new(),
        exit_code: None,
    })
}
