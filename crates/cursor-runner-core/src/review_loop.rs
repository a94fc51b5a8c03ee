//! Review Loop (spec §4.E): drives round-N prompt → supervise → review →
//! decide. [`ReviewLoop::run_single`] runs one round with the review pass
//! disabled (the `/cursor/execute*` paths, spec §4.G); [`ReviewLoop::run_iterative`]
//! drives the full state machine (`/cursor/iterate/async`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::agent_cli::{build_main_args, AgentCliOptions};
use crate::cancel::CancelToken;
use crate::config::{PtyMode, SupervisorSettings};
use crate::conversation::{ConversationStore, Message};
use crate::error::CoreError;
use crate::ids::generate_message_id;
use crate::output_parser::{extract_review_envelope, extract_touched_files};
use crate::supervisor::{default_host_key_prompt_patterns, supervise, AgentCommand, SupervisorError, SupervisorLimits};

/// Fixed review prompt (spec §4.E "PARSE_REVIEW"). The main round's stdout
/// is appended verbatim after this preamble.
const REVIEW_PROMPT_PREAMBLE: &str = "Review the output below from the previous round. Respond with exactly one JSON object: {\"code_complete\": <bool>, \"break_iteration\": <bool>, \"justification\": <string, optional>}. Output to review follows:\n\n";

/// Inputs for one loop invocation (spec §3 "ExecutionContext", minus the
/// fields the Async Execution Facade owns directly).
pub struct LoopParams {
    pub conversation_id: String,
    pub prompt: String,
    pub workspace: PathBuf,
    pub env: Vec<(String, String)>,
    pub tools: Vec<String>,
    pub hard_timeout: std::time::Duration,
    pub max_iterations: u32,
}

/// Terminal outcome of driving the loop, success or failure (spec §4.E
/// "DECIDE").
pub struct LoopOutcome {
    pub success: bool,
    pub output: String,
    pub original_output: Option<String>,
    pub exit_code: Option<i32>,
    pub touched_files: Vec<String>,
    pub error: Option<CoreError>,
    pub reason: Option<&'static str>,
    pub review_justification: Option<String>,
    pub iterations: u32,
}

struct MainRoundOutcome {
    stdout: String,
    exit_code: i32,
    touched_files: Vec<String>,
}

enum ReviewOutcome {
    Envelope(crate::output_parser::ReviewEnvelope),
    Failed(CoreError),
}

pub struct ReviewLoop {
    conversations: Arc<ConversationStore>,
    settings: SupervisorSettings,
    cli_options: AgentCliOptions,
}

impl ReviewLoop {
    pub fn new(conversations: Arc<ConversationStore>, settings: SupervisorSettings, cli_options: AgentCliOptions) -> Self {
        Self { conversations, settings, cli_options }
    }

    /// Run one main round with the review pass disabled.
    pub async fn run_single(&self, params: LoopParams, cancel: &CancelToken) -> LoopOutcome {
        match self.run_main_round(&params, 0, cancel).await {
            Ok(outcome) => LoopOutcome {
                success: true,
                output: outcome.stdout,
                original_output: None,
                exit_code: Some(outcome.exit_code),
                touched_files: outcome.touched_files,
                error: None,
                reason: None,
                review_justification: None,
                iterations: 1,
            },
            Err(err) => main_round_failure(err, 1),
        }
    }

    /// Drive the full RUN_MAIN → PARSE_REVIEW → DECIDE state machine.
    pub async fn run_iterative(&self, params: LoopParams, cancel: &CancelToken) -> LoopOutcome {
        let mut iteration = 0u32;
        let mut touched_files: Vec<String> = Vec::new();

        loop {
            let main_outcome = match self.run_main_round(&params, iteration, cancel).await {
                Ok(outcome) => outcome,
                // Hard-timeout, idle-timeout, or overflow in the main pass
                // surfaces immediately; the review pass is never attempted
                // (spec §4.E "Tie-breaks & edge cases").
                Err(err) => return main_round_failure(err, iteration + 1),
            };
            extend_unique(&mut touched_files, main_outcome.touched_files.iter());

            match self.run_review_pass(&main_outcome.stdout, &params.workspace, &params.env, cancel).await {
                ReviewOutcome::Failed(err) => {
                    return LoopOutcome {
                        success: false,
                        output: main_outcome.stdout,
                        original_output: None,
                        exit_code: Some(main_outcome.exit_code),
                        touched_files,
                        error: Some(err),
                        reason: None,
                        review_justification: None,
                        iterations: iteration + 1,
                    };
                }
                ReviewOutcome::Envelope(envelope) => {
                    // `break_iteration` is authoritative over `code_complete`
                    // when both are true (spec §4.E "Tie-breaks").
                    if envelope.break_iteration {
                        return LoopOutcome {
                            success: false,
                            output: main_outcome.stdout.clone(),
                            original_output: Some(main_outcome.stdout),
                            exit_code: Some(main_outcome.exit_code),
                            touched_files,
                            error: Some(CoreError::ReviewBreak {
                                justification: envelope.justification.clone().unwrap_or_default(),
                            }),
                            reason: None,
                            review_justification: envelope.justification,
                            iterations: iteration + 1,
                        };
                    }
                    if envelope.code_complete {
                        return LoopOutcome {
                            success: true,
                            output: main_outcome.stdout,
                            original_output: None,
                            exit_code: Some(main_outcome.exit_code),
                            touched_files,
                            error: None,
                            reason: None,
                            review_justification: envelope.justification,
                            iterations: iteration + 1,
                        };
                    }
                    if iteration + 1 < params.max_iterations {
                        iteration += 1;
                        info!(iteration, "review pass requested another round");
                        continue;
                    }
                    return LoopOutcome {
                        success: false,
                        output: main_outcome.stdout,
                        original_output: None,
                        exit_code: Some(main_outcome.exit_code),
                        touched_files,
                        error: Some(CoreError::MaxIterationsReached { max_iterations: params.max_iterations }),
                        reason: Some("MaxIterationsReached"),
                        review_justification: None,
                        iterations: iteration + 1,
                    };
                }
            }
        }
    }

    async fn run_main_round(
        &self,
        params: &LoopParams,
        iteration: u32,
        cancel: &CancelToken,
    ) -> Result<MainRoundOutcome, SupervisorError> {
        let args = build_main_args(&self.cli_options, iteration, &params.conversation_id, &params.prompt, &params.tools);
        let command = AgentCommand {
            program: self.settings.cursor_cli_path.clone(),
            args,
            env: params.env.clone(),
            cwd: params.workspace.clone(),
        };
        let limits = SupervisorLimits {
            hard_timeout: params.hard_timeout,
            idle_timeout: self.settings.idle_timeout(),
            max_output_bytes: self.settings.cursor_cli_max_output_size,
            use_pty: self.settings.cursor_cli_use_pty,
            host_key_prompt_patterns: default_host_key_prompt_patterns(),
        };

        let outcome = supervise(command, limits, cancel.child_receiver()).await?;
        let touched_files = extract_touched_files(&outcome.stdout);

        let message = Message {
            message_id: generate_message_id(),
            role: "assistant".to_string(),
            content: outcome.stdout.clone(),
            source: Some("agent-cli".to_string()),
            created_at: Utc::now(),
        };
        if let Err(err) = self.conversations.append(&params.conversation_id, message).await {
            // §4.D: a store outage degrades the caller gracefully rather
            // than aborting the round that already produced useful output.
            warn!(
                conversation_id = %params.conversation_id,
                error = %err,
                "failed to append assistant message, continuing without persistence"
            );
        }

        Ok(MainRoundOutcome { stdout: outcome.stdout, exit_code: outcome.exit_code, touched_files })
    }

    /// The review pass is always pipe-only, regardless of the main pass's
    /// pty mode, so terminal-control bytes never contaminate the envelope
    /// (spec §4.E "Tie-breaks & edge cases").
    async fn run_review_pass(
        &self,
        main_stdout: &str,
        workspace: &Path,
        env: &[(String, String)],
        cancel: &CancelToken,
    ) -> ReviewOutcome {
        let prompt = format!("{REVIEW_PROMPT_PREAMBLE}{main_stdout}");
        let command = AgentCommand {
            program: self.settings.cursor_cli_path.clone(),
            args: vec!["--print".to_string(), prompt, "--force".to_string()],
            env: env.to_vec(),
            cwd: workspace.to_path_buf(),
        };
        let limits = SupervisorLimits {
            hard_timeout: self.settings.hard_timeout(),
            idle_timeout: self.settings.idle_timeout(),
            max_output_bytes: self.settings.cursor_cli_max_output_size,
            use_pty: PtyMode::ForceOff,
            host_key_prompt_patterns: Vec::new(),
        };

        match supervise(command, limits, cancel.child_receiver()).await {
            Ok(outcome) => match extract_review_envelope(&outcome.stdout) {
                Some(envelope) => ReviewOutcome::Envelope(envelope),
                None => ReviewOutcome::Failed(CoreError::ReviewParseFailed(
                    "review pass produced no valid envelope".to_string(),
                )),
            },
            Err(err) => ReviewOutcome::Failed(err.source),
        }
    }
}

fn main_round_failure(err: SupervisorError, iterations: u32) -> LoopOutcome {
    let touched_files = extract_touched_files(&err.partial_stdout);
    LoopOutcome {
        success: false,
        output: err.partial_stdout.clone(),
        original_output: None,
        exit_code: err.exit_code,
        touched_files,
        error: Some(err.source),
        reason: None,
        review_justification: None,
        iterations,
    }
}

fn extend_unique<'a>(target: &mut Vec<String>, items: impl Iterator<Item = &'a String>) {
    let mut seen: HashSet<&str> = target.iter().map(String::as_str).collect();
    for item in items {
        if seen.insert(item.as_str()) {
            target.push(item.clone());
        }
    }
}
