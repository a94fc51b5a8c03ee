//! Review Loop acceptance tests driving real subprocesses as the Agent CLI
//! stand-in (spec §8 "Concrete scenarios" 1, 2, 5, 6).

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use cursor_runner_core::agent_cli::AgentCliOptions;
use cursor_runner_core::cancel::CancelToken;
use cursor_runner_core::config::{PtyMode, SupervisorSettings};
use cursor_runner_core::conversation::{ConversationStore, InMemoryBackend};
use cursor_runner_core::review_loop::{LoopParams, ReviewLoop};

/// Writes an executable shell script standing in for the Agent CLI and
/// returns its path. `$2` carries the prompt (argv: `--print <prompt>
/// --force`), so the script can branch on whether it's being invoked as the
/// main pass or the review pass.
fn fake_cli(dir: &std::path::Path, name: &str, script: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

fn settings_with_cli(path: String) -> SupervisorSettings {
    // Force pipe I/O for determinism in these tests; the review pass is
    // always pipe-only regardless (spec §4.E), and forcing it here too
    // avoids environment-dependent pseudoterminal allocation.
    SupervisorSettings { cursor_cli_path: path, cursor_cli_use_pty: PtyMode::ForceOff, ..SupervisorSettings::default() }
}

fn params(conversation_id: &str, workspace: &std::path::Path) -> LoopParams {
    LoopParams {
        conversation_id: conversation_id.to_string(),
        prompt: "create user service".to_string(),
        workspace: workspace.to_path_buf(),
        env: Vec::new(),
        tools: Vec::new(),
        hard_timeout: Duration::from_secs(5),
        max_iterations: 5,
    }
}

fn store() -> Arc<ConversationStore> {
    Arc::new(ConversationStore::new(Arc::new(InMemoryBackend::new(Duration::from_secs(3600)))))
}

/// Scenario 1: happy path, single iteration. The main pass emits a
/// touched-file line and exits 0; the review pass reports completion.
#[tokio::test]
async fn happy_path_single_iteration_reports_touched_files() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(
        dir.path(),
        "agent",
        r#"case "$2" in
  *"Review the output"*) echo '{"code_complete": true, "break_iteration": false}' ;;
  *) echo "created: src/user.ts" ;;
esac"#,
    );

    let conversations = store();
    let created = conversations.create(None, None, "api").await.unwrap();
    let review_loop = ReviewLoop::new(Arc::clone(&conversations), settings_with_cli(script), AgentCliOptions::default());
    let cancel = CancelToken::new();

    let outcome = review_loop.run_iterative(params(&created.conversation_id, dir.path()), &cancel).await;

    assert!(outcome.success);
    assert!(outcome.output.contains("created: src/user.ts"));
    assert_eq!(outcome.touched_files, vec!["src/user.ts".to_string()]);
    assert_eq!(outcome.iterations, 1);
}

/// Scenario 5: review circuit breaker. `break_iteration` wins over a later
/// `code_complete`, and the loop halts at iteration 0 with the original
/// output preserved.
#[tokio::test]
async fn review_circuit_breaker_halts_with_original_output_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(
        dir.path(),
        "agent",
        r#"case "$2" in
  *"Review the output"*) echo '{"code_complete": false, "break_iteration": true, "justification": "Workspace Trust Required"}' ;;
  *) echo "Workspace Trust Required" ;;
esac"#,
    );

    let conversations = store();
    let created = conversations.create(None, None, "api").await.unwrap();
    let review_loop = ReviewLoop::new(Arc::clone(&conversations), settings_with_cli(script), AgentCliOptions::default());
    let cancel = CancelToken::new();

    let outcome = review_loop.run_iterative(params(&created.conversation_id, dir.path()), &cancel).await;

    assert!(!outcome.success);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.review_justification.as_deref(), Some("Workspace Trust Required"));
    assert_eq!(outcome.original_output.as_deref(), Some("Workspace Trust Required\n"));
    assert_eq!(outcome.error.unwrap().kind(), "ReviewBreak");
}

/// Scenario 6: review parse failure preserves the main pass's output and
/// surfaces the parse error distinctly rather than masking useful work.
#[tokio::test]
async fn review_parse_failure_preserves_main_output() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(
        dir.path(),
        "agent",
        r#"case "$2" in
  *"Review the output"*) echo "Invalid JSON response" ;;
  *) echo "Generated code" ;;
esac"#,
    );

    let conversations = store();
    let created = conversations.create(None, None, "api").await.unwrap();
    let review_loop = ReviewLoop::new(Arc::clone(&conversations), settings_with_cli(script), AgentCliOptions::default());
    let cancel = CancelToken::new();

    let outcome = review_loop.run_iterative(params(&created.conversation_id, dir.path()), &cancel).await;

    assert!(!outcome.success);
    assert!(outcome.output.contains("Generated code"));
    assert_eq!(outcome.error.unwrap().kind(), "ReviewParseFailed");
}

/// Scenario 2: idle-timeout silence before the first byte is never a
/// failure — only arming after the first byte matters here, not the hard
/// timeout, so the main pass must still complete successfully.
#[tokio::test]
async fn idle_silence_before_first_byte_is_not_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(dir.path(), "agent", "sleep 0.3\necho done");

    let mut settings = settings_with_cli(script);
    settings.cursor_cli_idle_timeout_ms = 100;

    let conversations = store();
    let created = conversations.create(None, None, "api").await.unwrap();
    let review_loop = ReviewLoop::new(Arc::clone(&conversations), settings, AgentCliOptions::default());
    let cancel = CancelToken::new();

    let outcome = review_loop.run_single(params(&created.conversation_id, dir.path()), &cancel).await;

    assert!(outcome.success);
    assert!(outcome.output.contains("done"));
}

/// A hard timeout, idle timeout, or overflow on the main pass must surface
/// immediately without ever attempting the review pass (spec §4.E
/// "Tie-breaks & edge cases").
#[tokio::test]
async fn main_pass_hard_timeout_skips_review_pass_entirely() {
    let dir = tempfile::tempdir().unwrap();
    // If the review pass ran, it would produce a marker file; its absence
    // proves PARSE_REVIEW was never reached.
    let marker = dir.path().join("review-ran");
    let script = fake_cli(
        dir.path(),
        "agent",
        &format!(
            r#"case "$2" in
  *"Review the output"*) touch '{}'; echo '{{"code_complete": true}}' ;;
  *) sleep 5 ;;
esac"#,
            marker.display()
        ),
    );

    let mut settings = settings_with_cli(script);
    settings.cursor_cli_timeout_ms = 100;

    let conversations = store();
    let created = conversations.create(None, None, "api").await.unwrap();
    let review_loop = ReviewLoop::new(Arc::clone(&conversations), settings, AgentCliOptions::default());
    let cancel = CancelToken::new();

    let mut p = params(&created.conversation_id, dir.path());
    p.hard_timeout = Duration::from_millis(100);
    let outcome = review_loop.run_iterative(p, &cancel).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind(), "HardTimeout");
    assert!(!marker.exists(), "review pass must not run after a main-pass hard timeout");
}
