//! Async Execution Facade acceptance tests (spec §4.G, §8 invariant 1 and
//! invariant 4).

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cursor_runner_core::agent_cli::AgentCliOptions;
use cursor_runner_core::callback::CallbackDispatcher;
use cursor_runner_core::cancel::CancelToken;
use cursor_runner_core::config::{PtyMode, SupervisorSettings};
use cursor_runner_core::conversation::{ConversationStore, InMemoryBackend};
use cursor_runner_core::facade::AsyncExecutionFacade;
use cursor_runner_core::request::ExecutionRequest;
use cursor_runner_core::semaphore::AdmissionSemaphore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn fake_cli(dir: &std::path::Path, script: &str) -> String {
    let path = dir.join("agent");
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

fn facade(cli_path: String, workspace_root: PathBuf, max_concurrent: usize) -> AsyncExecutionFacade {
    let settings = SupervisorSettings {
        cursor_cli_path: cli_path,
        cursor_cli_use_pty: PtyMode::ForceOff,
        cursor_cli_max_concurrent: max_concurrent,
        ..SupervisorSettings::default()
    };
    let semaphore = Arc::new(AdmissionSemaphore::new(max_concurrent));
    let conversations = Arc::new(ConversationStore::new(Arc::new(InMemoryBackend::new(Duration::from_secs(3600)))));
    let dispatcher = Arc::new(CallbackDispatcher::new(None, Vec::new()));
    AsyncExecutionFacade::new(semaphore, conversations, dispatcher, settings, AgentCliOptions::default(), workspace_root)
}

fn request(prompt: &str, callback_url: Option<String>) -> ExecutionRequest {
    serde_json::from_value(serde_json::json!({
        "prompt": prompt,
        "callbackUrl": callback_url,
    }))
    .unwrap()
}

/// Minimal one-shot HTTP server: accepts a single connection, reads the
/// request, and responds `200 OK`. Returns the request body once received.
async fn accept_one_post(listener: TcpListener) -> String {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = vec![0u8; 65536];
    let mut total = Vec::new();
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        total.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&total);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let headers = &text[..header_end];
            let content_length: usize = headers
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if total.len() >= header_end + 4 + content_length {
                break;
            }
        }
        if n == 0 {
            break;
        }
    }
    socket.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await.unwrap();
    let text = String::from_utf8_lossy(&total).to_string();
    text.split("\r\n\r\n").nth(1).unwrap_or("").to_string()
}

#[tokio::test]
async fn async_execute_without_callback_url_is_rejected_before_any_work_starts() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(dir.path(), "echo done");
    let facade = facade(script, dir.path().to_path_buf(), 5);
    let cancel = CancelToken::new();

    let err = facade.execute_async(request("do something", None), false, cancel).unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");
}

#[tokio::test]
async fn async_execute_acknowledges_immediately_and_delivers_result_via_callback() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(dir.path(), "echo created: src/main.rs");
    let facade = facade(script, dir.path().to_path_buf(), 5);
    let cancel = CancelToken::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(accept_one_post(listener));

    let callback_url = format!("http://{addr}/webhook");
    let ack = facade.execute_async(request("build it", Some(callback_url)), false, cancel).unwrap();
    assert!(ack.success);
    assert!(!ack.request_id.is_empty());

    let body = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(payload["requestId"], ack.request_id);
    assert!(payload["output"].as_str().unwrap().contains("created: src/main.rs"));
    assert_eq!(payload["iterations"], 1);
}

#[tokio::test]
async fn missing_repository_workspace_is_not_found_with_path_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(dir.path(), "echo done");
    let facade = facade(script, dir.path().to_path_buf(), 5);
    let cancel = CancelToken::new();

    let request: ExecutionRequest = serde_json::from_value(serde_json::json!({
        "prompt": "do something",
        "repository": "does-not-exist",
    }))
    .unwrap();

    let result = facade.execute(request, false, cancel).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("NotFound"));
    assert!(result.error.unwrap().contains("does-not-exist"));
    // No round ever ran, so the reported iteration count is 0.
    assert_eq!(result.iterations, 0);
}

#[tokio::test]
async fn concurrent_runs_never_exceed_the_admission_semaphore_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let script = fake_cli(dir.path(), "sleep 0.2\necho done");
    let facade = Arc::new(facade(script, dir.path().to_path_buf(), 2));

    // 2 slots, 5 concurrent synchronous runs: the semaphore must admit no
    // more than 2 at once (spec §8 invariant 1, §4.B policy), and every run
    // must still complete successfully once admitted.
    let mut handles = Vec::new();
    for i in 0..5 {
        let facade = Arc::clone(&facade);
        handles.push(tokio::spawn(async move {
            facade.execute(request(&format!("task-{i}"), None), false, CancelToken::new()).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
    }
}
