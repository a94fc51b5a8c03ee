//! Async Execution Facade (spec §4.G): accept a request, either run the
//! loop to completion synchronously or ACK immediately and run it in the
//! background, delivering the result through the Callback Dispatcher.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

use crate::agent_cli::AgentCliOptions;
use crate::callback::CallbackDispatcher;
use crate::cancel::CancelToken;
use crate::config::SupervisorSettings;
use crate::conversation::ConversationStore;
use crate::error::{CoreError, Result};
use crate::ids::generate_conversation_id;
use crate::request::{ExecutionRequest, ExecutionResult};
use crate::review_loop::{LoopParams, ReviewLoop};
use crate::semaphore::AdmissionSemaphore;

/// Immediate acknowledgment returned by `execute_async` (spec §6, the
/// `POST /cursor/execute/async` and `POST /cursor/iterate/async` response
/// bodies).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncAck {
    pub success: bool,
    pub message: String,
    pub request_id: String,
}

pub struct AsyncExecutionFacade {
    semaphore: Arc<AdmissionSemaphore>,
    conversations: Arc<ConversationStore>,
    dispatcher: Arc<CallbackDispatcher>,
    settings: SupervisorSettings,
    cli_options: AgentCliOptions,
    workspace_root: PathBuf,
}

impl AsyncExecutionFacade {
    pub fn new(
        semaphore: Arc<AdmissionSemaphore>,
        conversations: Arc<ConversationStore>,
        dispatcher: Arc<CallbackDispatcher>,
        settings: SupervisorSettings,
        cli_options: AgentCliOptions,
        workspace_root: PathBuf,
    ) -> Self {
        Self { semaphore, conversations, dispatcher, settings, cli_options, workspace_root }
    }

    /// Run the loop to completion on the caller's task and return the
    /// result directly.
    pub async fn execute(&self, request: ExecutionRequest, iterate: bool, cancel: CancelToken) -> Result<ExecutionResult> {
        request.validate()?;
        Ok(self.run_to_completion(request, iterate, cancel).await)
    }

    /// Validate inputs, ACK immediately with `{ request_id }`, then run the
    /// loop on an independent task and hand the result to the Callback
    /// Dispatcher on completion. A missing `callbackUrl` is rejected before
    /// the ACK; any failure discovered afterward (e.g. an invalid
    /// repository) is delivered via callback, not via HTTP status (spec
    /// §4.G).
    pub fn execute_async(&self, request: ExecutionRequest, iterate: bool, cancel: CancelToken) -> Result<AsyncAck> {
        request.validate()?;
        let Some(callback_url) = request.callback_url.clone() else {
            return Err(CoreError::InvalidArgument("callbackUrl is required for async execution".into()));
        };

        let (request_id, _) = request.resolve_id_and_queue();
        let ack = AsyncAck {
            success: true,
            message: "execution accepted".to_string(),
            request_id: request_id.clone(),
        };

        let semaphore = Arc::clone(&self.semaphore);
        let conversations = Arc::clone(&self.conversations);
        let dispatcher = Arc::clone(&self.dispatcher);
        let settings = self.settings.clone();
        let cli_options = self.cli_options.clone();
        let workspace_root = self.workspace_root.clone();

        tokio::spawn(async move {
            let facade = AsyncExecutionFacade {
                semaphore,
                conversations,
                dispatcher: Arc::clone(&dispatcher),
                settings,
                cli_options,
                workspace_root,
            };
            let result = facade.run_to_completion(request, iterate, cancel).await;
            let payload = match serde_json::to_value(&result) {
                Ok(value) => value,
                Err(err) => {
                    error!(request_id = %request_id, error = %err, "failed to serialize execution result for callback");
                    return;
                }
            };
            dispatcher.deliver(&callback_url, &request_id, &payload).await;
        });

        Ok(ack)
    }

    async fn run_to_completion(&self, request: ExecutionRequest, iterate: bool, cancel: CancelToken) -> ExecutionResult {
        let started_at = Instant::now();
        let (request_id, queue_type) = request.resolve_id_and_queue();

        // Semaphore acquisition is the first blocking operation and release
        // is the last terminating action of the run (spec §5 "Locking
        // discipline").
        let ticket = match self.semaphore.acquire(cancel.child_receiver()).await {
            Ok(ticket) => ticket,
            Err(err) => return self.error_result(&request, &request_id, started_at, err),
        };

        let result = self.run_admitted(&request, &request_id, &queue_type, iterate, started_at, &cancel).await;
        self.semaphore.release(ticket);
        result
    }

    async fn run_admitted(
        &self,
        request: &ExecutionRequest,
        request_id: &str,
        queue_type: &crate::request::QueueType,
        iterate: bool,
        started_at: Instant,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let queue_type_str = match queue_type {
            crate::request::QueueType::Default => "default",
            crate::request::QueueType::Api => "api",
            crate::request::QueueType::Telegram => "telegram",
        };

        let conversation_id = match self.resolve_conversation_id(request, queue_type_str).await {
            Ok(id) => id,
            Err(err) => return self.error_result(request, request_id, started_at, err),
        };

        let workspace = match &request.repository {
            Some(repository) => self.workspace_root.join(repository),
            None => self.workspace_root.clone(),
        };
        if !workspace.is_dir() {
            let err = CoreError::NotFound(format!("repository workspace not found: {}", workspace.display()));
            return self.error_result(request, request_id, started_at, err);
        }

        let params = LoopParams {
            conversation_id: conversation_id.clone(),
            prompt: request.prompt.clone(),
            workspace,
            env: Vec::new(),
            tools: Vec::new(),
            hard_timeout: self.settings.clamp_hard_timeout(request.timeout_ms),
            max_iterations: self.settings.clamp_max_iterations(request.max_iterations),
        };

        let review_loop = ReviewLoop::new(Arc::clone(&self.conversations), self.settings.clone(), self.cli_options.clone());
        let outcome = if iterate {
            review_loop.run_iterative(params, cancel).await
        } else {
            review_loop.run_single(params, cancel).await
        };

        ExecutionResult {
            success: outcome.success,
            request_id: request_id.to_string(),
            repository: request.repository.clone(),
            branch_name: request.branch_name.clone(),
            conversation_id: Some(conversation_id),
            output: outcome.output,
            original_output: outcome.original_output,
            exit_code: outcome.exit_code,
            duration_ms: started_at.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            iterations: outcome.iterations,
            error: outcome.error.as_ref().map(|e| e.to_string()),
            error_kind: outcome.error.as_ref().map(|e| e.kind().to_string()),
            reason: outcome.reason.map(str::to_string),
            review_justification: outcome.review_justification,
            touched_files: outcome.touched_files,
        }
    }

    /// Resolve the conversation to use for this run: reuse the
    /// caller-supplied identifier if present, otherwise create one. A
    /// `StoreUnavailable` failure degrades to a transient, unpersisted
    /// identifier rather than aborting the request (spec §4.D
    /// "Durability").
    async fn resolve_conversation_id(&self, request: &ExecutionRequest, queue_type: &str) -> Result<String> {
        if let Some(id) = &request.conversation_id {
            return match self.conversations.get(id).await {
                Ok(Some(_)) => Ok(id.clone()),
                Ok(None) => Err(CoreError::NotFound(format!("conversation {id}"))),
                Err(CoreError::StoreUnavailable(_)) => Ok(id.clone()),
                Err(err) => Err(err),
            };
        }

        match self.conversations.create(None, None, queue_type).await {
            Ok(record) => Ok(record.conversation_id),
            Err(CoreError::StoreUnavailable(reason)) => {
                warn!(reason, "conversation store unavailable, degrading to a transient conversation id");
                Ok(generate_conversation_id())
            }
            Err(err) => Err(err),
        }
    }

    fn error_result(&self, request: &ExecutionRequest, request_id: &str, started_at: Instant, err: CoreError) -> ExecutionResult {
        ExecutionResult {
            success: false,
            request_id: request_id.to_string(),
            repository: request.repository.clone(),
            branch_name: request.branch_name.clone(),
            conversation_id: request.conversation_id.clone(),
            output: String::new(),
            original_output: None,
            exit_code: None,
            duration_ms: started_at.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            iterations: 0,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            reason: None,
            review_justification: None,
            touched_files: Vec::new(),
        }
    }
}
