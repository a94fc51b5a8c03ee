//! Wire-level request/result types shared by the Review Loop and the Async
//! Execution Facade (spec §3 "ExecutionRequest", §6 HTTP surface).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ids::generate_request_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    Default,
    Api,
    Telegram,
}

impl Default for QueueType {
    fn default() -> Self {
        QueueType::Default
    }
}

/// Caller-submitted request (spec §3). Immutable once constructed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub queue_type: Option<QueueType>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl ExecutionRequest {
    /// Invariant: prompt is non-empty (spec §3).
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::InvalidArgument("prompt is required".into()));
        }
        Ok(())
    }

    /// Resolve (or generate) the request identifier, and derive the queue
    /// type: a `telegram-` prefix on the identifier forces `Telegram`
    /// regardless of an explicit `queueType` (spec §6 "Request identifier
    /// convention").
    pub fn resolve_id_and_queue(&self) -> (String, QueueType) {
        let id = self.id.clone().unwrap_or_else(generate_request_id);
        let queue_type = if id.starts_with("telegram-") {
            QueueType::Telegram
        } else {
            self.queue_type.unwrap_or_default()
        };
        (id, queue_type)
    }

    /// Same resolution as [`Self::resolve_id_and_queue`], but also writes
    /// the resolved id back onto `self.id` so a caller that needs the id
    /// before validation (to attach it to an error response) and a callee
    /// that resolves it again later see the same value instead of two
    /// independently generated ones.
    pub fn ensure_id(&mut self) -> (String, QueueType) {
        let (id, queue_type) = self.resolve_id_and_queue();
        self.id = Some(id.clone());
        (id, queue_type)
    }
}

/// Result of one `execute`/`execute_async` run (spec §3, §4.E "DECIDE",
/// §6 response bodies).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_justification: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub touched_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt_is_invalid() {
        let request = ExecutionRequest {
            id: None,
            prompt: "   ".into(),
            repository: None,
            branch_name: None,
            conversation_id: None,
            queue_type: None,
            callback_url: None,
            timeout_ms: None,
            max_iterations: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn telegram_prefixed_id_forces_telegram_queue() {
        let request = ExecutionRequest {
            id: Some("telegram-42".into()),
            prompt: "hi".into(),
            repository: None,
            branch_name: None,
            conversation_id: None,
            queue_type: Some(QueueType::Api),
            callback_url: None,
            timeout_ms: None,
            max_iterations: None,
        };
        let (id, queue) = request.resolve_id_and_queue();
        assert_eq!(id, "telegram-42");
        assert_eq!(queue, QueueType::Telegram);
    }

    #[test]
    fn missing_id_is_generated_with_req_prefix() {
        let request = ExecutionRequest {
            id: None,
            prompt: "hi".into(),
            repository: None,
            branch_name: None,
            conversation_id: None,
            queue_type: None,
            callback_url: None,
            timeout_ms: None,
            max_iterations: None,
        };
        let (id, queue) = request.resolve_id_and_queue();
        assert!(id.starts_with("req-"));
        assert_eq!(queue, QueueType::Default);
    }
}
