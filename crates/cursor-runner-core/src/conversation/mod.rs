//! Conversation Store (spec §4.D): persists [`ConversationRecord`]s by
//! identifier, serializes per-identifier writes, and refreshes TTL on
//! every touch.
//!
//! **[EXPANSION]** The backing store is a trait,
//! [`ConversationBackend`], with two implementations — [`InMemoryBackend`]
//! (the always-available default) and [`RedisBackend`] (for parity with
//! the `redis_url` / `redis_key_prefix` configuration keys). See the crate
//! top-level documentation in `lib.rs` for the fallback policy.

pub mod memory;
pub mod redis_backend;

pub use memory::InMemoryBackend;
pub use redis_backend::RedisBackend;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A single message in a conversation's ordered history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persisted conversation state (spec §3, §4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// On-the-wire shape tolerant of a legacy `id` field in place of
/// `conversationId` (spec §4.D "Legacy read tolerance").
#[derive(Debug, Deserialize)]
struct RawConversationRecord {
    #[serde(rename = "conversationId", default)]
    conversation_id: Option<String>,
    #[serde(rename = "id", default)]
    legacy_id: Option<String>,
    #[serde(rename = "agentId", default)]
    agent_id: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "lastAccessedAt")]
    last_accessed_at: DateTime<Utc>,
}

/// Deserialize a persisted blob, reconstructing `conversation_id` from a
/// legacy `id` field when the current field is absent.
pub fn deserialize_record(blob: &str) -> Result<ConversationRecord> {
    let raw: RawConversationRecord =
        serde_json::from_str(blob).map_err(|e| CoreError::Internal(format!("corrupt conversation record: {e}")))?;
    let conversation_id = raw
        .conversation_id
        .or(raw.legacy_id)
        .ok_or_else(|| CoreError::Internal("conversation record missing identifier".into()))?;
    Ok(ConversationRecord {
        conversation_id,
        agent_id: raw.agent_id,
        metadata: raw.metadata,
        messages: raw.messages,
        created_at: raw.created_at,
        last_accessed_at: raw.last_accessed_at,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    LastAccessedAt,
    MessageCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Pagination and sort parameters for [`ConversationBackend::list`].
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub limit: usize,
    pub offset: usize,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl ListFilter {
    fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(CoreError::InvalidArgument("limit must be a positive integer".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub items: Vec<ConversationRecord>,
    pub total: usize,
}

/// Pluggable conversation persistence backend (spec §4.D).
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn create(
        &self,
        agent_id: Option<String>,
        metadata: Option<serde_json::Value>,
        queue_type: &str,
    ) -> Result<ConversationRecord>;

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>>;

    async fn append(&self, id: &str, message: Message) -> Result<()>;

    async fn list(&self, filter: &ListFilter) -> Result<ListResult>;

    async fn update_last_accessed(&self, id: &str) -> Result<()>;
}

/// Thin, backend-agnostic facade used by the rest of the crate.
pub struct ConversationStore {
    backend: Arc<dyn ConversationBackend>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn ConversationBackend>) -> Self {
        Self { backend }
    }

    pub async fn create(
        &self,
        agent_id: Option<String>,
        metadata: Option<serde_json::Value>,
        queue_type: &str,
    ) -> Result<ConversationRecord> {
        self.backend.create(agent_id, metadata, queue_type).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        self.backend.get(id).await
    }

    pub async fn append(&self, id: &str, message: Message) -> Result<()> {
        self.backend.append(id, message).await
    }

    pub async fn list(&self, filter: ListFilter) -> Result<ListResult> {
        filter.validate()?;
        self.backend.list(&filter).await
    }

    pub async fn update_last_accessed(&self, id: &str) -> Result<()> {
        self.backend.update_last_accessed(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_id_field_is_promoted_to_conversation_id() {
        let blob = r#"{
            "id": "agent-123-abc",
            "messages": [],
            "createdAt": "2026-01-01T00:00:00Z",
            "lastAccessedAt": "2026-01-01T00:00:00Z"
        }"#;
        let record = deserialize_record(blob).unwrap();
        assert_eq!(record.conversation_id, "agent-123-abc");
    }

    #[test]
    fn missing_identifier_is_an_error() {
        let blob = r#"{
            "messages": [],
            "createdAt": "2026-01-01T00:00:00Z",
            "lastAccessedAt": "2026-01-01T00:00:00Z"
        }"#;
        assert!(deserialize_record(blob).is_err());
    }

    #[test]
    fn list_filter_rejects_zero_limit() {
        let filter = ListFilter { limit: 0, offset: 0, sort_by: SortField::CreatedAt, sort_order: SortOrder::Asc };
        assert!(filter.validate().is_err());
    }
}
