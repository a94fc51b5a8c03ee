//! `POST /api/agent/new`, `POST /api/agent/:id/message`, `GET
//! /api/agent/:id`, `GET /api/agent/list` (spec §6).

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use cursor_runner_core::conversation::{ConversationRecord, ListFilter, Message, SortField, SortOrder};
use cursor_runner_core::ids::generate_message_id;
use cursor_runner_core::{CoreError, Result as CoreResult};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NewConversationRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub success: bool,
    pub conversation_id: String,
    pub message: String,
}

pub async fn new_conversation(
    State(state): State<AppState>,
    Json(request): Json<NewConversationRequest>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let record = state.conversations.create(request.agent_id, request.metadata, "api").await?;
    Ok(Json(ConversationResponse {
        success: true,
        conversation_id: record.conversation_id,
        message: "conversation created".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendMessageRequest {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl AppendMessageRequest {
    fn validate(&self) -> CoreResult<()> {
        if !matches!(self.role.as_str(), "user" | "assistant" | "system") {
            return Err(CoreError::InvalidArgument("role must be one of user, assistant, system".into()));
        }
        if self.content.trim().is_empty() {
            return Err(CoreError::InvalidArgument("content is required".into()));
        }
        Ok(())
    }
}

pub async fn append_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<AppendMessageRequest>,
) -> Result<Json<ConversationResponse>, ApiError> {
    request.validate()?;
    let message = Message {
        message_id: generate_message_id(),
        role: request.role,
        content: request.content,
        source: request.source,
        created_at: Utc::now(),
    };
    state.conversations.append(&conversation_id, message).await?;
    Ok(Json(ConversationResponse {
        success: true,
        conversation_id,
        message: "message appended".to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConversationResponse {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<ConversationRecord> for GetConversationResponse {
    fn from(record: ConversationRecord) -> Self {
        Self {
            conversation_id: record.conversation_id,
            messages: record.messages,
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
            agent_id: record.agent_id,
            metadata: record.metadata,
        }
    }
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<GetConversationResponse>, ApiError> {
    match state.conversations.get(&conversation_id).await? {
        Some(record) => Ok(Json(record.into())),
        None => Err(CoreError::NotFound(format!("conversation {conversation_id}")).into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct ListConversationsResponse {
    pub conversations: Vec<ConversationRecord>,
    pub pagination: Pagination,
}

/// Validation follows spec §8 "Boundary behaviours": bad pagination
/// parameters always produce the same 400 with the same message.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListConversationsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(20);
    if limit <= 0 {
        return Err(CoreError::InvalidArgument("limit must be a positive integer".into()).into());
    }
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(CoreError::InvalidArgument("offset must be a non-negative integer".into()).into());
    }
    let sort_by = match query.sort_by.as_deref().unwrap_or("createdAt") {
        "createdAt" => SortField::CreatedAt,
        "lastAccessedAt" => SortField::LastAccessedAt,
        "messageCount" => SortField::MessageCount,
        _ => return Err(CoreError::InvalidArgument("sortBy must be one of createdAt, lastAccessedAt, messageCount".into()).into()),
    };
    let sort_order = match query.sort_order.as_deref().unwrap_or("desc") {
        "asc" => SortOrder::Asc,
        "desc" => SortOrder::Desc,
        _ => return Err(CoreError::InvalidArgument("sortOrder must be one of asc, desc".into()).into()),
    };

    let filter = ListFilter { limit: limit as usize, offset: offset as usize, sort_by, sort_order };
    let result = state.conversations.list(filter).await?;
    Ok(Json(ListConversationsResponse {
        conversations: result.items,
        pagination: Pagination { total: result.total, limit: limit as usize, offset: offset as usize },
    }))
}
