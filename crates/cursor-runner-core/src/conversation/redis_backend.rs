//! `RedisBackend` (spec §4.D **[EXPANSION]**, §6 persisted-state layout):
//! present for parity with the `redis_url` / `redis_key_prefix`
//! configuration keys. When `redis_url` is unset the server constructs an
//! [`super::InMemoryBackend`] instead; see `crate::config`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex as AsyncMutex;

use super::{deserialize_record, ConversationBackend, ConversationRecord, ListFilter, ListResult, Message, SortField, SortOrder};
use crate::error::{CoreError, Result};
use crate::ids::generate_conversation_id;

/// Conversation store backed by Redis, using the key layout from spec.md
/// §6: `<prefix>agent:conversation:<id>`, `<prefix>agent:conversations:list`
/// (a set of ids), and `<prefix><queue>:last_conversation_id`.
pub struct RedisBackend {
    manager: ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
    // `ConnectionManager` multiplexes connections and exposes no
    // WATCH/MULTI transaction, so the read-modify-write in `append` is
    // made atomic per identifier with an in-process lock instead (mirrors
    // `InMemoryBackend`'s `append_lock`). This only serializes appends
    // within this process; a multi-instance deployment still needs a
    // Redis-side transaction to be fully safe across processes.
    append_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str, key_prefix: String, ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoreError::StoreUnavailable(format!("invalid redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::StoreUnavailable(format!("redis connection failed: {e}")))?;
        Ok(Self { manager, key_prefix, ttl_seconds, append_locks: DashMap::new() })
    }

    fn append_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.append_locks.entry(id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).value())
    }

    fn conversation_key(&self, id: &str) -> String {
        format!("{}agent:conversation:{}", self.key_prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}agent:conversations:list", self.key_prefix)
    }

    fn last_conversation_key(&self, queue_type: &str) -> String {
        format!("{}{}:last_conversation_id", self.key_prefix, queue_type)
    }

    async fn write_record(&self, record: &ConversationRecord) -> Result<()> {
        let blob = serde_json::to_string(record)
            .map_err(|e| CoreError::Internal(format!("failed to serialize conversation record: {e}")))?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(self.conversation_key(&record.conversation_id), blob, self.ttl_seconds)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))
    }

    async fn read_record(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let mut conn = self.manager.clone();
        let blob: Option<String> = conn
            .get(self.conversation_key(id))
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        match blob {
            Some(blob) => Ok(Some(deserialize_record(&blob)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ConversationBackend for RedisBackend {
    async fn create(
        &self,
        agent_id: Option<String>,
        metadata: Option<serde_json::Value>,
        queue_type: &str,
    ) -> Result<ConversationRecord> {
        let id = generate_conversation_id();
        let now = Utc::now();
        let record = ConversationRecord {
            conversation_id: id.clone(),
            agent_id,
            metadata,
            messages: Vec::new(),
            created_at: now,
            last_accessed_at: now,
        };

        self.write_record(&record).await?;

        let mut conn = self.manager.clone();
        conn.sadd::<_, _, ()>(self.index_key(), &id)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        conn.set::<_, _, ()>(self.last_conversation_key(queue_type), &id)
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;

        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let Some(mut record) = self.read_record(id).await? else {
            return Ok(None);
        };
        record.last_accessed_at = Utc::now();
        self.write_record(&record).await?;
        Ok(Some(record))
    }

    async fn append(&self, id: &str, message: Message) -> Result<()> {
        let lock = self.append_lock(id);
        let _guard = lock.lock().await;

        let mut record = self
            .read_record(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("conversation {id}")))?;
        record.messages.push(message);
        record.last_accessed_at = Utc::now();
        self.write_record(&record).await
    }

    async fn list(&self, filter: &ListFilter) -> Result<ListResult> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn
            .smembers(self.index_key())
            .await
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;

        let mut items = Vec::new();
        for id in ids {
            if let Some(record) = self.read_record(&id).await? {
                items.push(record);
            }
        }

        items.sort_by(|a, b| {
            let ordering = match filter.sort_by {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::LastAccessedAt => a.last_accessed_at.cmp(&b.last_accessed_at),
                SortField::MessageCount => a.messages.len().cmp(&b.messages.len()),
            };
            match filter.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = items.len();
        let page = items.into_iter().skip(filter.offset).take(filter.limit).collect();
        Ok(ListResult { items: page, total })
    }

    async fn update_last_accessed(&self, id: &str) -> Result<()> {
        let mut record = self
            .read_record(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("conversation {id}")))?;
        record.last_accessed_at = Utc::now();
        self.write_record(&record).await
    }
}
