//! `InMemoryBackend` (spec §4.D **[EXPANSION]**): a `DashMap`-backed,
//! process-local TTL store. Always available; the default backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

use super::{ConversationBackend, ConversationRecord, ListFilter, ListResult, Message, SortField, SortOrder};
use crate::error::{CoreError, Result};
use crate::ids::generate_conversation_id;

struct Entry {
    record: ConversationRecord,
    expires_at: Instant,
    append_lock: Arc<AsyncMutex<()>>,
}

/// Process-local conversation store keyed by conversation id, with a
/// per-queue-type index set mirroring the persisted-state layout in
/// spec.md §6.
pub struct InMemoryBackend {
    entries: DashMap<String, Entry>,
    index_by_queue: DashMap<String, HashSet<String>>,
    ttl: Duration,
}

impl InMemoryBackend {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            index_by_queue: DashMap::new(),
            ttl,
        }
    }

    fn expired(entry: &Entry) -> bool {
        Instant::now() >= entry.expires_at
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl ConversationBackend for InMemoryBackend {
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

        self.entries.insert(
            id.clone(),
            Entry {
                record: record.clone(),
                expires_at: Instant::now() + self.ttl,
                append_lock: Arc::new(AsyncMutex::new(())),
            },
        );
        self.index_by_queue
            .entry(queue_type.to_string())
            .or_default()
            .insert(id);

        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let mut entry = match self.entries.get_mut(id) {
            Some(e) => e,
            None => return Ok(None),
        };
        if Self::expired(&entry) {
            drop(entry);
            self.entries.remove(id);
            return Ok(None);
        }
        entry.record.last_accessed_at = Utc::now();
        entry.expires_at = Instant::now() + self.ttl;
        Ok(Some(entry.record.clone()))
    }

    async fn append(&self, id: &str, message: Message) -> Result<()> {
        let lock = {
            let entry = self
                .entries
                .get(id)
                .ok_or_else(|| CoreError::NotFound(format!("conversation {id}")))?;
            Arc::clone(&entry.append_lock)
        };

        // Serializes concurrent appends to this identifier only; other
        // identifiers proceed uncontended (spec §4.D "Concurrency").
        let _guard = lock.lock().await;

        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("conversation {id}")))?;
        if Self::expired(&entry) {
            drop(entry);
            self.entries.remove(id);
            return Err(CoreError::NotFound(format!("conversation {id}")));
        }
        entry.record.messages.push(message);
        entry.record.last_accessed_at = Utc::now();
        entry.expires_at = Instant::now() + self.ttl;
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> Result<ListResult> {
        let mut items: Vec<ConversationRecord> = self
            .entries
            .iter()
            .filter(|e| !Self::expired(e.value()))
            .map(|e| e.value().record.clone())
            .collect();

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
        let mut entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| CoreError::NotFound(format!("conversation {id}")))?;
        entry.record.last_accessed_at = Utc::now();
        entry.expires_at = Instant::now() + self.ttl;
        Ok(())
    }
}
