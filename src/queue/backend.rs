//! Pluggable queue backing stores.
//!
//! `InMemoryBackend` is always available. The optional `redis-queue`
//! feature adds `RedisBackend`, which pings Redis once at startup and
//! falls back permanently to an in-memory queue if that ping fails —
//! there is no background reconnect, so a message enqueued after a
//! mid-run Redis outage is lossy across a process restart, matching
//! the original store-and-forward service's fallback behavior.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::Precedence;

#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub message_id: String,
    pub recipient: String,
    pub encrypted_content: String,
    pub precedence: Precedence,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// A message id already present somewhere in the queue. Scoped to
/// "currently enqueued", not "ever enqueued" — once an id is popped
/// (delivered, expired, or flushed) it can be reused.
#[derive(Debug, thiserror::Error)]
#[error("message id already queued: {0}")]
pub struct DuplicateMessageId(pub String);

#[async_trait::async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    async fn ping(&self) -> bool;
    async fn enqueue(&self, entry: QueuedEntry) -> anyhow::Result<usize>;
    async fn pop_oldest(&self, precedence: Precedence) -> anyhow::Result<Option<QueuedEntry>>;
    async fn depth(&self, precedence: Precedence) -> anyhow::Result<usize>;
    async fn oldest_created_at(&self, precedence: Precedence) -> anyhow::Result<Option<DateTime<Utc>>>;
}

#[derive(Default)]
pub struct InMemoryBackend {
    flash: Mutex<VecDeque<QueuedEntry>>,
    immediate: Mutex<VecDeque<QueuedEntry>>,
    priority: Mutex<VecDeque<QueuedEntry>>,
    routine: Mutex<VecDeque<QueuedEntry>>,
    seen: Mutex<HashSet<String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, precedence: Precedence) -> &Mutex<VecDeque<QueuedEntry>> {
        match precedence {
            Precedence::Flash => &self.flash,
            Precedence::Immediate => &self.immediate,
            Precedence::Priority => &self.priority,
            Precedence::Routine => &self.routine,
        }
    }
}

#[async_trait::async_trait]
impl QueueBackend for InMemoryBackend {
    async fn ping(&self) -> bool {
        true
    }

    async fn enqueue(&self, entry: QueuedEntry) -> anyhow::Result<usize> {
        {
            let mut seen = self.seen.lock();
            if !seen.insert(entry.message_id.clone()) {
                return Err(DuplicateMessageId(entry.message_id).into());
            }
        }
        let queue = self.queue_for(entry.precedence);
        let mut guard = queue.lock();
        guard.push_back(entry);
        Ok(guard.len())
    }

    async fn pop_oldest(&self, precedence: Precedence) -> anyhow::Result<Option<QueuedEntry>> {
        let popped = self.queue_for(precedence).lock().pop_front();
        if let Some(entry) = &popped {
            self.seen.lock().remove(&entry.message_id);
        }
        Ok(popped)
    }

    async fn depth(&self, precedence: Precedence) -> anyhow::Result<usize> {
        Ok(self.queue_for(precedence).lock().len())
    }

    async fn oldest_created_at(&self, precedence: Precedence) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.queue_for(precedence).lock().front().map(|e| e.created_at))
    }
}

#[cfg(feature = "redis-queue")]
pub mod redis_backend {
    use super::*;
    use redis::AsyncCommands;

    const KEY_PREFIX: &str = "tacedge:queue";

    pub struct RedisBackend {
        client: redis::Client,
    }

    impl RedisBackend {
        /// Connects and pings `url`; returns `None` if Redis is
        /// unreachable so the caller can fall back to
        /// [`super::InMemoryBackend`].
        pub async fn connect(url: &str) -> Option<Self> {
            let client = redis::Client::open(url).ok()?;
            let mut conn = client.get_multiplexed_async_connection().await.ok()?;
            let _: () = redis::cmd("PING").query_async(&mut conn).await.ok()?;
            Some(Self { client })
        }

        fn key(precedence: Precedence) -> String {
            format!("{KEY_PREFIX}:{}", precedence.to_string().to_lowercase())
        }
    }

    #[async_trait::async_trait]
    impl QueueBackend for RedisBackend {
        async fn ping(&self) -> bool {
            let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
                return false;
            };
            redis::cmd("PING").query_async::<()>(&mut conn).await.is_ok()
        }

        async fn enqueue(&self, entry: QueuedEntry) -> anyhow::Result<usize> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let key = Self::key(entry.precedence);
            let score = entry.created_at.timestamp_millis() as f64;
            let payload = serde_json::to_string(&SerializedEntry::from(&entry))?;
            conn.zadd::<_, _, _, ()>(&key, &payload, score).await?;
            let rank: Option<usize> = conn.zrank(&key, &payload).await?;
            Ok(rank.map(|r| r + 1).unwrap_or(1))
        }

        async fn pop_oldest(&self, precedence: Precedence) -> anyhow::Result<Option<QueuedEntry>> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let key = Self::key(precedence);
            let popped: Vec<(String, f64)> = conn.zpopmin(&key, 1).await?;
            Ok(match popped.into_iter().next() {
                Some((payload, _)) => Some(serde_json::from_str::<SerializedEntry>(&payload)?.into()),
                None => None,
            })
        }

        async fn depth(&self, precedence: Precedence) -> anyhow::Result<usize> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            Ok(conn.zcard(Self::key(precedence)).await?)
        }

        async fn oldest_created_at(&self, precedence: Precedence) -> anyhow::Result<Option<DateTime<Utc>>> {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let range: Vec<String> = conn.zrange(Self::key(precedence), 0, 0).await?;
            Ok(match range.into_iter().next() {
                Some(payload) => Some(serde_json::from_str::<SerializedEntry>(&payload)?.created_at),
                None => None,
            })
        }
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct SerializedEntry {
        message_id: String,
        recipient: String,
        encrypted_content: String,
        precedence: Precedence,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        retry_count: u32,
    }

    impl From<&QueuedEntry> for SerializedEntry {
        fn from(e: &QueuedEntry) -> Self {
            Self {
                message_id: e.message_id.clone(),
                recipient: e.recipient.clone(),
                encrypted_content: e.encrypted_content.clone(),
                precedence: e.precedence,
                created_at: e.created_at,
                expires_at: e.expires_at,
                retry_count: e.retry_count,
            }
        }
    }

    impl From<SerializedEntry> for QueuedEntry {
        fn from(e: SerializedEntry) -> Self {
            Self {
                message_id: e.message_id,
                recipient: e.recipient,
                encrypted_content: e.encrypted_content,
                precedence: e.precedence,
                created_at: e.created_at,
                expires_at: e.expires_at,
                retry_count: e.retry_count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message_id: &str) -> QueuedEntry {
        let now = Utc::now();
        QueuedEntry {
            message_id: message_id.into(),
            recipient: "NODE-ALPHA".into(),
            encrypted_content: "ct".into(),
            precedence: Precedence::Flash,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(300),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_while_still_queued() {
        let backend = InMemoryBackend::new();
        backend.enqueue(entry("dup")).await.unwrap();
        let err = backend.enqueue(entry("dup")).await.unwrap_err();
        assert!(err.downcast_ref::<DuplicateMessageId>().is_some());
    }

    #[tokio::test]
    async fn id_is_reusable_once_popped() {
        let backend = InMemoryBackend::new();
        backend.enqueue(entry("reusable")).await.unwrap();
        backend.pop_oldest(Precedence::Flash).await.unwrap();
        backend.enqueue(entry("reusable")).await.unwrap();
    }
}

#[cfg(feature = "redis-queue")]
pub use redis_backend::RedisBackend;
