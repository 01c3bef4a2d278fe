//! Priority store-and-forward queue.
//!
//! Messages that cannot be delivered immediately are held here,
//! strictly ordered FLASH > IMMEDIATE > PRIORITY > ROUTINE, until a
//! background drain worker retries delivery or their TTL expires.

pub mod backend;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{self, Duration};

use crate::audit::{AuditAction, AuditActor, AuditLog, ControlFamily, Outcome};
use crate::clock::Clock;
use crate::node_registry::NodeRegistry;
use crate::types::Precedence;

pub use backend::{InMemoryBackend, QueueBackend, QueuedEntry};

#[cfg(feature = "redis-queue")]
pub use backend::RedisBackend;

pub struct EnqueueResult {
    pub queue_position: usize,
    pub expires_at: DateTime<Utc>,
}

pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
}

/// Per-precedence counters surfaced via `/api/v1/queue/status` and the
/// ambient metrics stack; `expired_count_24h` in spirit (we don't
/// window these by time, matching the original's lifetime counters).
#[derive(Default)]
struct QueueCounters {
    dequeued: [AtomicU64; 4],
    expired: [AtomicU64; 4],
}

impl QueueCounters {
    fn record_dequeued(&self, precedence: Precedence) {
        self.dequeued[precedence.index()].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tacedge_messages_dequeued_total", "precedence" => precedence.to_string()).increment(1);
    }

    fn record_expired(&self, precedence: Precedence) {
        self.expired[precedence.index()].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tacedge_messages_expired_total", "precedence" => precedence.to_string()).increment(1);
    }

    fn dequeued(&self, precedence: Precedence) -> u64 {
        self.dequeued[precedence.index()].load(Ordering::Relaxed)
    }

    fn expired(&self, precedence: Precedence) -> u64 {
        self.expired[precedence.index()].load(Ordering::Relaxed)
    }
}

pub struct PriorityQueue {
    backend: Arc<dyn QueueBackend>,
    clock: Arc<dyn Clock>,
    counters: QueueCounters,
    nodes: Option<Arc<dyn NodeRegistry>>,
}

impl PriorityQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            counters: QueueCounters::default(),
            nodes: None,
        }
    }

    /// Lets `flush_all` attempt real delivery per entry instead of
    /// treating every drained entry as flushed. Without a registry
    /// attached, `flush_all` falls back to the original unconditional
    /// drain (used by tests that don't care about delivery outcome).
    pub fn with_nodes(mut self, nodes: Arc<dyn NodeRegistry>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    /// Connects to Redis if `redis_url` is set and the `redis-queue`
    /// feature is compiled in; otherwise (or on a failed ping) returns
    /// an in-memory backend.
    #[cfg(feature = "redis-queue")]
    pub async fn resolve_backend(redis_url: Option<&str>) -> Arc<dyn QueueBackend> {
        if let Some(url) = redis_url {
            if let Some(backend) = backend::RedisBackend::connect(url).await {
                tracing::info!(url, "connected to redis queue backend");
                return Arc::new(backend);
            }
            tracing::warn!(url, "redis connection failed, using in-memory fallback");
        }
        Arc::new(InMemoryBackend::new())
    }

    #[cfg(not(feature = "redis-queue"))]
    pub async fn resolve_backend(_redis_url: Option<&str>) -> Arc<dyn QueueBackend> {
        Arc::new(InMemoryBackend::new())
    }

    pub async fn enqueue(
        &self,
        message_id: String,
        recipient: String,
        encrypted_content: String,
        precedence: Precedence,
        ttl_seconds: i64,
    ) -> anyhow::Result<EnqueueResult> {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::seconds(ttl_seconds);
        let entry = QueuedEntry {
            message_id,
            recipient,
            encrypted_content,
            precedence,
            created_at: now,
            expires_at,
            retry_count: 0,
        };
        let queue_position = self.backend.enqueue(entry).await?;
        Ok(EnqueueResult {
            queue_position,
            expires_at,
        })
    }

    pub async fn dequeue(&self, precedence: Precedence) -> anyhow::Result<Option<QueuedEntry>> {
        self.backend.pop_oldest(precedence).await
    }

    pub async fn depth(&self, precedence: Precedence) -> anyhow::Result<usize> {
        self.backend.depth(precedence).await
    }

    pub async fn total_depth(&self) -> anyhow::Result<usize> {
        let mut total = 0;
        for precedence in Precedence::all() {
            total += self.backend.depth(precedence).await?;
        }
        Ok(total)
    }

    pub async fn oldest_created_at(&self, precedence: Precedence) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.backend.oldest_created_at(precedence).await
    }

    pub fn dequeued_count(&self, precedence: Precedence) -> u64 {
        self.counters.dequeued(precedence)
    }

    pub fn expired_count(&self, precedence: Precedence) -> u64 {
        self.counters.expired(precedence)
    }

    /// Drains every queue in priority order, attempting delivery for
    /// each entry against the node registry. An entry whose recipient
    /// is reachable counts as flushed; one whose recipient is not
    /// counts as failed. Either way the entry leaves the queue — this
    /// is an operator-triggered bulk retry, not a requeue.
    pub async fn flush_all(&self) -> anyhow::Result<FlushReport> {
        let mut flushed = 0;
        let mut failed = 0;
        for precedence in Precedence::all() {
            while let Some(entry) = self.backend.pop_oldest(precedence).await? {
                let delivered = match &self.nodes {
                    Some(nodes) => nodes.is_connected(&entry.recipient),
                    None => true,
                };
                if delivered {
                    flushed += 1;
                    self.counters.record_dequeued(precedence);
                } else {
                    failed += 1;
                }
            }
        }
        Ok(FlushReport { flushed, failed })
    }
}

/// Notified by the drain worker whenever a queued entry reaches a
/// terminal outcome, so the pipeline's per-message status store can
/// advance in step with what actually happened in the queue.
pub trait DeliveryObserver: Send + Sync {
    fn on_delivered(&self, message_id: &str);
    fn on_expired(&self, message_id: &str);
}

/// Background task that periodically attempts delivery of queued
/// entries and evicts the ones whose TTL has elapsed. Runs on a fixed
/// tick rather than reacting to TTL deadlines directly, matching the
/// original store-and-forward worker's polling loop.
pub struct DrainWorker {
    queue: Arc<PriorityQueue>,
    audit: Arc<AuditLog>,
    nodes: Arc<dyn NodeRegistry>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn DeliveryObserver>>,
    interval: Duration,
}

impl DrainWorker {
    pub fn new(
        queue: Arc<PriorityQueue>,
        audit: Arc<AuditLog>,
        nodes: Arc<dyn NodeRegistry>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            audit,
            nodes,
            clock,
            observer: None,
            interval,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }

    /// One pass over every precedence class, in strict priority order:
    /// drop entries whose TTL has elapsed, attempt delivery for the
    /// rest via the node registry, and requeue (with `retry_count`
    /// bumped) whatever still isn't deliverable. Bounded to the
    /// entries present at the start of the tick so a burst of FLASH
    /// arrivals during the sweep can't starve ROUTINE's pass within
    /// this tick.
    async fn sweep_once(&self) {
        let now = self.clock.now();
        for precedence in Precedence::all() {
            let starting_depth = match self.queue.depth(precedence).await {
                Ok(d) => d,
                Err(err) => {
                    tracing::warn!(error = %err, ?precedence, "failed to read queue depth");
                    continue;
                }
            };

            for _ in 0..starting_depth {
                let mut entry = match self.queue.backend.pop_oldest(precedence).await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, ?precedence, "failed to pop queue entry");
                        break;
                    }
                };

                if entry.expires_at <= now {
                    self.queue.counters.record_expired(precedence);
                    if let Some(observer) = &self.observer {
                        observer.on_expired(&entry.message_id);
                    }
                    self.audit
                        .log(
                            "MESSAGE_EXPIRED",
                            ControlFamily::Si,
                            AuditActor {
                                node_id: "SYSTEM".into(),
                                role: "service".into(),
                                ip_address: None,
                                session_id: None,
                            },
                            AuditAction {
                                operation: "EXPIRE_MESSAGE".into(),
                                resource: entry.message_id.clone(),
                                outcome: Outcome::Failure,
                                reason: Some("ttl elapsed in queue".into()),
                            },
                            Default::default(),
                        )
                        .await;
                    continue;
                }

                if self.nodes.is_connected(&entry.recipient) {
                    self.queue.counters.record_dequeued(precedence);
                    if let Some(observer) = &self.observer {
                        observer.on_delivered(&entry.message_id);
                    }
                    self.audit
                        .log(
                            "MESSAGE_DELIVERED",
                            ControlFamily::Au,
                            AuditActor {
                                node_id: "SYSTEM".into(),
                                role: "service".into(),
                                ip_address: None,
                                session_id: None,
                            },
                            AuditAction {
                                operation: "DRAIN_DELIVER".into(),
                                resource: entry.message_id.clone(),
                                outcome: Outcome::Success,
                                reason: None,
                            },
                            Default::default(),
                        )
                        .await;
                } else {
                    entry.retry_count += 1;
                    if let Err(err) = self.queue.backend.enqueue(entry).await {
                        tracing::warn!(error = %err, ?precedence, "failed to re-enqueue undeliverable entry during sweep");
                    }
                }
            }
        }
    }
}
