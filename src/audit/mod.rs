//! Tamper-evident audit log.
//!
//! Implements structured audit logging aligned with NIST 800-53:
//! AC (Access Control), AU (Audit and Accountability), IA
//! (Identification and Authentication), SC (System and Communications
//! Protection), SI (System and Information Integrity).
//!
//! Every [`AuditEvent`] carries a SHA-256 integrity hash computed over
//! its own canonical (sorted-key, whitespace-free) JSON serialization
//! with the hash field itself excluded. [`AuditLog::verify_integrity`]
//! recomputes that hash and compares it, so any mutation of a stored
//! event — including one made by editing the rotated JSONL files
//! directly — is detectable.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::clock::Clock;
use crate::ids::EventId;

pub const MAX_EVENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlFamily {
    /// Access Control
    Ac,
    /// Audit and Accountability
    Au,
    /// Identification and Authentication
    Ia,
    /// System and Communications Protection
    Sc,
    /// System and Information Integrity
    Si,
}

impl ControlFamily {
    fn as_key(self) -> &'static str {
        match self {
            ControlFamily::Ac => "AC",
            ControlFamily::Au => "AU",
            ControlFamily::Ia => "IA",
            ControlFamily::Sc => "SC",
            ControlFamily::Si => "SI",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Success,
    Failure,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActor {
    pub node_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditAction {
    pub operation: String,
    pub resource: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub control_family: ControlFamily,
    pub actor: AuditActor,
    pub action: AuditAction,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    pub hash: String,
}

impl AuditEvent {
    fn new(
        event_id: EventId,
        timestamp: DateTime<Utc>,
        event_type: String,
        control_family: ControlFamily,
        actor: AuditActor,
        action: AuditAction,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let hash = Self::compute_hash(
            &event_id,
            timestamp,
            &event_type,
            control_family,
            &actor,
            &action,
            &context,
        );
        Self {
            event_id,
            timestamp,
            event_type,
            control_family,
            actor,
            action,
            context,
            hash,
        }
    }

    /// Recomputes the integrity hash from this event's current fields,
    /// ignoring whatever is currently stored in `self.hash`.
    fn recompute_hash(&self) -> String {
        Self::compute_hash(
            &self.event_id,
            self.timestamp,
            &self.event_type,
            self.control_family,
            &self.actor,
            &self.action,
            &self.context,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_hash(
        event_id: &EventId,
        timestamp: DateTime<Utc>,
        event_type: &str,
        control_family: ControlFamily,
        actor: &AuditActor,
        action: &AuditAction,
        context: &BTreeMap<String, serde_json::Value>,
    ) -> String {
        // BTreeMap + serde_json's map serialization already emits keys
        // in sorted order, giving us the canonical form the Python
        // original built with `json.dumps(..., sort_keys=True)`.
        let canonical = serde_json::json!({
            "event_id": event_id.as_str(),
            "timestamp": timestamp.to_rfc3339(),
            "event_type": event_type,
            "control_family": control_family.as_key(),
            "actor": actor,
            "action": action,
            "context": context,
        });
        let bytes = serde_json::to_vec(&canonical).expect("canonical event is serializable");
        let digest = Sha256::digest(bytes);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorCount {
    pub node_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub total_events: usize,
    pub by_control_family: BTreeMap<String, usize>,
    pub by_outcome: BTreeMap<String, usize>,
    /// Up to 10 actor node ids with the most recorded events, highest count first.
    pub top_actors: Vec<ActorCount>,
}

#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub control_family: Option<ControlFamily>,
    pub actor_node: Option<String>,
    pub limit: usize,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }
}

struct Indices {
    by_control_family: HashMap<&'static str, Vec<usize>>,
    by_event_type: HashMap<String, Vec<usize>>,
    by_actor_node: HashMap<String, Vec<usize>>,
}

impl Indices {
    fn new() -> Self {
        Self {
            by_control_family: HashMap::new(),
            by_event_type: HashMap::new(),
            by_actor_node: HashMap::new(),
        }
    }

    fn record(&mut self, offset: usize, event: &AuditEvent) {
        self.by_control_family
            .entry(event.control_family.as_key())
            .or_default()
            .push(offset);
        self.by_event_type
            .entry(event.event_type.clone())
            .or_default()
            .push(offset);
        self.by_actor_node
            .entry(event.actor.node_id.clone())
            .or_default()
            .push(offset);
    }

    /// Rebuilds from scratch; used after a FIFO eviction shifts every
    /// remaining event's offset.
    fn rebuild(events: &[AuditEvent]) -> Self {
        let mut idx = Self::new();
        for (offset, event) in events.iter().enumerate() {
            idx.record(offset, event);
        }
        idx
    }
}

struct Inner {
    events: Vec<AuditEvent>,
    indices: Indices,
}

/// In-memory audit log with FIFO eviction at [`MAX_EVENTS`] and an
/// optional append-only daily-rotated JSONL file backing.
pub struct AuditLog {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    writer: Option<Mutex<FileWriter>>,
}

struct FileWriter {
    dir: PathBuf,
    current_date: Option<NaiveDate>,
    file: Option<tokio::fs::File>,
}

impl AuditLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                indices: Indices::new(),
            }),
            clock,
            writer: None,
        }
    }

    /// Enables append-only persistence: events are written as
    /// newline-delimited JSON to `dir/audit-YYYY-MM-DD.jsonl`, rotating
    /// at UTC midnight.
    pub fn with_file_backing(mut self, dir: PathBuf) -> Self {
        self.writer = Some(Mutex::new(FileWriter {
            dir,
            current_date: None,
            file: None,
        }));
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        event_type: impl Into<String>,
        control_family: ControlFamily,
        actor: AuditActor,
        action: AuditAction,
        context: BTreeMap<String, serde_json::Value>,
    ) -> AuditEvent {
        let event = AuditEvent::new(
            EventId::new(),
            self.clock.now(),
            event_type.into(),
            control_family,
            actor,
            action,
            context,
        );

        {
            let mut guard = self.inner.lock();
            guard.events.push(event.clone());
            let offset = guard.events.len() - 1;
            guard.indices.record(offset, &event);

            if guard.events.len() > MAX_EVENTS {
                let overflow = guard.events.len() - MAX_EVENTS;
                guard.events.drain(0..overflow);
                guard.indices = Indices::rebuild(&guard.events);
            }
        }

        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            control_family = event.control_family.as_key(),
            actor_node = %event.actor.node_id,
            action_operation = %event.action.operation,
            "audit event recorded"
        );

        if let Some(writer) = &self.writer {
            let mut w = writer.lock();
            if let Err(err) = w.append(&event).await {
                tracing::warn!(error = %err, "failed to persist audit event to disk");
            }
        }

        event
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let guard = self.inner.lock();

        // Pick the most selective index available, falling back to a
        // full scan over insertion order when no filter is given.
        let candidate_offsets: Vec<usize> = match (
            &query.control_family,
            &query.event_type,
            &query.actor_node,
        ) {
            (Some(cf), _, _) => guard
                .indices
                .by_control_family
                .get(cf.as_key())
                .cloned()
                .unwrap_or_default(),
            (_, Some(et), _) => guard
                .indices
                .by_event_type
                .get(et)
                .cloned()
                .unwrap_or_default(),
            (_, _, Some(node)) => guard
                .indices
                .by_actor_node
                .get(node)
                .cloned()
                .unwrap_or_default(),
            (None, None, None) => (0..guard.events.len()).collect(),
        };

        // Candidate offsets come from the index (or the full scan) in
        // insertion order; preserve that order through filtering rather
        // than re-sorting by timestamp, so `query({})` and index-matched
        // queries both return events in the order they were logged.
        let matched: Vec<&AuditEvent> = candidate_offsets
            .into_iter()
            .filter_map(|offset| guard.events.get(offset))
            .filter(|e| {
                query
                    .event_type
                    .as_deref()
                    .map(|et| e.event_type == et)
                    .unwrap_or(true)
                    && query
                        .control_family
                        .map(|cf| e.control_family == cf)
                        .unwrap_or(true)
                    && query
                        .actor_node
                        .as_deref()
                        .map(|n| e.actor.node_id == n)
                        .unwrap_or(true)
            })
            .take(query.limit.max(1))
            .collect();

        matched.into_iter().cloned().collect()
    }

    pub fn verify_integrity(&self, event: &AuditEvent) -> bool {
        event.hash == event.recompute_hash()
    }

    pub fn export(&self) -> String {
        let guard = self.inner.lock();
        serde_json::to_string_pretty(&guard.events).expect("events are serializable")
    }

    pub fn stats(&self) -> AuditStats {
        let guard = self.inner.lock();
        let mut by_control_family = BTreeMap::new();
        let mut by_outcome = BTreeMap::new();
        let mut by_actor: HashMap<String, usize> = HashMap::new();

        for event in &guard.events {
            *by_control_family
                .entry(event.control_family.as_key().to_string())
                .or_insert(0) += 1;
            let outcome_key = match event.action.outcome {
                Outcome::Success => "SUCCESS",
                Outcome::Failure => "FAILURE",
                Outcome::Unknown => "UNKNOWN",
            };
            *by_outcome.entry(outcome_key.to_string()).or_insert(0) += 1;
            *by_actor.entry(event.actor.node_id.clone()).or_insert(0) += 1;
        }

        let mut top_actors: Vec<ActorCount> = by_actor
            .into_iter()
            .map(|(node_id, count)| ActorCount { node_id, count })
            .collect();
        top_actors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.node_id.cmp(&b.node_id)));
        top_actors.truncate(10);

        AuditStats {
            total_events: guard.events.len(),
            by_control_family,
            by_outcome,
            top_actors,
        }
    }
}

impl FileWriter {
    async fn append(&mut self, event: &AuditEvent) -> anyhow::Result<()> {
        let today = event.timestamp.date_naive();
        if self.current_date != Some(today) || self.file.is_none() {
            tokio::fs::create_dir_all(&self.dir).await?;
            let path = self.dir.join(format!("audit-{today}.jsonl"));
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            self.file = Some(file);
            self.current_date = Some(today);
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.file.as_mut().unwrap().write_all(&line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    fn test_actor() -> AuditActor {
        AuditActor {
            node_id: "NODE-ALPHA".into(),
            role: "OPERATOR".into(),
            ip_address: None,
            session_id: None,
        }
    }

    fn test_action() -> AuditAction {
        AuditAction {
            operation: "SEND_MESSAGE".into(),
            resource: "msg-1".into(),
            outcome: Outcome::Success,
            reason: None,
        }
    }

    fn test_log() -> AuditLog {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        AuditLog::new(clock)
    }

    #[tokio::test]
    async fn logged_event_verifies() {
        let log = test_log();
        let event = log
            .log(
                "MESSAGE_SENT",
                ControlFamily::Au,
                test_actor(),
                test_action(),
                BTreeMap::new(),
            )
            .await;
        assert!(log.verify_integrity(&event));
    }

    #[tokio::test]
    async fn tampering_breaks_integrity() {
        let log = test_log();
        let mut event = log
            .log(
                "MESSAGE_SENT",
                ControlFamily::Au,
                test_actor(),
                test_action(),
                BTreeMap::new(),
            )
            .await;
        event.action.outcome = Outcome::Failure;
        assert!(!log.verify_integrity(&event));
    }

    #[tokio::test]
    async fn query_filters_by_control_family() {
        let log = test_log();
        log.log("AUTH_SUCCESS", ControlFamily::Ia, test_actor(), test_action(), BTreeMap::new())
            .await;
        log.log("MESSAGE_SENT", ControlFamily::Au, test_actor(), test_action(), BTreeMap::new())
            .await;

        let mut query = AuditQuery::new();
        query.control_family = Some(ControlFamily::Ia);
        let results = log.query(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, "AUTH_SUCCESS");
    }

    #[tokio::test]
    async fn fifo_eviction_caps_at_max_events() {
        let log = test_log();
        for i in 0..(MAX_EVENTS + 10) {
            log.log(
                format!("EVT_{i}"),
                ControlFamily::Au,
                test_actor(),
                test_action(),
                BTreeMap::new(),
            )
            .await;
        }
        assert_eq!(log.stats().total_events, MAX_EVENTS);
    }
}
