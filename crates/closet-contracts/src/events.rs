use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Everything a closet session writes to its event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosetEvent {
    SessionStarted,
    CacheHit,
    RateLimited,
    GenerationStarted,
    GenerationRetry,
    GenerationSucceeded,
    PersistenceFailed,
    CompositeFallback,
    GenerationFailed,
    GenerationSkipped,
    ItemAdded,
    ItemDeleted,
    OutfitLiked,
}

impl ClosetEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosetEvent::SessionStarted => "session_started",
            ClosetEvent::CacheHit => "cache_hit",
            ClosetEvent::RateLimited => "rate_limited",
            ClosetEvent::GenerationStarted => "generation_started",
            ClosetEvent::GenerationRetry => "generation_retry",
            ClosetEvent::GenerationSucceeded => "generation_succeeded",
            ClosetEvent::PersistenceFailed => "persistence_failed",
            ClosetEvent::CompositeFallback => "composite_fallback",
            ClosetEvent::GenerationFailed => "generation_failed",
            ClosetEvent::GenerationSkipped => "generation_skipped",
            ClosetEvent::ItemAdded => "item_added",
            ClosetEvent::ItemDeleted => "item_deleted",
            ClosetEvent::OutfitLiked => "outfit_liked",
        }
    }
}

impl fmt::Display for ClosetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RESERVED_FIELDS: [&str; 4] = ["type", "session_id", "seq", "ts"];

/// Session-scoped appender for the shared `events.jsonl`.
///
/// Several sessions may append to one file; each line carries the
/// `session_id` and a per-session `seq` starting at 1, so one session's
/// history can be read back in order. Payload keys that collide with the
/// envelope fields are dropped.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    next_seq: AtomicU64,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: AtomicU64::new(1),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends one line and returns the record as written.
    pub fn emit(&self, event: ClosetEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let mut file = self
            .inner
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if file.is_none() {
            if let Some(parent) = self.inner.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *file = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.inner.path)?,
            );
        }

        // Sequence numbers are taken under the lock so file order matches.
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let mut record = Map::new();
        record.insert("type".to_string(), Value::String(event.as_str().to_string()));
        record.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        record.insert("seq".to_string(), Value::from(seq));
        record.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        for (key, value) in payload {
            if !RESERVED_FIELDS.contains(&key.as_str()) {
                record.insert(key, value);
            }
        }

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        if let Some(handle) = file.as_mut() {
            handle.write_all(&line)?;
        }
        Ok(Value::Object(record))
    }

    /// This session's records in `seq` order. Other sessions' lines and
    /// unparseable lines are skipped.
    pub fn read_session(&self) -> anyhow::Result<Vec<Value>> {
        let raw = match std::fs::read_to_string(&self.inner.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter(|row| {
                row.get("session_id").and_then(Value::as_str) == Some(self.session_id())
            })
            .collect();
        rows.sort_by_key(|row| row.get("seq").and_then(Value::as_u64).unwrap_or(0));
        Ok(rows)
    }

    /// Event types of this session, in order.
    pub fn read_types(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .read_session()?
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}
