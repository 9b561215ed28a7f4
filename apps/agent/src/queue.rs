//! Durable, bounded, local event buffer.
//!
//! A single JSON document read-modify-written on every mutation, owned by one
//! writer at a time (no inter-process locking). Enqueueing past the bound
//! silently evicts the oldest entries: availability over completeness.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Default bound on retained events.
pub const DEFAULT_MAX_EVENTS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Agent,
    Cron,
    Runtime,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Cron => write!(f, "cron"),
            Self::Runtime => write!(f, "runtime"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    events: Vec<QueuedEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub agent: usize,
    pub cron: usize,
    pub runtime: usize,
    pub oldest_event_at: Option<DateTime<Utc>>,
}

pub struct EventQueue {
    path: PathBuf,
    max_events: usize,
}

impl EventQueue {
    pub fn new(path: PathBuf, max_events: usize) -> Self {
        Self { path, max_events }
    }

    /// Append an event. Never fails for capacity reasons: the oldest entries
    /// are evicted first once the bound is exceeded.
    pub fn enqueue(
        &self,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<QueuedEvent, QueueError> {
        let mut file = self.load()?;
        let event = QueuedEvent {
            id: Uuid::new_v4(),
            kind,
            payload,
            created_at: Utc::now(),
            retry_count: 0,
        };
        file.events.push(event.clone());

        if file.events.len() > self.max_events {
            let overflow = file.events.len() - self.max_events;
            tracing::warn!(evicted = overflow, "Event queue full, dropping oldest events");
            file.events.drain(..overflow);
        }

        self.store(&file)?;
        Ok(event)
    }

    /// Remove a delivered event. Returns whether it was present.
    pub fn dequeue(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut file = self.load()?;
        let before = file.events.len();
        file.events.retain(|e| e.id != id);
        let removed = file.events.len() < before;
        if removed {
            file.last_sync_at = Some(Utc::now());
            self.store(&file)?;
        }
        Ok(removed)
    }

    /// Undelivered events, oldest first, optionally filtered by kind.
    pub fn pending(&self, kind: Option<EventKind>) -> Result<Vec<QueuedEvent>, QueueError> {
        let file = self.load()?;
        Ok(file
            .events
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .collect())
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let file = self.load()?;
        let count = |kind: EventKind| file.events.iter().filter(|e| e.kind == kind).count();
        Ok(QueueStats {
            total: file.events.len(),
            agent: count(EventKind::Agent),
            cron: count(EventKind::Cron),
            runtime: count(EventKind::Runtime),
            oldest_event_at: file.events.first().map(|e| e.created_at),
        })
    }

    fn load(&self) -> Result<QueueFile, QueueError> {
        match fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| QueueError::Corrupt { path: self.path.clone(), source: e }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueFile::default()),
            Err(e) => Err(QueueError::Io { path: self.path.clone(), source: e }),
        }
    }

    fn store(&self, file: &QueueFile) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| QueueError::Io { path: parent.to_path_buf(), source: e })?;
        }
        let raw = serde_json::to_vec_pretty(file)
            .map_err(|e| QueueError::Corrupt { path: self.path.clone(), source: e })?;
        fs::write(&self.path, raw)
            .map_err(|e| QueueError::Io { path: self.path.clone(), source: e })
    }
}
