//! Per-run log registry.
//!
//! Append-only, insertion-ordered entries keyed by run id. The engine is the
//! only writer; the HTTP layer and CLI read. Each append is echoed to
//! `tracing` so the process log carries the same story.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped observation tied to a run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    #[serde(rename = "testExecutionId")]
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl LogEntry {
    /// `[ISO-timestamp] [LEVEL] message {metadata}`; the metadata segment is
    /// omitted when absent.
    pub fn export_line(&self) -> String {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        let label = self.level.as_str().to_uppercase();
        match &self.metadata {
            Some(metadata) => format!("[{}] [{}] {} {}", timestamp, label, self.message, metadata),
            None => format!("[{}] [{}] {}", timestamp, label, self.message),
        }
    }
}

/// Shared store of log entries.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct LogRegistry {
    entries: Arc<RwLock<HashMap<String, Vec<LogEntry>>>>,
}

impl LogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry for `run_id` and return it.
    pub async fn append(
        &self,
        run_id: &str,
        level: LogLevel,
        message: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> LogEntry {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            metadata,
        };

        match level {
            LogLevel::Error => error!(run_id, level = %level, "{}", entry.message),
            _ => info!(run_id, level = %level, "{}", entry.message),
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(run_id.to_string())
            .or_default()
            .push(entry.clone());
        entry
    }

    /// All entries for the run in append order; empty for unknown runs.
    pub async fn list(&self, run_id: &str) -> Vec<LogEntry> {
        let entries = self.entries.read().await;
        entries.get(run_id).cloned().unwrap_or_default()
    }

    pub async fn list_by_level(&self, run_id: &str, level: LogLevel) -> Vec<LogEntry> {
        let entries = self.entries.read().await;
        entries
            .get(run_id)
            .map(|list| list.iter().filter(|e| e.level == level).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every entry for the run.
    pub async fn clear(&self, run_id: &str) {
        self.entries.write().await.remove(run_id);
    }

    /// Render the run's entries one per line.
    pub async fn export(&self, run_id: &str) -> String {
        let entries = self.entries.read().await;
        entries
            .get(run_id)
            .map(|list| {
                list.iter()
                    .map(LogEntry::export_line)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
