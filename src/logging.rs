//! Append-only structured execution log
//!
//! Every decision, call, and outcome in a run is recorded as one JSON line
//! keyed by run id + task id + attempt. Writes go through a single writer
//! task fed by a bounded channel so callers are never blocked indefinitely:
//! when the buffer is full, non-critical events are dropped and counted,
//! while `task_complete`, `run_complete`, and `critical_source_failure`
//! always wait for space.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Channel capacity before non-critical events start dropping
const BUFFER_CAPACITY: usize = 1024;

/// Cap on serialized payloads for raw upstream responses
pub const RAW_RESPONSE_TRUNCATE: usize = 2000;

/// Well-known event types
pub mod event {
    pub const RUN_START: &str = "run_start";
    pub const RUN_COMPLETE: &str = "run_complete";
    pub const TASK_START: &str = "task_start";
    pub const TASK_COMPLETE: &str = "task_complete";
    pub const SOURCE_SELECTION: &str = "source_selection";
    pub const INTEGRATION_REJECTED: &str = "integration_rejected";
    pub const API_CALL: &str = "api_call";
    pub const RAW_RESPONSE: &str = "raw_response";
    pub const RELEVANCE_SCORING: &str = "relevance_scoring";
    pub const FILTER_DECISION: &str = "filter_decision";
    pub const CRITICAL_SOURCE_FAILURE: &str = "critical_source_failure";
    pub const SENSITIVITY_CLASSIFICATION: &str = "sensitivity_classification";
    pub const FOLLOW_UP_GENERATED: &str = "follow_up_generated";
    pub const ENTITY_EXTRACTION: &str = "entity_extraction";
    pub const MONITOR_SKIPPED: &str = "monitor_skipped";
    pub const ALERT_EMITTED: &str = "alert_emitted";
}

/// One line of the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    pub event_type: String,
    pub payload: Value,
}

impl LogEvent {
    pub fn new(run_id: &str, event_type: &str, payload: Value) -> Self {
        Self {
            ts: Utc::now(),
            run_id: run_id.to_string(),
            task_id: None,
            attempt: None,
            event_type: event_type.to_string(),
            payload,
        }
    }

    pub fn with_task(mut self, task_id: u64, attempt: u32) -> Self {
        self.task_id = Some(task_id);
        self.attempt = Some(attempt);
        self
    }

    fn is_critical(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            event::TASK_COMPLETE | event::RUN_COMPLETE | event::CRITICAL_SOURCE_FAILURE
        )
    }
}

/// Truncate a raw upstream body for a `raw_response` event
pub fn truncate_raw(body: &str) -> String {
    if body.len() <= RAW_RESPONSE_TRUNCATE {
        return body.to_string();
    }
    let mut cut = RAW_RESPONSE_TRUNCATE;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated {} bytes]", &body[..cut], body.len() - cut)
}

/// Handle to the execution log; cheap to clone, one writer task per file
#[derive(Clone)]
pub struct ExecutionLogger {
    tx: mpsc::Sender<LogEvent>,
    dropped: Arc<AtomicUsize>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ExecutionLogger {
    /// Open (append) the JSONL file at `path` and start the writer task
    pub fn create(path: &Path) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (tx, rx) = mpsc::channel(BUFFER_CAPACITY);
        let writer = tokio::spawn(write_loop(file, rx));
        Ok(Self {
            tx,
            dropped: Arc::new(AtomicUsize::new(0)),
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    /// Record an event.
    ///
    /// Critical events wait for buffer space; everything else is dropped
    /// (and counted) when the buffer is full.
    pub async fn emit(&self, event: LogEvent) {
        if event.is_critical() {
            if self.tx.send(event).await.is_err() {
                log::error!("[ExecutionLogger] Writer gone, critical event lost");
            }
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
            if dropped % 100 == 1 {
                log::warn!(
                    "[ExecutionLogger] Buffer full, dropped {} events (latest: {})",
                    dropped,
                    event.event_type
                );
            }
        }
    }

    /// Number of non-critical events dropped due to buffer pressure
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Drain the channel and stop the writer; call after `run_complete`
    pub async fn shutdown(&self) {
        let handle = { self.writer.lock().await.take() };
        if let Some(handle) = handle {
            // Closing our sender is not enough while clones exist, so signal
            // the writer with an explicit drain marker instead.
            let _ = self
                .tx
                .send(LogEvent::new("", SHUTDOWN_MARKER, Value::Null))
                .await;
            let _ = handle.await;
        }
    }
}

const SHUTDOWN_MARKER: &str = "__shutdown__";

async fn write_loop(mut file: std::fs::File, mut rx: mpsc::Receiver<LogEvent>) {
    while let Some(event) = rx.recv().await {
        if event.event_type == SHUTDOWN_MARKER {
            break;
        }
        match serde_json::to_string(&event) {
            Ok(line) => {
                if writeln!(file, "{}", line).and_then(|_| file.flush()).is_err() {
                    log::error!("[ExecutionLogger] Write failed, stopping writer");
                    break;
                }
            }
            Err(e) => log::error!("[ExecutionLogger] Serialize failed: {}", e),
        }
    }
}
