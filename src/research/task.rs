//! Research task state machine
//!
//! A task is one sub-question executed against one cohort. Transitions are
//! enforced here: terminal states are never left, and a retry is the only
//! path that increments the attempt counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{ResultItem, SourceError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Retrying,
    Success,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed | TaskStatus::Aborted)
    }
}

#[derive(Error, Debug)]
#[error("illegal task transition: {from:?} -> {to:?} (task {task_id})")]
pub struct IllegalTransition {
    pub task_id: u64,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Per-source outcome of a task's cohort, kept for the report's
/// sources-consulted section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcome {
    pub source_id: String,
    pub source_display_name: String,
    pub success: bool,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SourceError>,
}

/// One sub-question and everything its execution produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchTask {
    /// Monotonic within a run, assigned in creation order
    pub id: u64,
    pub query: String,
    /// None for root tasks, the spawning task's id for follow-ups
    pub parent_id: Option<u64>,
    pub status: TaskStatus,
    /// 0-based; capped by max_retries_per_task
    pub attempt: u32,
    /// Deduplicated within the task
    pub results: Vec<ResultItem>,
    pub relevance_score: Option<u8>,
    /// Entity name -> mention count discovered from this task's items
    pub entities: HashMap<String, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_for_failure: Option<String>,
    #[serde(default)]
    pub source_outcomes: Vec<SourceOutcome>,
}

impl ResearchTask {
    pub fn new(id: u64, query: &str, parent_id: Option<u64>) -> Self {
        Self {
            id,
            query: query.to_string(),
            parent_id,
            status: TaskStatus::Pending,
            attempt: 0,
            results: Vec::new(),
            relevance_score: None,
            entities: HashMap::new(),
            started_at: None,
            completed_at: None,
            reason_for_failure: None,
            source_outcomes: Vec::new(),
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), IllegalTransition> {
        let legal = match (self.status, to) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Retrying, TaskStatus::Running) => true,
            (TaskStatus::Running, TaskStatus::Success) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Retrying) => true,
            // Run-level deadline expiry fails a task waiting to re-run
            (TaskStatus::Retrying, TaskStatus::Failed) => true,
            (TaskStatus::Pending, TaskStatus::Aborted) => true,
            (TaskStatus::Running, TaskStatus::Aborted) => true,
            (TaskStatus::Retrying, TaskStatus::Aborted) => true,
            _ => false,
        };
        if !legal {
            return Err(IllegalTransition {
                task_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending/Retrying -> Running
    pub fn start(&mut self) -> Result<(), IllegalTransition> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Success, recording the validated results
    pub fn succeed(
        &mut self,
        score: u8,
        results: Vec<ResultItem>,
        source_outcomes: Vec<SourceOutcome>,
    ) -> Result<(), IllegalTransition> {
        self.transition(TaskStatus::Success)?;
        self.relevance_score = Some(score);
        self.results = results;
        self.source_outcomes = source_outcomes;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed with a reason
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.transition(TaskStatus::Failed)?;
        self.reason_for_failure = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Retrying with a reformulated query; drops the attempt's
    /// results and bumps the counter
    pub fn retry(&mut self, new_query: &str) -> Result<(), IllegalTransition> {
        self.transition(TaskStatus::Retrying)?;
        self.attempt += 1;
        self.query = new_query.to_string();
        self.results.clear();
        self.relevance_score = None;
        self.source_outcomes.clear();
        Ok(())
    }

    /// Any non-terminal state -> Aborted (deadline or cancellation)
    pub fn abort(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.transition(TaskStatus::Aborted)?;
        self.reason_for_failure = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut task = ResearchTask::new(1, "what contracts mention foo", None);
        assert_eq!(task.status, TaskStatus::Pending);
        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        task.succeed(8, Vec::new(), Vec::new()).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.relevance_score, Some(8));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_retry_increments_attempt_and_rewrites_query() {
        let mut task = ResearchTask::new(1, "original", None);
        task.start().unwrap();
        task.retry("rephrased").unwrap();
        assert_eq!(task.status, TaskStatus::Retrying);
        assert_eq!(task.attempt, 1);
        assert_eq!(task.query, "rephrased");
        task.start().unwrap();
        task.fail("still insufficient").unwrap();
        assert_eq!(task.attempt, 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = ResearchTask::new(1, "q", None);
        task.start().unwrap();
        task.succeed(7, Vec::new(), Vec::new()).unwrap();
        assert!(task.start().is_err());
        assert!(task.fail("nope").is_err());
        assert!(task.retry("nope").is_err());
        assert!(task.abort("nope").is_err());
        assert_eq!(task.status, TaskStatus::Success);

        let mut failed = ResearchTask::new(2, "q", None);
        failed.start().unwrap();
        failed.fail("no results").unwrap();
        assert!(failed.start().is_err());
        assert_eq!(failed.status, TaskStatus::Failed);
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut task = ResearchTask::new(1, "q", None);
        assert!(task.succeed(5, Vec::new(), Vec::new()).is_err());
        assert!(task.fail("x").is_err());
        assert!(task.retry("x").is_err());
        assert!(task.abort("deadline_exceeded").is_ok());
    }

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
    }
}
