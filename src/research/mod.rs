//! Deep research engine
//!
//! A bounded iterative agent: decompose the question, select sources per
//! task, execute cohorts, validate relevance, retry with reformulated
//! queries, spawn follow-ups, and synthesize a report.

pub mod engine;
pub mod run;
pub mod sensitivity;
pub mod synthesizer;
pub mod task;

pub use engine::DeepResearchEngine;
pub use run::{EvidenceEntry, ResearchRun};
pub use task::{ResearchTask, SourceOutcome, TaskStatus};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ResearchConfig;

#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("no integrations are registered")]
    EmptyRegistry,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

/// Per-run bounds; starts from the process config, adjustable per call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ResearchConstraints {
    pub max_tasks: usize,
    pub max_retries_per_task: u32,
    pub max_time_minutes: u64,
    pub max_concurrent_tasks: usize,
    pub min_results_per_task: usize,
    /// Acceptance bar 0-10; floored to 1 for sensitive runs
    pub relevance_threshold: u8,
    /// Fraction of selected sources expected to contribute; warning only
    pub min_source_utilization: f64,
}

impl Default for ResearchConstraints {
    fn default() -> Self {
        Self::from_config(&ResearchConfig::default())
    }
}

impl ResearchConstraints {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            max_tasks: config.max_tasks,
            max_retries_per_task: config.max_retries_per_task,
            max_time_minutes: config.max_time_minutes,
            max_concurrent_tasks: config.max_concurrent_tasks.max(1),
            min_results_per_task: config.min_results_per_task,
            relevance_threshold: config.relevance_threshold,
            min_source_utilization: config.min_source_utilization,
        }
    }
}
