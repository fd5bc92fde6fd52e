//! Research run record
//!
//! The run owns its tasks, the global evidence index, and the entity
//! network. Only the engine's orchestrator mutates a run; task workers
//! hand their outcomes back for merging, which keeps all run-level
//! mutation single-threaded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ResearchConstraints;
use super::task::ResearchTask;
use crate::dedup::evidence_fingerprint;
use crate::models::ResultItem;

const SLUG_MAX_CHARS: usize = 40;

/// One entry in the global evidence index; repeats bump the counter
/// instead of re-inserting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceEntry {
    pub fingerprint: String,
    pub item: ResultItem,
    pub occurrences: u32,
    /// Task that first contributed the item
    pub first_task_id: u64,
}

/// Full record of one deep-research execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRun {
    /// Sortable: timestamp prefix plus a slug of the question
    pub run_id: String,
    pub root_question: String,
    pub constraints: ResearchConstraints,
    pub sensitive: bool,
    #[serde(default)]
    pub matched_markers: Vec<String>,
    /// True when any cohort reported a critical source failure
    #[serde(default)]
    pub degraded: bool,
    /// Creation order, append-only
    pub tasks: Vec<ResearchTask>,
    /// Insertion order follows task completion order
    pub evidence: Vec<EvidenceEntry>,
    /// entity -> co-occurring entity -> weight
    pub entity_network: HashMap<String, HashMap<String, u32>>,
    /// entity -> total mentions across the run
    pub entity_mentions: HashMap<String, u32>,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_reason: Option<String>,

    /// fingerprint -> index into `evidence`; live-run lookup only, not
    /// part of the persisted record
    #[serde(skip)]
    evidence_index: HashMap<String, usize>,
}

impl ResearchRun {
    pub fn new(question: &str, constraints: ResearchConstraints) -> Self {
        let started_at = Utc::now();
        let deadline_at = started_at + chrono::Duration::seconds(constraints.max_time_minutes as i64 * 60);
        Self {
            run_id: format!(
                "{}_{}",
                started_at.format("%Y%m%d_%H%M%S"),
                slugify(question)
            ),
            root_question: question.to_string(),
            constraints,
            sensitive: false,
            matched_markers: Vec::new(),
            degraded: false,
            tasks: Vec::new(),
            evidence: Vec::new(),
            entity_network: HashMap::new(),
            entity_mentions: HashMap::new(),
            started_at,
            deadline_at,
            completed_at: None,
            terminated_reason: None,
            evidence_index: HashMap::new(),
        }
    }

    pub fn past_deadline(&self) -> bool {
        Utc::now() >= self.deadline_at
    }

    /// Remaining task budget under `max_tasks`
    pub fn remaining_task_budget(&self) -> usize {
        self.constraints.max_tasks.saturating_sub(self.tasks.len())
    }

    /// Append a new PENDING task, or None when the budget is spent
    pub fn add_task(&mut self, query: &str, parent_id: Option<u64>) -> Option<u64> {
        if self.remaining_task_budget() == 0 {
            return None;
        }
        let id = self.tasks.len() as u64 + 1;
        self.tasks.push(ResearchTask::new(id, query, parent_id));
        Some(id)
    }

    pub fn task(&self, id: u64) -> Option<&ResearchTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u64) -> Option<&mut ResearchTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Merge a completed task's items into the global evidence index.
    /// First sighting inserts; later sightings only bump the counter.
    pub fn record_evidence(&mut self, task_id: u64, items: &[ResultItem]) {
        for item in items {
            let fingerprint = evidence_fingerprint(item);
            match self.evidence_index.get(&fingerprint) {
                Some(&idx) => self.evidence[idx].occurrences += 1,
                None => {
                    self.evidence_index
                        .insert(fingerprint.clone(), self.evidence.len());
                    self.evidence.push(EvidenceEntry {
                        fingerprint,
                        item: item.clone(),
                        occurrences: 1,
                        first_task_id: task_id,
                    });
                }
            }
        }
    }

    /// Merge one task's entity extraction: `entities` maps an entity name
    /// to the indices of the task items it appeared in. Entities sharing
    /// an item index co-occur, weighted by how many items they share.
    pub fn merge_entities(&mut self, entities: &[(String, Vec<usize>)]) {
        for (name, indices) in entities {
            *self.entity_mentions.entry(name.clone()).or_insert(0) += indices.len() as u32;
        }
        for (i, (name_a, indices_a)) in entities.iter().enumerate() {
            for (name_b, indices_b) in entities.iter().skip(i + 1) {
                if name_a == name_b {
                    continue;
                }
                let shared = indices_a
                    .iter()
                    .filter(|idx| indices_b.contains(idx))
                    .count() as u32;
                if shared == 0 {
                    continue;
                }
                *self
                    .entity_network
                    .entry(name_a.clone())
                    .or_default()
                    .entry(name_b.clone())
                    .or_insert(0) += shared;
                *self
                    .entity_network
                    .entry(name_b.clone())
                    .or_default()
                    .entry(name_a.clone())
                    .or_insert(0) += shared;
            }
        }
    }

    /// Entities ranked by total co-occurrence weight, heaviest first
    pub fn top_entities(&self, n: usize) -> Vec<(String, u32)> {
        let mut ranked: Vec<(String, u32)> = self
            .entity_network
            .iter()
            .map(|(name, edges)| (name.clone(), edges.values().sum()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    /// Mark the run terminated; only the first call wins
    pub fn terminate(&mut self, reason: &str) {
        if self.terminated_reason.is_none() {
            self.terminated_reason = Some(reason.to_string());
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated_reason.is_some()
    }
}

/// Filesystem-safe slug of a question for the run id
fn slugify(question: &str) -> String {
    let mut slug = String::new();
    let mut last_was_sep = true;
    for c in question.chars() {
        if slug.chars().count() >= SLUG_MAX_CHARS {
            break;
        }
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        "question".to_string()
    } else {
        slug
    }
}
