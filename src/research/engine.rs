//! Deep research orchestration
//!
//! The engine runs the full lifecycle: sensitivity classification,
//! decomposition, batched task execution with retries and follow-ups,
//! entity extraction, and synthesis. All run-level state is mutated here,
//! on one task at a time; workers hand their finished task back.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use super::run::ResearchRun;
use super::sensitivity;
use super::synthesizer;
use super::task::{ResearchTask, SourceOutcome, TaskStatus};
use super::{ResearchConstraints, ResearchError};
use crate::config::AppConfig;
use crate::dedup::evidence_fingerprint;
use crate::executor::{
    CancellationToken, CohortScope, ExecutorOptions, ParallelExecutor,
};
use crate::integrations::IntegrationRegistry;
use crate::llm::{schemas, LlmError, LlmGateway};
use crate::logging::{event, ExecutionLogger, LogEvent};
use crate::models::SourceMetadata;

/// Per-source item cap inside one task's cohort
const RESULTS_PER_SOURCE: usize = 25;
/// Items sampled for relevance validation
const VALIDATION_SAMPLE: usize = 10;
/// Maximum sources one task may select
const MAX_SOURCES_PER_TASK: usize = 5;
/// Follow-ups requested per successful task
const MAX_FOLLOW_UPS: usize = 3;
/// Items shown to the entity extractor
const EXTRACTION_SAMPLE: usize = 10;

const DECOMPOSITION_PROMPT: &str = "You are a research planner. Decompose the research \
question into self-contained sub-questions, each answerable by searching a \
subset of the listed sources. Produce a JSON object with:\n\
- sub_questions: an ordered array of sub-question strings, most important \
first\n\
- approach: one sentence on the overall plan\n\
Respect the stated maximum. Output only the JSON object.";

const SIMPLE_DECOMPOSITION_PROMPT: &str = "Decompose the question into up to the stated \
number of sub-questions. Output only a JSON object: {\"sub_questions\": \
[\"...\"]}.";

const SOURCE_SELECTION_PROMPT: &str = "You are a research router. From the listed \
sources, select the 2-5 most relevant for the task query, best first, with a \
short reason for each. Produce a JSON object:\n\
{\"selected\": [{\"source_id\": \"...\", \"reason\": \"...\"}]}\n\
Only use source_id values from the list. Output only the JSON object.";

const SIMPLE_SOURCE_SELECTION_PROMPT: &str = "Select the 2-5 most relevant source ids \
for the query from the list. Output only JSON: {\"selected\": [{\"source_id\": \
\"...\", \"reason\": \"...\"}]}.";

const RELEVANCE_PROMPT: &str = "You are a research validator. Score the relevance of the \
sampled results to the task query and the original research question on an \
integer scale 0-10 (0 = unrelated, 10 = directly answers it), considering the \
sample as a whole. Produce a JSON object {\"score\": n, \"reasoning\": \
\"...\"}. Output only the JSON object.";

const SIMPLE_RELEVANCE_PROMPT: &str = "Score the relevance of these results to the query, \
0-10. Output only JSON: {\"score\": n, \"reasoning\": \"...\"}.";

const REFORMULATE_PROMPT: &str = "You are a research assistant. The previous search \
phrasing did not work; reformulate the sub-question with different phrasing \
and keywords, keeping the same intent. Use the validator's reasoning to avoid \
the same failure. Produce a JSON object {\"query\": \"...\", \"rationale\": \
\"...\"}. Output only the JSON object.";

const FOLLOW_UP_PROMPT: &str = "You are a research planner. Given a successful task's \
evidence, propose up to 3 follow-up sub-questions that would deepen the \
investigation of the original question, each with a rationale. Produce a \
JSON object {\"follow_ups\": [{\"question\": \"...\", \"rationale\": \
\"...\"}]}. Return an empty array when nothing is worth following. Output \
only the JSON object.";

const ENTITY_PROMPT: &str = "You extract named entities (organizations, programs, \
people, places, systems) from search results. For each entity, list the \
zero-based indices of the items it appears in. Produce a JSON object \
{\"entities\": [{\"name\": \"...\", \"item_indices\": [0]}]}. Output only \
the JSON object.";

/// Outcome handed back from a task worker to the orchestrator
struct TaskReport {
    task: ResearchTask,
    degraded: bool,
}

/// Bounded iterative research agent
pub struct DeepResearchEngine {
    config: Arc<AppConfig>,
    registry: Arc<IntegrationRegistry>,
    gateway: Arc<LlmGateway>,
}

impl DeepResearchEngine {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<IntegrationRegistry>,
        gateway: Arc<LlmGateway>,
    ) -> Self {
        Self {
            config,
            registry,
            gateway,
        }
    }

    /// Execute a full research run and write its artifacts under
    /// `<data_root>/research/<run_id>/`
    pub async fn run(
        &self,
        question: &str,
        constraints: ResearchConstraints,
        cancel: &CancellationToken,
    ) -> Result<ResearchRun, ResearchError> {
        if self.registry.is_empty() {
            return Err(ResearchError::EmptyRegistry);
        }

        let mut run = ResearchRun::new(question, constraints);

        // Sensitivity classification comes first: it rewrites the
        // acceptance threshold for the whole run
        let report = sensitivity::classify(question);
        run.constraints.relevance_threshold =
            sensitivity::effective_threshold(run.constraints.relevance_threshold, &report);
        run.sensitive = report.sensitive;
        run.matched_markers = report.matched_markers.clone();

        let run_dir = self.config.research_dir()?.join(&run.run_id);
        std::fs::create_dir_all(&run_dir)?;
        let logger = ExecutionLogger::create(&run_dir.join("execution_log.jsonl"))?;
        let executor = ParallelExecutor::new(
            ExecutorOptions::from_config(&self.config.executor),
            logger.clone(),
        );

        logger
            .emit(LogEvent::new(
                &run.run_id,
                event::RUN_START,
                json!({
                    "question": question,
                    "constraints": run.constraints,
                }),
            ))
            .await;
        if run.sensitive {
            log::info!(
                "[DeepResearch] Sensitive question, threshold lowered to {}",
                run.constraints.relevance_threshold
            );
        }
        logger
            .emit(LogEvent::new(
                &run.run_id,
                event::SENSITIVITY_CLASSIFICATION,
                json!({
                    "sensitive": report.sensitive,
                    "matched_markers": report.matched_markers,
                    "effective_threshold": run.constraints.relevance_threshold,
                }),
            ))
            .await;

        let catalog = source_catalog(&self.registry.list_metadata());

        // Decomposition; a second failure still yields a run with a stub
        // report rather than an error
        match self.decompose(&run, &catalog).await {
            Ok(sub_questions) => {
                for sub_question in sub_questions {
                    run.add_task(&sub_question, None);
                }
            }
            Err(e) => {
                log::error!("[DeepResearch] Decomposition failed twice: {}", e);
                run.terminate(&format!("decomposition_failed: {}", e.kind().as_str()));
            }
        }

        // Task scheduling loop
        while !run.is_terminated() {
            if cancel.is_cancelled() {
                abort_open_tasks(&mut run, "cancelled");
                run.terminate("cancelled");
                break;
            }
            if run.past_deadline() {
                abort_open_tasks(&mut run, "deadline_exceeded");
                run.terminate("deadline_exceeded");
                break;
            }

            let batch: Vec<u64> = run
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .take(run.constraints.max_concurrent_tasks)
                .map(|t| t.id)
                .collect();
            if batch.is_empty() {
                run.terminate("completed");
                break;
            }

            let executions = batch.iter().filter_map(|&task_id| {
                let task = run.task(task_id).cloned()?;
                Some(self.execute_task(
                    run.run_id.clone(),
                    task,
                    run.root_question.clone(),
                    run.constraints.clone(),
                    run.deadline_at,
                    &executor,
                    &logger,
                    cancel,
                ))
            });
            let reports = join_all(executions).await;

            // Merge worker outcomes back into the run, one at a time
            for report in reports {
                let task_id = report.task.id;
                run.degraded |= report.degraded;

                let succeeded = report.task.status == TaskStatus::Success;
                let items = report.task.results.clone();
                if let Some(slot) = run.task_mut(task_id) {
                    *slot = report.task;
                }
                logger
                    .emit(
                        LogEvent::new(
                            &run.run_id,
                            event::TASK_COMPLETE,
                            json!({
                                "status": run.task(task_id).map(|t| t.status),
                                "items": items.len(),
                                "reason": run.task(task_id).and_then(|t| t.reason_for_failure.clone()),
                            }),
                        )
                        .with_task(task_id, run.task(task_id).map(|t| t.attempt).unwrap_or(0)),
                    )
                    .await;

                if !succeeded {
                    continue;
                }
                run.record_evidence(task_id, &items);
                self.extract_entities(&mut run, task_id, &logger).await;
                self.generate_follow_ups(&mut run, task_id, &logger).await;
            }
        }

        self.warn_on_low_utilization(&run);

        // Synthesis and artifacts
        let sources = synthesizer::aggregate_sources(&run);
        let (synthesis, used_stub) = synthesizer::synthesize(
            &self.gateway,
            &self.config.llm.model_synthesis,
            &run,
        )
        .await;
        let markdown = synthesizer::render_markdown(&run, &synthesis, &sources);
        std::fs::write(run_dir.join("report.md"), &markdown)?;
        std::fs::write(
            run_dir.join("research_data.json"),
            serde_json::to_string_pretty(&run)?,
        )?;

        logger
            .emit(LogEvent::new(
                &run.run_id,
                event::RUN_COMPLETE,
                json!({
                    "tasks": run.tasks.len(),
                    "successes": run.tasks.iter().filter(|t| t.status == TaskStatus::Success).count(),
                    "evidence_items": run.evidence.len(),
                    "terminated_reason": run.terminated_reason,
                    "degraded": run.degraded,
                    "stub_report": used_stub,
                }),
            ))
            .await;
        logger.shutdown().await;

        log::info!(
            "[DeepResearch] Run {} finished: {} tasks, {} evidence items ({})",
            run.run_id,
            run.tasks.len(),
            run.evidence.len(),
            run.terminated_reason.as_deref().unwrap_or("unknown")
        );
        Ok(run)
    }

    async fn decompose(
        &self,
        run: &ResearchRun,
        catalog: &str,
    ) -> Result<Vec<String>, LlmError> {
        let max_initial = (run.constraints.max_tasks / 2).max(1);
        let user = format!(
            "Research question: {}\n\nAvailable sources:\n{}\n\nGenerate at most {} sub-questions.",
            run.root_question, catalog, max_initial
        );
        let value = self
            .structured_with_simpler_retry(
                "decomposition",
                &self.config.llm.model_synthesis,
                DECOMPOSITION_PROMPT,
                SIMPLE_DECOMPOSITION_PROMPT,
                &user,
                &schemas::decomposition(),
            )
            .await?;
        let sub_questions = value["sub_questions"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .take(max_initial)
                    .collect()
            })
            .unwrap_or_default();
        Ok(sub_questions)
    }

    /// One structured call with the §7 retry policy: on any gateway error,
    /// try once more with a simpler prompt
    async fn structured_with_simpler_retry(
        &self,
        call_site: &str,
        model: &str,
        system: &str,
        simpler_system: &str,
        user: &str,
        schema: &Value,
    ) -> Result<Value, LlmError> {
        match self
            .gateway
            .structured(call_site, model, system, user, schema)
            .await
        {
            Ok(value) => Ok(value),
            Err(first) => {
                log::warn!(
                    "[DeepResearch] {} failed ({}), retrying with simpler prompt",
                    call_site,
                    first
                );
                self.gateway
                    .structured(call_site, model, simpler_system, user, schema)
                    .await
            }
        }
    }

    /// Full execution of one task, including its retry loop. Returns the
    /// terminal task; the orchestrator merges it into the run.
    #[allow(clippy::too_many_arguments)]
    async fn execute_task(
        &self,
        run_id: String,
        mut task: ResearchTask,
        root_question: String,
        constraints: ResearchConstraints,
        deadline: DateTime<Utc>,
        executor: &ParallelExecutor,
        logger: &ExecutionLogger,
        cancel: &CancellationToken,
    ) -> TaskReport {
        let catalog = source_catalog(&self.registry.list_metadata());
        let mut degraded = false;
        let mut validator_reasoning = String::new();

        loop {
            if cancel.is_cancelled() || Utc::now() >= deadline {
                let reason = if cancel.is_cancelled() {
                    "cancelled"
                } else {
                    "deadline_exceeded"
                };
                let _ = match task.status {
                    TaskStatus::Pending => task.abort(reason),
                    _ => task.fail(reason),
                };
                return TaskReport { task, degraded };
            }

            if task.start().is_err() {
                // Defensive: a task that cannot start is left as-is
                return TaskReport { task, degraded };
            }
            let scope = CohortScope::task(&run_id, task.id, task.attempt);
            logger
                .emit(
                    LogEvent::new(&run_id, event::TASK_START, json!({ "query": task.query }))
                        .with_task(task.id, task.attempt),
                )
                .await;

            // Source selection
            let selection_user = format!(
                "Task query: {}\nOriginal research question: {}\n\nSources:\n{}",
                task.query, root_question, catalog
            );
            let selected = match self
                .structured_with_simpler_retry(
                    "source_selection",
                    &self.config.llm.model_relevance,
                    SOURCE_SELECTION_PROMPT,
                    SIMPLE_SOURCE_SELECTION_PROMPT,
                    &selection_user,
                    &schemas::source_selection(),
                )
                .await
            {
                Ok(value) => value,
                Err(e) => {
                    let _ = task.fail(&format!("source selection failed: {}", e.kind().as_str()));
                    return TaskReport { task, degraded };
                }
            };
            let mut chosen: Vec<(String, String)> = selected["selected"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|entry| {
                            let id = entry["source_id"].as_str()?;
                            let reason = entry["reason"].as_str().unwrap_or_default();
                            Some((id.to_string(), reason.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default();
            chosen.retain(|(id, _)| self.registry.contains(id));
            chosen.truncate(MAX_SOURCES_PER_TASK);
            logger
                .emit(
                    LogEvent::new(
                        &run_id,
                        event::SOURCE_SELECTION,
                        json!({ "selected": chosen.iter().map(|(id, reason)| json!({
                            "source_id": id, "reason": reason })).collect::<Vec<_>>() }),
                    )
                    .with_task(task.id, task.attempt),
                )
                .await;
            if chosen.is_empty() {
                let _ = task.fail("source selection produced no registered sources");
                return TaskReport { task, degraded };
            }

            // Cohort execution
            let cohort: Vec<_> = chosen
                .iter()
                .filter_map(|(id, _)| self.registry.instantiate(id).ok())
                .collect();
            let outcome = executor
                .run_cohort(&scope, &task.query, cohort, RESULTS_PER_SOURCE, cancel)
                .await;
            degraded |= outcome.degraded;

            let source_outcomes: Vec<SourceOutcome> = outcome
                .results
                .iter()
                .map(|r| SourceOutcome {
                    source_id: r.source_id.clone(),
                    source_display_name: r.source_display_name.clone(),
                    success: r.success,
                    item_count: r.items.len(),
                    error: r.error.clone(),
                })
                .collect();

            // Aggregate and deduplicate within the task
            let mut fingerprints = HashSet::new();
            let mut items = Vec::new();
            for item in outcome.items() {
                if fingerprints.insert(evidence_fingerprint(item)) {
                    items.push(item.clone());
                }
            }

            // Relevance validation over a sample; skipped when the count
            // is already insufficient
            let mut score = 0u8;
            if items.len() >= constraints.min_results_per_task {
                let sample = items
                    .iter()
                    .take(VALIDATION_SAMPLE)
                    .enumerate()
                    .map(|(i, item)| {
                        format!("{}. {} — {}", i, item.title, truncate(&item.description, 200))
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let validation_user = format!(
                    "Task query: {}\nOriginal research question: {}\n\nSampled results:\n{}",
                    task.query, root_question, sample
                );
                let validated = match self
                    .structured_with_simpler_retry(
                        "relevance_validation",
                        &self.config.llm.model_relevance,
                        RELEVANCE_PROMPT,
                        SIMPLE_RELEVANCE_PROMPT,
                        &validation_user,
                        &schemas::relevance_validation(),
                    )
                    .await
                {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = task
                            .fail(&format!("relevance validation failed: {}", e.kind().as_str()));
                        return TaskReport { task, degraded };
                    }
                };
                score = validated["score"].as_u64().unwrap_or(0) as u8;
                validator_reasoning = validated["reasoning"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                logger
                    .emit(
                        LogEvent::new(
                            &run_id,
                            event::RELEVANCE_SCORING,
                            json!({
                                "score": score,
                                "reasoning": validator_reasoning,
                                "scope": "combined",
                                "sampled": items.len().min(VALIDATION_SAMPLE),
                            }),
                        )
                        .with_task(task.id, task.attempt),
                    )
                    .await;
            }

            // Decision
            let shortfall = if items.len() < constraints.min_results_per_task {
                Some(format!(
                    "insufficient results ({} < {})",
                    items.len(),
                    constraints.min_results_per_task
                ))
            } else if score < constraints.relevance_threshold {
                Some(format!(
                    "below relevance threshold (score {} < {})",
                    score, constraints.relevance_threshold
                ))
            } else {
                None
            };

            let Some(reason) = shortfall else {
                let _ = task.succeed(score, items, source_outcomes);
                return TaskReport { task, degraded };
            };

            if task.attempt >= constraints.max_retries_per_task {
                let _ = task.fail(&format!("{} after {} attempts", reason, task.attempt + 1));
                return TaskReport { task, degraded };
            }

            // Reformulate and retry
            let reformulate_user = format!(
                "Sub-question: {}\nWhy the last attempt failed: {}\nValidator reasoning: {}",
                task.query, reason, validator_reasoning
            );
            let reformulated = match self
                .gateway
                .structured(
                    "reformulated_query",
                    &self.config.llm.model_query_gen,
                    REFORMULATE_PROMPT,
                    &reformulate_user,
                    &schemas::reformulated_query(),
                )
                .await
            {
                Ok(value) => value,
                Err(e) => {
                    let _ = task.fail(&format!(
                        "{}; reformulation failed: {}",
                        reason,
                        e.kind().as_str()
                    ));
                    return TaskReport { task, degraded };
                }
            };
            let new_query = reformulated["query"].as_str().unwrap_or(&task.query).to_string();
            log::info!(
                "[DeepResearch] Task {} retrying with reformulated query: {}",
                task.id,
                new_query
            );
            if task.retry(&new_query).is_err() {
                return TaskReport { task, degraded };
            }
        }
    }

    /// Opportunistic entity extraction on a successful task; failures are
    /// logged and skipped, never fatal
    async fn extract_entities(
        &self,
        run: &mut ResearchRun,
        task_id: u64,
        logger: &ExecutionLogger,
    ) {
        let Some(task) = run.task(task_id) else { return };
        if task.results.is_empty() {
            return;
        }
        let sample = task
            .results
            .iter()
            .take(EXTRACTION_SAMPLE)
            .enumerate()
            .map(|(i, item)| format!("{}. {} — {}", i, item.title, truncate(&item.description, 200)))
            .collect::<Vec<_>>()
            .join("\n");
        let attempt = task.attempt;

        let value = match self
            .gateway
            .structured(
                "entity_extraction",
                &self.config.llm.model_relevance,
                ENTITY_PROMPT,
                &sample,
                &schemas::entity_extraction(),
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[DeepResearch] Entity extraction skipped: {}", e);
                return;
            }
        };

        let entities: Vec<(String, Vec<usize>)> = value["entities"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let name = entry["name"].as_str()?.to_string();
                        let indices = entry["item_indices"]
                            .as_array()?
                            .iter()
                            .filter_map(|v| v.as_u64().map(|n| n as usize))
                            .collect();
                        Some((name, indices))
                    })
                    .collect()
            })
            .unwrap_or_default();
        if entities.is_empty() {
            return;
        }

        run.merge_entities(&entities);
        if let Some(task) = run.task_mut(task_id) {
            for (name, indices) in &entities {
                *task.entities.entry(name.clone()).or_insert(0) += indices.len() as u32;
            }
        }
        logger
            .emit(
                LogEvent::new(
                    &run.run_id,
                    event::ENTITY_EXTRACTION,
                    json!({ "entities": entities.len() }),
                )
                .with_task(task_id, attempt),
            )
            .await;
    }

    /// Ask for follow-up sub-questions after a success, capped by the
    /// remaining task budget
    async fn generate_follow_ups(
        &self,
        run: &mut ResearchRun,
        task_id: u64,
        logger: &ExecutionLogger,
    ) {
        if run.remaining_task_budget() == 0 {
            return;
        }
        let Some(task) = run.task(task_id) else { return };
        let evidence = task
            .results
            .iter()
            .take(EXTRACTION_SAMPLE)
            .map(|item| format!("- {} — {}", item.title, truncate(&item.description, 150)))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Original research question: {}\nCompleted sub-question: {}\nEvidence found:\n{}",
            run.root_question, task.query, evidence
        );

        let value = match self
            .gateway
            .structured(
                "follow_ups",
                &self.config.llm.model_synthesis,
                FOLLOW_UP_PROMPT,
                &user,
                &schemas::follow_ups(),
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[DeepResearch] Follow-up generation skipped: {}", e);
                return;
            }
        };

        let mut added = Vec::new();
        if let Some(follow_ups) = value["follow_ups"].as_array() {
            for entry in follow_ups.iter().take(MAX_FOLLOW_UPS) {
                let Some(question) = entry["question"].as_str() else { continue };
                if let Some(id) = run.add_task(question, Some(task_id)) {
                    added.push(json!({
                        "task_id": id,
                        "question": question,
                        "rationale": entry["rationale"].as_str().unwrap_or_default(),
                    }));
                }
            }
        }
        if !added.is_empty() {
            logger
                .emit(
                    LogEvent::new(&run.run_id, event::FOLLOW_UP_GENERATED, json!({ "follow_ups": added }))
                        .with_task(task_id, 0),
                )
                .await;
        }
    }

    /// Warning-only check on how many selected sources actually contributed
    fn warn_on_low_utilization(&self, run: &ResearchRun) {
        let mut selected: HashSet<&str> = HashSet::new();
        let mut contributed: HashSet<&str> = HashSet::new();
        for task in &run.tasks {
            for outcome in &task.source_outcomes {
                selected.insert(&outcome.source_id);
                if outcome.success && outcome.item_count > 0 {
                    contributed.insert(&outcome.source_id);
                }
            }
        }
        if selected.is_empty() {
            return;
        }
        let utilization = contributed.len() as f64 / selected.len() as f64;
        if utilization < run.constraints.min_source_utilization {
            log::warn!(
                "[DeepResearch] Low source utilization: {}/{} selected sources contributed",
                contributed.len(),
                selected.len()
            );
        }
    }
}

/// Abort every task that has not reached a terminal state
fn abort_open_tasks(run: &mut ResearchRun, reason: &str) {
    for task in &mut run.tasks {
        if !task.status.is_terminal() {
            let result = match task.status {
                TaskStatus::Pending => task.abort(reason),
                _ => task.fail(reason),
            };
            if let Err(e) = result {
                log::error!("[DeepResearch] {}", e);
            }
        }
    }
}

/// Human-readable source list for planner prompts
fn source_catalog(metadata: &[SourceMetadata]) -> String {
    metadata
        .iter()
        .map(|meta| {
            format!(
                "- {} ({}): {}",
                meta.id,
                meta.category.as_str(),
                meta.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let cut = (0..=max).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
    format!("{}…", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::integrations::registry::testing::{StubBehavior, StubIntegration};
    use crate::llm::testing::gateway;
    use crate::llm::{ChatRequest, LlmError};
    use crate::models::SourceErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SYNTHESIS_JSON: &str = r#"{
        "executive_summary": "Evidence indicates active contract work on the topic across multiple vendors. Coverage was adequate. No contradictions surfaced. Follow-on monitoring is advised.",
        "key_findings": [
            { "finding": "alpha returned matching awards", "citations": ["alpha-item-0 (https://example.com/alpha/0)"] }
        ],
        "detailed_analysis": "The contract search surfaced consistent evidence of ongoing work.",
        "gaps": ["No pricing data was available."]
    }"#;

    /// Scripted responder that routes on distinctive prompt keywords, with
    /// a counter for per-call-site behaviors
    fn default_responder(
        relevance_scores: &'static [u8],
        relevance_calls: Arc<AtomicUsize>,
        follow_up_rounds: usize,
        follow_up_calls: Arc<AtomicUsize>,
    ) -> impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static {
        move |request: &ChatRequest| {
            let system = &request.messages[0].content;
            if system.contains("Decompose the research") || system.contains("Decompose the question") {
                Ok(r#"{"sub_questions": ["what contracts mention foo"], "approach": "search award records"}"#.to_string())
            } else if system.contains("select the 2-5") || system.contains("Select the 2-5") {
                Ok(r#"{"selected": [
                    {"source_id": "alpha", "reason": "primary award data"},
                    {"source_id": "beta", "reason": "secondary coverage"}
                ]}"#
                    .to_string())
            } else if system.contains("Score the relevance") || system.contains("score the relevance")
            {
                let n = relevance_calls.fetch_add(1, Ordering::SeqCst);
                let score = relevance_scores[n.min(relevance_scores.len() - 1)];
                Ok(format!(
                    r#"{{"score": {}, "reasoning": "attempt {} sample review"}}"#,
                    score, n
                ))
            } else if system.contains("reformulate") {
                Ok(r#"{"query": "which federal awards reference foo systems", "rationale": "broader phrasing"}"#.to_string())
            } else if system.contains("follow-up") {
                let n = follow_up_calls.fetch_add(1, Ordering::SeqCst);
                if n < follow_up_rounds {
                    Ok(r#"{"follow_ups": [{"question": "who subcontracts on the foo award", "rationale": "trace the supply chain"}]}"#.to_string())
                } else {
                    Ok(r#"{"follow_ups": []}"#.to_string())
                }
            } else if system.contains("extract named entities") {
                Ok(r#"{"entities": [
                    {"name": "Dynetics", "item_indices": [0, 1]},
                    {"name": "US Army", "item_indices": [1]}
                ]}"#
                    .to_string())
            } else if system.contains("Synthesize") || system.contains("Summarize") {
                Ok(SYNTHESIS_JSON.to_string())
            } else {
                Ok(r#"{"q": "fallback"}"#.to_string())
            }
        }
    }

    struct Harness {
        engine: DeepResearchEngine,
        _dir: tempfile::TempDir,
        data_root: std::path::PathBuf,
    }

    fn harness(
        stubs: &[(&'static str, StubBehavior)],
        critical: &[&str],
        responder: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.data_root = Some(dir.path().to_string_lossy().to_string());
        config.executor.critical_sources = critical.iter().map(|s| s.to_string()).collect();

        let mut registry = IntegrationRegistry::new();
        for (id, behavior) in stubs {
            registry
                .register(id, StubIntegration::factory(id, behavior.clone()))
                .unwrap();
        }

        let data_root = dir.path().to_path_buf();
        Harness {
            engine: DeepResearchEngine::new(
                Arc::new(config),
                Arc::new(registry),
                Arc::new(gateway(responder)),
            ),
            _dir: dir,
            data_root,
        }
    }

    fn read_artifacts(harness: &Harness, run: &ResearchRun) -> (String, String) {
        let run_dir = harness.data_root.join("research").join(&run.run_id);
        let report = std::fs::read_to_string(run_dir.join("report.md")).unwrap();
        let log = std::fs::read_to_string(run_dir.join("execution_log.jsonl")).unwrap();
        (report, log)
    }

    #[tokio::test]
    async fn test_scenario_a_happy_path_with_follow_up() {
        let harness = harness(
            &[
                ("alpha", StubBehavior::Items(5)),
                ("beta", StubBehavior::Empty),
            ],
            &[],
            default_responder(
                &[8],
                Arc::new(AtomicUsize::new(0)),
                1,
                Arc::new(AtomicUsize::new(0)),
            ),
        );

        let constraints = ResearchConstraints {
            max_tasks: 4,
            ..Default::default()
        };
        let run = harness
            .engine
            .run("what contracts mention foo", constraints, &CancellationToken::new())
            .await
            .unwrap();

        assert!(run.tasks.len() <= 4);
        assert!(run.tasks.len() >= 2, "follow-up task should have been added");
        let root = &run.tasks[0];
        assert_eq!(root.status, TaskStatus::Success);
        assert_eq!(root.relevance_score, Some(8));
        assert_eq!(run.evidence.len(), 5);
        assert!(run.tasks[1].parent_id == Some(root.id));
        assert_eq!(run.terminated_reason.as_deref(), Some("completed"));

        let (report, log) = read_artifacts(&harness, &run);
        assert!(log.contains("\"run_complete\""));
        assert!(report.contains("Stub alpha"));
        assert!(report.contains("Stub beta: no evidence found"));

        // Universal invariants
        for task in &run.tasks {
            assert!(task.attempt <= run.constraints.max_retries_per_task);
            assert!(task.status.is_terminal() || task.status == TaskStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_scenario_b_critical_source_rate_limited() {
        let harness = harness(
            &[
                ("alpha", StubBehavior::Fail(SourceErrorKind::RateLimited)),
                ("beta", StubBehavior::Items(3)),
            ],
            &["alpha"],
            default_responder(
                &[7],
                Arc::new(AtomicUsize::new(0)),
                0,
                Arc::new(AtomicUsize::new(0)),
            ),
        );

        let run = harness
            .engine
            .run("latest X", ResearchConstraints::default(), &CancellationToken::new())
            .await
            .unwrap();

        let root = &run.tasks[0];
        assert_eq!(root.status, TaskStatus::Success);
        assert_eq!(root.results.len(), 3);
        assert!(run.degraded);

        let (report, log) = read_artifacts(&harness, &run);
        assert!(log.contains("\"critical_source_failure\""));
        assert!(report.contains("Stub alpha: FAILED (rate_limited)"));
        assert!(report.contains("partial coverage"));
    }

    #[tokio::test]
    async fn test_scenario_c_retry_with_reformulation() {
        let relevance_calls = Arc::new(AtomicUsize::new(0));
        let harness = harness(
            &[("alpha", StubBehavior::Items(5))],
            &[],
            {
                // Score 1 on attempt 0, 8 on attempt 1
                let responder = default_responder(
                    &[1, 8],
                    relevance_calls.clone(),
                    0,
                    Arc::new(AtomicUsize::new(0)),
                );
                move |request: &ChatRequest| {
                    // Only alpha is registered for this scenario
                    let system = &request.messages[0].content;
                    if system.contains("Select the 2-5") || system.contains("select the 2-5") {
                        return Ok(r#"{"selected": [{"source_id": "alpha", "reason": "only source"}]}"#.to_string());
                    }
                    responder(request)
                }
            },
        );

        let run = harness
            .engine
            .run("what contracts mention foo", ResearchConstraints::default(), &CancellationToken::new())
            .await
            .unwrap();

        let root = &run.tasks[0];
        assert_eq!(root.status, TaskStatus::Success);
        assert_eq!(root.attempt, 1);
        assert_eq!(root.relevance_score, Some(8));
        assert_eq!(root.query, "which federal awards reference foo systems");
        assert_eq!(root.results.len(), 5);
        assert_eq!(relevance_calls.load(Ordering::SeqCst), 2);

        let (_, log) = read_artifacts(&harness, &run);
        let attempt0_starts = log
            .lines()
            .filter(|l| l.contains("\"task_start\"") && l.contains("\"attempt\":0"))
            .count();
        let attempt1_starts = log
            .lines()
            .filter(|l| l.contains("\"task_start\"") && l.contains("\"attempt\":1"))
            .count();
        assert!(attempt0_starts >= 1 && attempt1_starts >= 1);
    }

    #[tokio::test]
    async fn test_scenario_d_sensitive_question_lowers_threshold() {
        let harness = harness(
            &[
                ("alpha", StubBehavior::Items(5)),
                ("beta", StubBehavior::Empty),
            ],
            &[],
            default_responder(
                // Would be rejected at the public threshold of 3
                &[2],
                Arc::new(AtomicUsize::new(0)),
                0,
                Arc::new(AtomicUsize::new(0)),
            ),
        );

        let run = harness
            .engine
            .run(
                "what classified programs mention foo",
                ResearchConstraints::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(run.sensitive);
        assert_eq!(run.constraints.relevance_threshold, 1);
        assert!(run.matched_markers.contains(&"classified".to_string()));
        assert_eq!(run.tasks[0].status, TaskStatus::Success);
        assert_eq!(run.tasks[0].relevance_score, Some(2));

        let (_, log) = read_artifacts(&harness, &run);
        assert!(log.contains("\"sensitivity_classification\""));
        assert!(log.contains("classified"));
    }

    #[tokio::test]
    async fn test_task_fails_after_retries_without_aborting_run() {
        // Always-insufficient source: every attempt yields 0 items
        let harness = harness(
            &[("alpha", StubBehavior::Empty), ("beta", StubBehavior::Empty)],
            &[],
            default_responder(
                &[8],
                Arc::new(AtomicUsize::new(0)),
                0,
                Arc::new(AtomicUsize::new(0)),
            ),
        );

        let run = harness
            .engine
            .run("what contracts mention foo", ResearchConstraints::default(), &CancellationToken::new())
            .await
            .unwrap();

        let root = &run.tasks[0];
        assert_eq!(root.status, TaskStatus::Failed);
        assert_eq!(root.attempt, run.constraints.max_retries_per_task);
        assert!(root
            .reason_for_failure
            .as_deref()
            .unwrap()
            .contains("insufficient results"));
        // The run itself still completes and writes a report
        assert_eq!(run.terminated_reason.as_deref(), Some("completed"));
        let (report, log) = read_artifacts(&harness, &run);
        assert!(log.contains("\"run_complete\""));
        assert!(report.contains("failed"));
    }

    #[tokio::test]
    async fn test_decomposition_failure_yields_stub_run() {
        let harness = harness(
            &[("alpha", StubBehavior::Items(5))],
            &[],
            |request: &ChatRequest| {
                let system = &request.messages[0].content;
                if system.contains("Decompose") {
                    Err(LlmError::Refusal("no plan".to_string()))
                } else {
                    Ok(SYNTHESIS_JSON.to_string())
                }
            },
        );

        let run = harness
            .engine
            .run("anything", ResearchConstraints::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(run.tasks.is_empty());
        assert!(run
            .terminated_reason
            .as_deref()
            .unwrap()
            .starts_with("decomposition_failed"));
        let (_, log) = read_artifacts(&harness, &run);
        assert!(log.contains("\"run_start\""));
        assert!(log.contains("\"run_complete\""));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_aborts_cleanly() {
        let harness = harness(
            &[("alpha", StubBehavior::Items(5))],
            &[],
            default_responder(
                &[8],
                Arc::new(AtomicUsize::new(0)),
                0,
                Arc::new(AtomicUsize::new(0)),
            ),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = harness
            .engine
            .run("question", ResearchConstraints::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(run.terminated_reason.as_deref(), Some("cancelled"));
        assert!(run
            .tasks
            .iter()
            .all(|t| t.status == TaskStatus::Aborted || t.status.is_terminal()));
    }
}
