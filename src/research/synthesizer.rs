//! Report synthesis
//!
//! One gateway call turns the run's task records into the final report.
//! The model only ever sees evidence that is actually in the run and is
//! told to mark gaps as "no evidence found" instead of inventing
//! citations. A failed synthesis falls back once to a simpler prompt and
//! then to a stub report that states the truncation plainly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::run::ResearchRun;
use super::task::TaskStatus;
use crate::llm::{schemas, LlmGateway};

/// Evidence items quoted per task in the synthesis prompt
const PROMPT_ITEMS_PER_TASK: usize = 5;
/// Entities listed in the report's network section
const TOP_ENTITIES: usize = 10;

const SYNTHESIS_PROMPT: &str = "You are an investigative research analyst. Synthesize \
the research run below into a report. Produce a JSON object with:\n\
- executive_summary: 3-5 sentences\n\
- key_findings: array of { finding, citations }, each citation the exact \
\"title (url)\" of an evidence item given below\n\
- detailed_analysis: one or more paragraphs per successful task, markdown\n\
- entity_summary (optional): a paragraph on the entity network\n\
- gaps: array of open questions the evidence could not answer\n\
Cite ONLY evidence listed below. Where evidence is missing, say \"no \
evidence found\" rather than guessing. If coverage was degraded, say so \
honestly. Output only the JSON object.";

const SIMPLE_SYNTHESIS_PROMPT: &str = "Summarize the research evidence below as JSON \
with fields executive_summary (string), key_findings (array of {finding, \
citations}), detailed_analysis (string), gaps (array of strings). Cite only \
listed evidence. Output only the JSON object.";

/// Parsed synthesis output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub executive_summary: String,
    #[serde(default)]
    pub key_findings: Vec<KeyFinding>,
    pub detailed_analysis: String,
    #[serde(default)]
    pub entity_summary: Option<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFinding {
    pub finding: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Per-source tallies for the sources-consulted section
#[derive(Debug, Default, Clone)]
pub struct SourcesConsulted {
    /// source display name -> items contributed
    pub contributed: BTreeMap<String, usize>,
    /// sources that answered but had nothing
    pub empty: Vec<String>,
    /// source display name -> error kind string
    pub failed: BTreeMap<String, String>,
}

/// Aggregate every task's per-source outcomes into the three groups the
/// report must distinguish
pub fn aggregate_sources(run: &ResearchRun) -> SourcesConsulted {
    let mut consulted = SourcesConsulted::default();
    let mut saw_empty: BTreeMap<String, bool> = BTreeMap::new();

    for task in &run.tasks {
        for outcome in &task.source_outcomes {
            let name = outcome.source_display_name.clone();
            if outcome.success && outcome.item_count > 0 {
                *consulted.contributed.entry(name).or_insert(0) += outcome.item_count;
            } else if outcome.success {
                saw_empty.entry(name).or_insert(true);
            } else if let Some(ref error) = outcome.error {
                consulted
                    .failed
                    .entry(name)
                    .or_insert_with(|| error.kind.as_str().to_string());
            }
        }
    }
    // A source that contributed anywhere is not "empty"
    consulted.empty = saw_empty
        .into_keys()
        .filter(|name| !consulted.contributed.contains_key(name) && !consulted.failed.contains_key(name))
        .collect();
    consulted
}

/// Build the synthesis prompt from the run's records
pub fn build_prompt(run: &ResearchRun, brief: bool) -> String {
    let mut prompt = format!("Research question: {}\n", run.root_question);
    if run.sensitive {
        prompt.push_str("The question touched sensitive topics; public evidence is expected to be sparse and oblique.\n");
    }
    if run.degraded {
        prompt.push_str("Coverage was DEGRADED: at least one critical source failed during the run.\n");
    }
    let failed = run
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count();
    if failed > 0 {
        prompt.push_str(&format!("{} of {} tasks failed; their reasons are listed below.\n", failed, run.tasks.len()));
    }

    prompt.push_str("\nTasks and evidence:\n");
    for task in &run.tasks {
        prompt.push_str(&format!(
            "\nTask {} ({}{}, attempt {}, score {}): {}\n",
            task.id,
            status_word(task.status),
            task.parent_id
                .map(|p| format!(", follow-up of task {}", p))
                .unwrap_or_default(),
            task.attempt,
            task.relevance_score
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            task.query
        ));
        if let Some(ref reason) = task.reason_for_failure {
            prompt.push_str(&format!("  failure reason: {}\n", reason));
        }
        if brief {
            continue;
        }
        for item in task.results.iter().take(PROMPT_ITEMS_PER_TASK) {
            prompt.push_str(&format!(
                "  - {} ({}) {}\n    {}\n",
                item.title,
                if item.url.is_empty() { "no url" } else { &item.url },
                item.date,
                truncate(&item.description, 200)
            ));
        }
        if task.results.len() > PROMPT_ITEMS_PER_TASK {
            prompt.push_str(&format!(
                "  ... and {} more items\n",
                task.results.len() - PROMPT_ITEMS_PER_TASK
            ));
        }
    }

    let top = run.top_entities(TOP_ENTITIES);
    if !top.is_empty() {
        prompt.push_str("\nEntity co-occurrence (weight):\n");
        for (entity, weight) in top {
            prompt.push_str(&format!("  {} ({})\n", entity, weight));
        }
    }
    prompt
}

/// Call the gateway for the synthesis, retrying once with a simpler prompt
/// before falling back to the stub. Returns the report and whether the
/// stub path was taken.
pub async fn synthesize(
    gateway: &LlmGateway,
    model: &str,
    run: &ResearchRun,
) -> (SynthesisReport, bool) {
    let schema = schemas::synthesis();
    let attempts = [
        (SYNTHESIS_PROMPT, build_prompt(run, false)),
        (SIMPLE_SYNTHESIS_PROMPT, build_prompt(run, true)),
    ];
    for (system, user) in &attempts {
        match gateway
            .structured("synthesis", model, system, user, &schema)
            .await
        {
            Ok(value) => match serde_json::from_value::<SynthesisReport>(value) {
                Ok(report) => return (report, false),
                Err(e) => log::warn!("[Synthesizer] Schema-valid output failed to parse: {}", e),
            },
            Err(e) => log::warn!("[Synthesizer] Synthesis call failed: {}", e),
        }
    }
    (stub_report(run), true)
}

/// Honest placeholder when synthesis itself failed
pub fn stub_report(run: &ResearchRun) -> SynthesisReport {
    let successes = run
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Success)
        .count();
    SynthesisReport {
        executive_summary: format!(
            "Report synthesis failed; this is a stub. The run executed {} tasks ({} successful) \
             and collected {} evidence items for the question: {}. The raw task records in \
             research_data.json are complete.",
            run.tasks.len(),
            successes,
            run.evidence.len(),
            run.root_question
        ),
        key_findings: Vec::new(),
        detailed_analysis: "No synthesized analysis is available. Consult the evidence index \
                            and per-task results directly."
            .to_string(),
        entity_summary: None,
        gaps: vec!["Synthesis did not run; all findings remain unreviewed.".to_string()],
    }
}

/// Render the final report.md
pub fn render_markdown(
    run: &ResearchRun,
    report: &SynthesisReport,
    sources: &SourcesConsulted,
) -> String {
    let mut out = format!("# Research Report: {}\n\n", run.root_question);
    out.push_str(&format!("Run `{}`", run.run_id));
    if run.sensitive {
        out.push_str(" — sensitive topic, acceptance threshold lowered");
    }
    out.push_str("\n\n## Executive Summary\n\n");
    out.push_str(&report.executive_summary);
    out.push('\n');

    if run.degraded {
        out.push_str(
            "\n> **Coverage note:** one or more critical sources failed during this run; \
             findings below reflect partial coverage.\n",
        );
    }

    out.push_str("\n## Key Findings\n\n");
    if report.key_findings.is_empty() {
        out.push_str("No key findings were produced.\n");
    }
    for finding in &report.key_findings {
        out.push_str(&format!("- {}\n", finding.finding));
        for citation in &finding.citations {
            out.push_str(&format!("  - {}\n", citation));
        }
    }

    out.push_str("\n## Detailed Analysis\n\n");
    out.push_str(&report.detailed_analysis);
    out.push('\n');

    let top = run.top_entities(TOP_ENTITIES);
    if !top.is_empty() || report.entity_summary.is_some() {
        out.push_str("\n## Entity Network\n\n");
        if let Some(ref summary) = report.entity_summary {
            out.push_str(summary);
            out.push_str("\n\n");
        }
        for (entity, weight) in top {
            let mentions = run.entity_mentions.get(&entity).copied().unwrap_or(0);
            out.push_str(&format!(
                "- {} (co-occurrence weight {}, {} mentions)\n",
                entity, weight, mentions
            ));
        }
    }

    if !report.gaps.is_empty() {
        out.push_str("\n## Gaps\n\n");
        for gap in &report.gaps {
            out.push_str(&format!("- {}\n", gap));
        }
    }

    out.push_str("\n## Sources Consulted\n\n");
    if sources.contributed.is_empty() && sources.empty.is_empty() && sources.failed.is_empty() {
        out.push_str("No sources were consulted.\n");
    }
    for (name, count) in &sources.contributed {
        out.push_str(&format!("- {}: {} items\n", name, count));
    }
    for name in &sources.empty {
        out.push_str(&format!("- {}: no evidence found\n", name));
    }
    for (name, kind) in &sources.failed {
        out.push_str(&format!("- {}: FAILED ({})\n", name, kind));
    }

    out.push_str("\n## Methodology\n\n");
    out.push_str(&format!(
        "{} tasks, {} evidence items, started {}, {}.\n\n",
        run.tasks.len(),
        run.evidence.len(),
        run.started_at.to_rfc3339(),
        run.terminated_reason.as_deref().unwrap_or("in progress")
    ));
    for task in &run.tasks {
        let indent = if task.parent_id.is_some() { "  " } else { "" };
        out.push_str(&format!(
            "{}- Task {} [{}] attempt {} — {}{}\n",
            indent,
            task.id,
            status_word(task.status),
            task.attempt,
            task.query,
            task.reason_for_failure
                .as_deref()
                .map(|r| format!(" ({})", r))
                .unwrap_or_default()
        ));
    }
    out
}

fn status_word(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Retrying => "retrying",
        TaskStatus::Success => "success",
        TaskStatus::Failed => "failed",
        TaskStatus::Aborted => "aborted",
    }
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
    use crate::models::{SourceError, SourceErrorKind};
    use crate::research::task::SourceOutcome;
    use crate::research::ResearchConstraints;

    fn run_with_outcomes() -> ResearchRun {
        let mut run = ResearchRun::new("what contracts mention foo", ResearchConstraints::default());
        run.add_task("sub-question", None);
        let task = run.task_mut(1).unwrap();
        task.start().unwrap();
        task.succeed(
            8,
            Vec::new(),
            vec![
                SourceOutcome {
                    source_id: "alpha".to_string(),
                    source_display_name: "Stub alpha".to_string(),
                    success: true,
                    item_count: 5,
                    error: None,
                },
                SourceOutcome {
                    source_id: "beta".to_string(),
                    source_display_name: "Stub beta".to_string(),
                    success: true,
                    item_count: 0,
                    error: None,
                },
                SourceOutcome {
                    source_id: "gamma".to_string(),
                    source_display_name: "Stub gamma".to_string(),
                    success: false,
                    item_count: 0,
                    error: Some(SourceError::new(
                        SourceErrorKind::RateLimited,
                        "gamma",
                        "429",
                    )),
                },
            ],
        )
        .unwrap();
        run
    }

    #[test]
    fn test_aggregate_sources_three_groups() {
        let run = run_with_outcomes();
        let sources = aggregate_sources(&run);
        assert_eq!(sources.contributed.get("Stub alpha"), Some(&5));
        assert_eq!(sources.empty, vec!["Stub beta".to_string()]);
        assert_eq!(
            sources.failed.get("Stub gamma").map(String::as_str),
            Some("rate_limited")
        );
    }

    #[test]
    fn test_render_distinguishes_source_groups() {
        let run = run_with_outcomes();
        let sources = aggregate_sources(&run);
        let markdown = render_markdown(&run, &stub_report(&run), &sources);
        assert!(markdown.contains("Stub alpha: 5 items"));
        assert!(markdown.contains("Stub beta: no evidence found"));
        assert!(markdown.contains("Stub gamma: FAILED (rate_limited)"));
        assert!(markdown.contains("## Methodology"));
    }

    #[test]
    fn test_degraded_run_gets_coverage_note() {
        let mut run = run_with_outcomes();
        run.degraded = true;
        let markdown = render_markdown(&run, &stub_report(&run), &aggregate_sources(&run));
        assert!(markdown.contains("partial coverage"));
    }

    #[test]
    fn test_prompt_mentions_failures_and_entities() {
        let mut run = run_with_outcomes();
        run.add_task("doomed", None);
        {
            let task = run.task_mut(2).unwrap();
            task.start().unwrap();
            task.fail("insufficient results").unwrap();
        }
        run.merge_entities(&[
            ("Dynetics".to_string(), vec![0, 1]),
            ("US Army".to_string(), vec![0]),
        ]);
        let prompt = build_prompt(&run, false);
        assert!(prompt.contains("1 of 2 tasks failed"));
        assert!(prompt.contains("failure reason: insufficient results"));
        assert!(prompt.contains("Entity co-occurrence"));
    }

    #[tokio::test]
    async fn test_synthesize_falls_back_to_stub() {
        let gateway = crate::llm::testing::gateway(|_| {
            Err(crate::llm::LlmError::RateLimited("busy".to_string()))
        });
        let run = run_with_outcomes();
        let (report, used_stub) = synthesize(&gateway, "gpt-4o", &run).await;
        assert!(used_stub);
        assert!(report.executive_summary.contains("stub"));
    }
}
