//! Boolean keyword monitoring
//!
//! A monitor is a persisted keyword × source configuration run on a
//! cadence: fan the keywords through the executor, deduplicate against
//! the persistent seen-set, score relevance, emit one alert per run, and
//! atomically persist the grown seen-set. The seen-set absorbs every
//! fingerprint processed this run, not just the retained ones, so a
//! once-seen item never re-alerts even if its relevance later rises.

pub mod alerts;
pub mod scheduler;
pub mod state;

pub use alerts::{Alert, AlertChannels, AlertItem};
pub use scheduler::{InFlightGuard, Schedule};
pub use state::MonitorState;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;
use crate::dedup;
use crate::executor::{CancellationToken, CohortScope, ExecutorOptions, ParallelExecutor};
use crate::integrations::{Integration, IntegrationRegistry};
use crate::llm::{schemas, LlmGateway};
use crate::logging::{event, ExecutionLogger, LogEvent};
use crate::models::ResultItem;

/// Per-source item cap for each keyword cohort
const RESULTS_PER_SOURCE: usize = 25;
/// Snippet length in alert items
const SNIPPET_CHARS: usize = 280;

const MONITOR_RELEVANCE_PROMPT: &str = "You score whether a search hit genuinely matches \
a monitoring keyword set, on an integer scale 0-10 (0 = coincidental term \
overlap, 10 = exactly what the monitor watches for). Produce a JSON object \
{\"score\": n, \"reasoning\": \"...\"}. Output only the JSON object.";

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("no monitor named '{0}'")]
    UnknownMonitor(String),
    #[error("monitor '{0}' is disabled")]
    Disabled(String),
    #[error("monitor '{0}' is already running")]
    AlreadyRunning(String),
    #[error("monitor config invalid: {0}")]
    InvalidConfig(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("state error: {0}")]
    StateError(#[from] state::StateError),
    #[error("configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

fn default_threshold() -> u8 {
    6
}

fn default_enabled() -> bool {
    true
}

/// User-edited monitor definition, one YAML file per monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    pub name: String,
    /// Each keyword may embed quoted phrases and AND/OR/NOT operators
    pub keywords: Vec<String>,
    pub sources: Vec<String>,
    pub schedule: Schedule,
    #[serde(default)]
    pub alert_channels: AlertChannels,
    #[serde(default = "default_threshold")]
    pub relevance_threshold: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl MonitorConfig {
    /// Load `<configs_dir>/<name>.yaml`
    pub fn load(configs_dir: &Path, name: &str) -> Result<Self, MonitorError> {
        let path = configs_dir.join(format!("{}.yaml", name));
        if !path.exists() {
            return Err(MonitorError::UnknownMonitor(name.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Load every `*.yaml` under the configs directory
    pub fn load_all(configs_dir: &Path) -> Result<Vec<Self>, MonitorError> {
        let mut monitors = Vec::new();
        if !configs_dir.exists() {
            return Ok(monitors);
        }
        for entry in std::fs::read_dir(configs_dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_yaml::from_str::<Self>(&content) {
                Ok(monitor) => monitors.push(monitor),
                Err(e) => log::error!("[Monitor] Skipping invalid config {:?}: {}", path, e),
            }
        }
        monitors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(monitors)
    }
}

/// What one monitor run did; returned to the caller and recorded in logs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub monitor_name: String,
    pub new_matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_path: Option<PathBuf>,
    pub candidates: usize,
    pub dropped_seen: usize,
    pub dropped_near_duplicate: usize,
    pub dropped_low_relevance: usize,
    pub scoring_failures: usize,
    pub failed_sources: usize,
}

/// Scheduled multi-source keyword monitoring
pub struct BooleanMonitor {
    config: Arc<AppConfig>,
    registry: Arc<IntegrationRegistry>,
    gateway: Arc<LlmGateway>,
    in_flight: InFlightGuard,
}

impl BooleanMonitor {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<IntegrationRegistry>,
        gateway: Arc<LlmGateway>,
    ) -> Self {
        Self {
            config,
            registry,
            gateway,
            in_flight: InFlightGuard::new(),
        }
    }

    /// Load a monitor config by name and run one cycle
    pub async fn run_by_name(&self, name: &str) -> Result<AlertSummary, MonitorError> {
        let monitor = MonitorConfig::load(&self.config.monitors_config_dir()?, name)?;
        self.run(&monitor).await
    }

    /// One full monitor cycle
    pub async fn run(&self, monitor: &MonitorConfig) -> Result<AlertSummary, MonitorError> {
        if !monitor.enabled {
            return Err(MonitorError::Disabled(monitor.name.clone()));
        }
        let ran_at = Utc::now();
        let run_id = format!("monitor_{}_{}", monitor.name, ran_at.format("%Y%m%d_%H%M%S"));
        let log_path = self
            .config
            .ops_log_dir()?
            .join(format!("{}.jsonl", ran_at.format("%Y-%m-%d")));
        let logger = ExecutionLogger::create(&log_path)?;

        let Some(_slot) = self.in_flight.try_begin(&monitor.name) else {
            logger
                .emit(LogEvent::new(
                    &run_id,
                    event::MONITOR_SKIPPED,
                    json!({ "monitor": monitor.name, "reason": "previous run still in flight" }),
                ))
                .await;
            logger.shutdown().await;
            return Err(MonitorError::AlreadyRunning(monitor.name.clone()));
        };

        logger
            .emit(LogEvent::new(
                &run_id,
                event::RUN_START,
                json!({
                    "monitor": monitor.name,
                    "keywords": monitor.keywords,
                    "sources": monitor.sources,
                    "relevance_threshold": monitor.relevance_threshold,
                }),
            ))
            .await;

        let executor = ParallelExecutor::new(
            ExecutorOptions::from_config(&self.config.executor),
            logger.clone(),
        );
        let mut state = MonitorState::load(&self.config.monitors_state_dir()?, &monitor.name)?;
        let cancel = CancellationToken::new();
        let scope = CohortScope::run(&run_id);

        // Fan keywords × sources through the executor
        let mut pool: Vec<ResultItem> = Vec::new();
        let mut keyword_of: HashMap<String, String> = HashMap::new();
        let mut display_names: HashMap<String, String> = HashMap::new();
        let mut failed_sources: BTreeMap<String, String> = BTreeMap::new();
        for keyword in &monitor.keywords {
            let cohort: Vec<Arc<dyn Integration>> = monitor
                .sources
                .iter()
                .filter_map(|id| match self.registry.instantiate(id) {
                    Ok(adapter) => Some(adapter),
                    Err(e) => {
                        log::warn!("[Monitor] {}: {}", monitor.name, e);
                        None
                    }
                })
                .collect();
            let outcome = executor
                .run_cohort(&scope, keyword, cohort, RESULTS_PER_SOURCE, &cancel)
                .await;
            for result in &outcome.results {
                display_names.insert(result.source_id.clone(), result.source_display_name.clone());
                if !result.success {
                    if let Some(ref error) = result.error {
                        failed_sources.insert(
                            result.source_display_name.clone(),
                            error.kind.as_str().to_string(),
                        );
                    }
                }
            }
            for item in outcome.items() {
                keyword_of
                    .entry(dedup::monitor_fingerprint(item))
                    .or_insert_with(|| keyword.clone());
                pool.push(item.clone());
            }
        }

        // Deduplicate against the persistent seen-set, then collapse
        // near-duplicates
        let candidates = pool.len();
        let deduped = dedup::dedupe(pool, &state.seen_fingerprints);
        for near in &deduped.near_duplicates {
            logger
                .emit(LogEvent::new(
                    &run_id,
                    event::FILTER_DECISION,
                    json!({
                        "decision": "near_duplicate",
                        "dropped": near.dropped_title,
                        "kept": near.kept_title,
                        "similarity": near.similarity,
                    }),
                ))
                .await;
        }

        // LLM relevance scoring against the keyword set
        let keyword_set = monitor.keywords.join("; ");
        let mut retained: Vec<AlertItem> = Vec::new();
        let mut dropped_low_relevance = 0usize;
        let mut scoring_failures = 0usize;
        for item in &deduped.fresh {
            let user = format!(
                "Monitor keywords: {}\n\nHit:\ntitle: {}\ndate: {}\ntext: {}",
                keyword_set,
                item.title,
                item.date,
                truncate(&item.description, 600)
            );
            let scored = self
                .gateway
                .structured(
                    "monitor_relevance",
                    &self.config.llm.model_relevance,
                    MONITOR_RELEVANCE_PROMPT,
                    &user,
                    &schemas::monitor_relevance(),
                )
                .await;
            match scored {
                Ok(value) => {
                    let score = value["score"].as_u64().unwrap_or(0) as u8;
                    logger
                        .emit(LogEvent::new(
                            &run_id,
                            event::RELEVANCE_SCORING,
                            json!({
                                "title": item.title,
                                "score": score,
                                "reasoning": value["reasoning"],
                                "scope": "combined",
                            }),
                        ))
                        .await;
                    if score >= monitor.relevance_threshold {
                        retained.push(AlertItem {
                            title: item.title.clone(),
                            url: item.url.clone(),
                            date: item.date.clone(),
                            snippet: truncate(&item.description, SNIPPET_CHARS),
                            matched_keyword: keyword_of
                                .get(&dedup::monitor_fingerprint(item))
                                .cloned()
                                .unwrap_or_default(),
                            relevance_score: score,
                            source_display_name: display_names
                                .get(&item.source_id)
                                .cloned()
                                .unwrap_or_else(|| item.source_id.clone()),
                        });
                    } else {
                        dropped_low_relevance += 1;
                        logger
                            .emit(LogEvent::new(
                                &run_id,
                                event::FILTER_DECISION,
                                json!({
                                    "decision": "below_threshold",
                                    "title": item.title,
                                    "score": score,
                                    "threshold": monitor.relevance_threshold,
                                }),
                            ))
                            .await;
                    }
                }
                Err(e) => {
                    // Back-pressure policy: no tight retry loops; the item
                    // stays in the seen-set and simply never alerts
                    scoring_failures += 1;
                    log::warn!(
                        "[Monitor] {}: relevance scoring failed for '{}': {}",
                        monitor.name,
                        item.title,
                        e
                    );
                }
            }
        }

        // One alert per run, only when something survived
        let mut alert_path = None;
        let new_matches = retained.len();
        if !retained.is_empty() {
            let failed: Vec<alerts::FailedSource> = failed_sources
                .iter()
                .map(|(name, kind)| alerts::FailedSource {
                    source_display_name: name.clone(),
                    error_kind: kind.clone(),
                })
                .collect();
            let alert = Alert::new(&monitor.name, retained, failed);
            let path = alert.write_record(&self.config.monitors_alerts_dir()?)?;
            alert.dispatch(&monitor.alert_channels).await;
            logger
                .emit(LogEvent::new(
                    &run_id,
                    event::ALERT_EMITTED,
                    json!({
                        "monitor": monitor.name,
                        "items": alert.item_count,
                        "path": path,
                    }),
                ))
                .await;
            alert_path = Some(path);
        }

        // Persist the grown seen-set only after the run succeeded
        state.absorb(deduped.processed_fingerprints.iter().cloned(), ran_at);
        state.save(&self.config.monitors_state_dir()?, &monitor.name)?;

        let summary = AlertSummary {
            monitor_name: monitor.name.clone(),
            new_matches,
            alert_path,
            candidates,
            dropped_seen: deduped.dropped_seen + deduped.dropped_in_batch,
            dropped_near_duplicate: deduped.near_duplicates.len(),
            dropped_low_relevance,
            scoring_failures,
            failed_sources: failed_sources.len(),
        };
        logger
            .emit(LogEvent::new(
                &run_id,
                event::RUN_COMPLETE,
                serde_json::to_value(&summary).unwrap_or_default(),
            ))
            .await;
        logger.shutdown().await;

        log::info!(
            "[Monitor] {}: {} candidates, {} new matches",
            monitor.name,
            summary.candidates,
            summary.new_matches
        );
        Ok(summary)
    }

    /// Run every enabled monitor that is due now; overlapping triggers are
    /// dropped per monitor
    pub async fn run_due(&self) -> Result<Vec<AlertSummary>, MonitorError> {
        let configs_dir = self.config.monitors_config_dir()?;
        let state_dir = self.config.monitors_state_dir()?;
        let now = Utc::now();
        let mut summaries = Vec::new();
        for monitor in MonitorConfig::load_all(&configs_dir)? {
            if !monitor.enabled {
                continue;
            }
            let last_run = MonitorState::load(&state_dir, &monitor.name)?.last_run_at;
            if !monitor.schedule.is_due(last_run, now) {
                continue;
            }
            match self.run(&monitor).await {
                Ok(summary) => summaries.push(summary),
                Err(MonitorError::AlreadyRunning(name)) => {
                    log::info!("[Monitor] {} trigger dropped: still in flight", name);
                }
                Err(e) => log::error!("[Monitor] {} failed: {}", monitor.name, e),
            }
        }
        Ok(summaries)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let cut = (0..=max).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
    format!("{}…", &text[..cut])
}
