//! Parallel executor
//!
//! Runs one query string across a cohort of integrations in three phases:
//! a concurrent relevance gate, concurrent query generation, and
//! semaphore-bounded search execution. Failures never cross source
//! boundaries: every adapter that survives query generation yields exactly
//! one `QueryResult`, failed or not.

use futures_util::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::ExecutorConfig;
use crate::integrations::Integration;
use crate::logging::{event, ExecutionLogger, LogEvent};
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, SourceError, SourceErrorKind,
};

/// Token for cancelling in-flight cohort work.
///
/// Clone it into the work and call `cancel()` from outside; every phase
/// checks it between steps and races long calls against it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when `cancel()` is called; for racing against slow calls
    pub async fn cancelled_wait(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Knobs for one cohort execution
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Semaphore width for phase-3 upstream calls
    pub concurrency: usize,
    pub relevance_timeout: Duration,
    pub query_gen_timeout: Duration,
    pub exec_timeout: Duration,
    /// Sources whose failure flags the whole cohort as degraded
    pub critical_sources: HashSet<String>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            relevance_timeout: Duration::from_secs(5),
            query_gen_timeout: Duration::from_secs(30),
            exec_timeout: Duration::from_secs(60),
            critical_sources: HashSet::new(),
        }
    }
}

impl ExecutorOptions {
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            relevance_timeout: Duration::from_secs(config.relevance_timeout_seconds),
            query_gen_timeout: Duration::from_secs(config.query_gen_timeout_seconds),
            exec_timeout: Duration::from_secs(config.timeout_seconds),
            critical_sources: config.critical_sources.iter().cloned().collect(),
        }
    }

    pub fn with_critical(mut self, sources: impl IntoIterator<Item = String>) -> Self {
        self.critical_sources = sources.into_iter().collect();
        self
    }
}

/// An integration dropped before search execution, and why
#[derive(Debug, Clone)]
pub struct RejectedIntegration {
    pub source_id: String,
    pub reason: String,
}

/// Aggregate outcome of one cohort execution
#[derive(Debug, Clone, Default)]
pub struct CohortOutcome {
    /// One entry per integration that reached phase 3, keyed by source_id;
    /// no cross-source ordering is guaranteed
    pub results: Vec<QueryResult>,
    /// Integrations dropped in phases 1-2 with their reasons
    pub rejected: Vec<RejectedIntegration>,
    /// True when a critical source failed
    pub degraded: bool,
}

impl CohortOutcome {
    /// All items across successful results
    pub fn items(&self) -> impl Iterator<Item = &crate::models::ResultItem> {
        self.results
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.items.iter())
    }
}

/// Scope for log events emitted during a cohort
#[derive(Debug, Clone)]
pub struct CohortScope {
    pub run_id: String,
    pub task_id: Option<u64>,
    pub attempt: Option<u32>,
}

impl CohortScope {
    pub fn run(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            task_id: None,
            attempt: None,
        }
    }

    pub fn task(run_id: &str, task_id: u64, attempt: u32) -> Self {
        Self {
            run_id: run_id.to_string(),
            task_id: Some(task_id),
            attempt: Some(attempt),
        }
    }

    fn event(&self, event_type: &str, payload: serde_json::Value) -> LogEvent {
        let mut event = LogEvent::new(&self.run_id, event_type, payload);
        event.task_id = self.task_id;
        event.attempt = self.attempt;
        event
    }
}

/// Three-phase fan-out over a cohort of integrations
pub struct ParallelExecutor {
    options: ExecutorOptions,
    logger: ExecutionLogger,
}

impl ParallelExecutor {
    pub fn new(options: ExecutorOptions, logger: ExecutionLogger) -> Self {
        Self { options, logger }
    }

    /// Run `question` across `cohort`, honouring timeouts, the concurrency
    /// bound, and the cancellation token
    pub async fn run_cohort(
        &self,
        scope: &CohortScope,
        question: &str,
        cohort: Vec<Arc<dyn Integration>>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> CohortOutcome {
        let mut outcome = CohortOutcome::default();

        // Phase 1: relevance gate
        let gate_checks = cohort.into_iter().map(|adapter| async move {
            let relevant = timeout(self.options.relevance_timeout, adapter.is_relevant(question))
                .await
                .unwrap_or(false);
            (adapter, relevant)
        });
        let mut survivors = Vec::new();
        for (adapter, relevant) in join_all(gate_checks).await {
            if relevant {
                survivors.push(adapter);
            } else {
                let id = adapter.metadata().id;
                log::debug!("[Executor] {} dropped at relevance gate", id);
                outcome.rejected.push(RejectedIntegration {
                    source_id: id,
                    reason: "relevance gate".to_string(),
                });
            }
        }
        if cancel.is_cancelled() || survivors.is_empty() {
            return outcome;
        }

        // Phase 2: query generation
        let generations = survivors.into_iter().map(|adapter| async move {
            let generated = timeout(
                self.options.query_gen_timeout,
                adapter.generate_query(question),
            )
            .await;
            (adapter, generated)
        });
        let mut planned: Vec<(Arc<dyn Integration>, QueryParams)> = Vec::new();
        for (adapter, generated) in join_all(generations).await {
            let id = adapter.metadata().id;
            let rejection = match generated {
                Ok(Ok(GeneratedQuery::Params(params))) => {
                    planned.push((adapter, params));
                    continue;
                }
                Ok(Ok(GeneratedQuery::NotApplicable { reason })) => {
                    json!({ "source_id": id, "kind": SourceErrorKind::IntegrationNotApplicable.as_str(), "reason": reason })
                }
                Ok(Err(error)) => {
                    json!({ "source_id": id, "kind": error.kind.as_str(), "reason": error.message })
                }
                Err(_) => {
                    json!({ "source_id": id, "kind": SourceErrorKind::Timeout.as_str(), "reason": "query generation timed out" })
                }
            };
            let reason = rejection["reason"].as_str().unwrap_or_default().to_string();
            self.logger
                .emit(scope.event(event::INTEGRATION_REJECTED, rejection))
                .await;
            outcome.rejected.push(RejectedIntegration { source_id: id, reason });
        }
        if cancel.is_cancelled() {
            for (adapter, params) in planned {
                outcome
                    .results
                    .push(cancelled_result(adapter.as_ref(), params));
            }
            return outcome;
        }

        // Phase 3: bounded search execution
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let searches = planned.into_iter().map(|(adapter, params)| {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return cancelled_result(adapter.as_ref(), params);
                };
                if cancel.is_cancelled() {
                    return cancelled_result(adapter.as_ref(), params);
                }
                tokio::select! {
                    result = timeout(self.options.exec_timeout, adapter.execute_search(&params, limit)) => {
                        match result {
                            Ok(result) => result,
                            Err(_) => {
                                let meta = adapter.metadata();
                                QueryResult::failure(
                                    &meta,
                                    params.clone(),
                                    SourceError::new(
                                        SourceErrorKind::Timeout,
                                        &meta.id,
                                        format!("search exceeded {:?}", self.options.exec_timeout),
                                    ),
                                    self.options.exec_timeout.as_millis() as u64,
                                )
                            }
                        }
                    }
                    _ = cancel.cancelled_wait() => cancelled_result(adapter.as_ref(), params.clone()),
                }
            }
        });
        for result in join_all(searches).await {
            self.logger
                .emit(scope.event(
                    event::API_CALL,
                    json!({
                        "source_id": result.source_id,
                        "success": result.success,
                        "items": result.items.len(),
                        "total_upstream": result.total_upstream,
                        "response_time_ms": result.response_time_ms,
                        "params": result.query_params,
                        "error": result.error,
                    }),
                ))
                .await;

            if result.success && !result.items.is_empty() {
                let raw = serde_json::to_string(
                    &result.items.iter().map(|i| &i.raw).collect::<Vec<_>>(),
                )
                .unwrap_or_default();
                self.logger
                    .emit(scope.event(
                        event::RAW_RESPONSE,
                        json!({
                            "source_id": result.source_id,
                            "body": crate::logging::truncate_raw(&raw),
                        }),
                    ))
                    .await;
            }

            if !result.success && self.options.critical_sources.contains(&result.source_id) {
                outcome.degraded = true;
                self.logger
                    .emit(scope.event(
                        event::CRITICAL_SOURCE_FAILURE,
                        json!({
                            "source_id": result.source_id,
                            "error": result.error,
                        }),
                    ))
                    .await;
            }
            outcome.results.push(result);
        }

        outcome
    }
}

fn cancelled_result(adapter: &dyn Integration, params: QueryParams) -> QueryResult {
    let meta = adapter.metadata();
    QueryResult::failure(
        &meta,
        params,
        SourceError::new(SourceErrorKind::Cancelled, &meta.id, "cohort cancelled"),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::registry::testing::{StubBehavior, StubIntegration};

    fn logger(dir: &tempfile::TempDir) -> ExecutionLogger {
        ExecutionLogger::create(&dir.path().join("log.jsonl")).unwrap()
    }

    fn cohort(specs: &[(&'static str, StubBehavior)]) -> Vec<Arc<dyn Integration>> {
        specs
            .iter()
            .map(|(id, behavior)| {
                Arc::new(StubIntegration::new(id, behavior.clone())) as Arc<dyn Integration>
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failures_do_not_cross_sources() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ParallelExecutor::new(ExecutorOptions::default(), logger(&dir));
        let outcome = executor
            .run_cohort(
                &CohortScope::run("run1"),
                "what contracts mention foo",
                cohort(&[
                    ("alpha", StubBehavior::Items(5)),
                    ("broken", StubBehavior::Fail(SourceErrorKind::Upstream5xx)),
                    ("beta", StubBehavior::Empty),
                ]),
                10,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.results.len(), 3);
        let by_id = |id: &str| outcome.results.iter().find(|r| r.source_id == id).unwrap();
        assert!(by_id("alpha").success);
        assert_eq!(by_id("alpha").items.len(), 5);
        assert!(!by_id("broken").success);
        assert!(by_id("beta").success);
        assert!(by_id("beta").items.is_empty());
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn test_critical_failure_sets_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExecutorOptions::default().with_critical(["alpha".to_string()]);
        let executor = ParallelExecutor::new(options, logger(&dir));
        let outcome = executor
            .run_cohort(
                &CohortScope::run("run1"),
                "latest X",
                cohort(&[
                    ("alpha", StubBehavior::Fail(SourceErrorKind::RateLimited)),
                    ("beta", StubBehavior::Items(3)),
                ]),
                10,
                &CancellationToken::new(),
            )
            .await;

        assert!(outcome.degraded);
        assert_eq!(outcome.items().count(), 3);
    }

    #[tokio::test]
    async fn test_relevance_gate_and_not_applicable_drop() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ParallelExecutor::new(ExecutorOptions::default(), logger(&dir));
        let outcome = executor
            .run_cohort(
                &CohortScope::run("run1"),
                "question",
                cohort(&[
                    ("gated", StubBehavior::Irrelevant),
                    ("declined", StubBehavior::NotApplicable),
                    ("alpha", StubBehavior::Items(1)),
                ]),
                10,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].source_id, "alpha");
        assert_eq!(outcome.rejected.len(), 2);
        let declined = outcome
            .rejected
            .iter()
            .find(|r| r.source_id == "declined")
            .unwrap();
        assert_eq!(declined.reason, "stub declines");
    }

    #[tokio::test]
    async fn test_pre_cancelled_cohort_produces_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ParallelExecutor::new(ExecutorOptions::default(), logger(&dir));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = executor
            .run_cohort(
                &CohortScope::run("run1"),
                "question",
                cohort(&[("alpha", StubBehavior::Items(5))]),
                10,
                &cancel,
            )
            .await;

        // Cancelled before query generation starts: nothing is planned, so
        // nothing is reported per-source
        assert!(outcome.results.is_empty());
        assert!(outcome.rejected.is_empty());
    }

    /// Adapter that fires the shared cancellation token from inside its own
    /// query generation, so the cancel lands after phase 1 but before any
    /// search executes
    struct CancelDuringQueryGen {
        id: String,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl Integration for CancelDuringQueryGen {
        fn metadata(&self) -> crate::models::SourceMetadata {
            crate::models::SourceMetadata {
                id: self.id.clone(),
                display_name: format!("Cancelling {}", self.id),
                category: crate::models::SourceCategory::Other,
                requires_credential: false,
                estimated_latency_ms: None,
                estimated_cost_per_call: None,
                daily_call_limit: None,
                description: "cancels mid-cohort".to_string(),
                search_strategies: Vec::new(),
            }
        }

        async fn generate_query(
            &self,
            question: &str,
        ) -> Result<GeneratedQuery, SourceError> {
            self.cancel.cancel();
            let mut params = QueryParams::new();
            params.set("q", json!(question));
            Ok(GeneratedQuery::Params(params))
        }

        async fn execute_search(&self, params: &QueryParams, _limit: usize) -> QueryResult {
            // The executor must never get this far once the token fired
            QueryResult::failure(
                &self.metadata(),
                params.clone(),
                SourceError::new(SourceErrorKind::ParseError, &self.id, "search ran after cancel"),
                0,
            )
        }
    }

    #[tokio::test]
    async fn test_cancellation_after_planning_tags_results_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ParallelExecutor::new(ExecutorOptions::default(), logger(&dir));
        let cancel = CancellationToken::new();
        let cohort: Vec<Arc<dyn Integration>> = vec![
            Arc::new(CancelDuringQueryGen {
                id: "trigger".to_string(),
                cancel: cancel.clone(),
            }),
            Arc::new(StubIntegration::new("alpha", StubBehavior::Items(5))),
        ];

        let outcome = executor
            .run_cohort(&CohortScope::run("run1"), "question", cohort, 10, &cancel)
            .await;

        // Both adapters survived planning, so both report per-source
        // cancellation; no search produced items
        assert_eq!(outcome.results.len(), 2);
        for result in &outcome.results {
            assert!(!result.success);
            assert!(result.items.is_empty());
            assert_eq!(
                result.error.as_ref().map(|e| e.kind),
                Some(SourceErrorKind::Cancelled)
            );
        }
    }

    #[tokio::test]
    async fn test_limit_respected_per_source() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ParallelExecutor::new(ExecutorOptions::default(), logger(&dir));
        let outcome = executor
            .run_cohort(
                &CohortScope::run("run1"),
                "question",
                cohort(&[("alpha", StubBehavior::Items(50))]),
                7,
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome.results[0].items.len(), 7);
        assert_eq!(outcome.results[0].total_upstream, 50);
    }
}
