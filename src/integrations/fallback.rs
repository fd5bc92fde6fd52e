//! Generic fallback search helper
//!
//! Adapters that declare `search_strategies` in their metadata delegate
//! `execute_search` here. Strategies are tried in declared order; ones
//! whose required parameter is absent are skipped; the first success with
//! non-empty results wins. When everything comes back empty or failed, the
//! result is a composite error naming each attempt.

use async_trait::async_trait;
use std::time::Instant;

use super::elapsed_ms;
use crate::models::{
    QueryParams, QueryResult, ResultItem, SourceError, SourceErrorKind, SourceMetadata,
};

/// Dispatch surface the helper drives; implemented by strategy-based
/// adapters alongside `Integration`
#[async_trait]
pub trait StrategySearch: Send + Sync {
    async fn run_strategy(
        &self,
        method_name: &str,
        params: &QueryParams,
        limit: usize,
    ) -> Result<(u64, Vec<ResultItem>), SourceError>;
}

/// Try each declared strategy in order and build the final `QueryResult`
pub async fn execute_with_strategies<S: StrategySearch>(
    adapter: &S,
    meta: &SourceMetadata,
    params: &QueryParams,
    limit: usize,
) -> QueryResult {
    let started = Instant::now();
    let mut attempts: Vec<String> = Vec::new();
    let mut first_error_kind: Option<SourceErrorKind> = None;

    for strategy in &meta.search_strategies {
        if !params.has(&strategy.required_param) {
            attempts.push(format!(
                "{}: skipped (missing '{}')",
                strategy.method_name, strategy.required_param
            ));
            continue;
        }

        match adapter
            .run_strategy(&strategy.method_name, params, limit)
            .await
        {
            Ok((total, items)) if !items.is_empty() => {
                log::info!(
                    "[{}] Strategy '{}' returned {} items",
                    meta.id,
                    strategy.method_name,
                    items.len()
                );
                return QueryResult::ok(
                    meta,
                    params.clone(),
                    total,
                    items,
                    limit,
                    elapsed_ms(started),
                );
            }
            Ok(_) => attempts.push(format!("{}: no results", strategy.method_name)),
            Err(e) => {
                first_error_kind.get_or_insert(e.kind);
                attempts.push(format!("{}: {}", strategy.method_name, e.message));
            }
        }
    }

    let kind = first_error_kind.unwrap_or(SourceErrorKind::Upstream4xxOther);
    let message = if attempts.is_empty() {
        "no strategy was applicable to the generated parameters".to_string()
    } else {
        format!("all strategies exhausted: {}", attempts.join("; "))
    };
    QueryResult::failure(
        meta,
        params.clone(),
        SourceError::new(kind, &meta.id, message),
        elapsed_ms(started),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchStrategy, SourceCategory, StrategyReliability};
    use serde_json::json;

    struct FakeAdapter {
        fail_first: bool,
    }

    #[async_trait]
    impl StrategySearch for FakeAdapter {
        async fn run_strategy(
            &self,
            method_name: &str,
            _params: &QueryParams,
            _limit: usize,
        ) -> Result<(u64, Vec<ResultItem>), SourceError> {
            match method_name {
                "primary" if self.fail_first => Err(SourceError::new(
                    SourceErrorKind::Upstream5xx,
                    "fake",
                    "primary endpoint down",
                )),
                "primary" => Ok((0, Vec::new())),
                "secondary" => Ok((
                    1,
                    vec![ResultItem {
                        title: "hit".to_string(),
                        url: "https://example.com/hit".to_string(),
                        date: String::new(),
                        description: String::new(),
                        author: None,
                        source_id: "fake".to_string(),
                        raw: json!({}),
                    }],
                )),
                other => Err(SourceError::new(
                    SourceErrorKind::ParseError,
                    "fake",
                    format!("unknown strategy {}", other),
                )),
            }
        }
    }

    fn meta() -> SourceMetadata {
        SourceMetadata {
            id: "fake".to_string(),
            display_name: "Fake".to_string(),
            category: SourceCategory::Other,
            requires_credential: false,
            estimated_latency_ms: None,
            estimated_cost_per_call: None,
            daily_call_limit: None,
            description: "fallback test source".to_string(),
            search_strategies: vec![
                SearchStrategy {
                    method_name: "primary".to_string(),
                    reliability: StrategyReliability::High,
                    required_param: "title".to_string(),
                },
                SearchStrategy {
                    method_name: "secondary".to_string(),
                    reliability: StrategyReliability::Medium,
                    required_param: "keyword".to_string(),
                },
            ],
        }
    }

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        let mut params = QueryParams::new();
        for (k, v) in pairs {
            params.set(k, json!(v));
        }
        params
    }

    #[tokio::test]
    async fn test_falls_through_to_second_strategy() {
        let adapter = FakeAdapter { fail_first: true };
        let result = execute_with_strategies(
            &adapter,
            &meta(),
            &params(&[("title", "x"), ("keyword", "y")]),
            10,
        )
        .await;
        assert!(result.success);
        assert_eq!(result.items.len(), 1);
    }

    #[tokio::test]
    async fn test_skips_strategy_missing_param() {
        let adapter = FakeAdapter { fail_first: false };
        // No "title", so primary is skipped entirely and secondary runs
        let result =
            execute_with_strategies(&adapter, &meta(), &params(&[("keyword", "y")]), 10).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_composite_error_lists_attempts() {
        let adapter = FakeAdapter { fail_first: true };
        // Only primary applies, and it fails
        let result =
            execute_with_strategies(&adapter, &meta(), &params(&[("title", "x")]), 10).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.kind, SourceErrorKind::Upstream5xx);
        assert!(error.message.contains("primary endpoint down"));
        assert!(error.message.contains("secondary: skipped"));
    }
}
