//! ClearanceJobs integration
//!
//! Cleared-position job board. There is no stable public search API, so
//! this adapter works the site's JSON endpoints through an ordered
//! strategy chain: title search is the most reliable, free-keyword search
//! is noisier, and company search is a last resort. Strategy dispatch is
//! handled by the shared fallback helper.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::fallback::{self, StrategySearch};
use super::{generate_params, http_get, Integration, IntegrationContext};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SearchStrategy, SourceCategory,
    SourceError, SourceErrorKind, SourceMetadata, StrategyReliability,
};

const DEFAULT_BASE_URL: &str = "https://www.clearancejobs.com";
const SOURCE_ID: &str = "clearancejobs";

const STRATEGY_TITLE: &str = "search_by_title";
const STRATEGY_KEYWORD: &str = "search_by_keyword";
const STRATEGY_COMPANY: &str = "search_by_company";

/// Vocabulary that marks a question as plausibly about cleared staffing
const RELEVANCE_HINTS: &[&str] = &[
    "job", "jobs", "hiring", "position", "vacancy", "career", "staffing", "recruit",
    "clearance", "cleared", "ts/sci", "polygraph", "sci", "secret",
];

const QUERY_PROMPT: &str = "You generate search parameters for a cleared-jobs board. \
Given a research question, produce a JSON object with any of:\n\
- job_title: an exact-ish job title to search for (most reliable)\n\
- keywords: free keywords over posting text (noisier)\n\
- company: an employer name (least reliable)\n\
Provide job_title when the question implies one; add keywords and company \
when they are clearly known. The board only lists US positions requiring a \
security clearance. If the question has no cleared-staffing angle, set \
not_applicable to true and explain in reason. Output only the JSON object.";

pub struct ClearanceJobsIntegration {
    ctx: IntegrationContext,
}

impl ClearanceJobsIntegration {
    pub fn new(ctx: IntegrationContext) -> Self {
        Self { ctx }
    }

    fn base_url(&self) -> String {
        self.ctx
            .settings
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    async fn search_jobs(
        &self,
        param_name: &str,
        value: &str,
        limit: usize,
    ) -> Result<(u64, Vec<ResultItem>), SourceError> {
        let query = vec![
            (param_name, value.to_string()),
            ("limit", limit.min(50).to_string()),
        ];
        let url = format!("{}/api/v1/jobs/search", self.base_url());
        let body = http_get(SOURCE_ID, &url, &[], &query).await?;
        parse_jobs(&body)
    }
}

fn parse_jobs(body: &str) -> Result<(u64, Vec<ResultItem>), SourceError> {
    let data: JobsResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::new(SourceErrorKind::ParseError, SOURCE_ID, e.to_string()))?;
    let total = data.total.unwrap_or(data.jobs.len() as u64);
    let items = data
        .jobs
        .into_iter()
        .map(|job| {
            let raw = serde_json::to_value(&job).unwrap_or_default();
            ResultItem {
                title: job.title,
                url: job.url.unwrap_or_default(),
                date: job.posted_date.unwrap_or_default(),
                description: job.description.unwrap_or_default(),
                author: job.company_name,
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();
    Ok((total, items))
}

#[async_trait]
impl StrategySearch for ClearanceJobsIntegration {
    async fn run_strategy(
        &self,
        method_name: &str,
        params: &QueryParams,
        limit: usize,
    ) -> Result<(u64, Vec<ResultItem>), SourceError> {
        match method_name {
            STRATEGY_TITLE => {
                self.search_jobs("title", params.get_str("job_title").unwrap_or_default(), limit)
                    .await
            }
            STRATEGY_KEYWORD => {
                self.search_jobs("q", params.get_str("keywords").unwrap_or_default(), limit)
                    .await
            }
            STRATEGY_COMPANY => {
                self.search_jobs("company", params.get_str("company").unwrap_or_default(), limit)
                    .await
            }
            other => Err(SourceError::new(
                SourceErrorKind::ParseError,
                SOURCE_ID,
                format!("unknown strategy '{}'", other),
            )),
        }
    }
}

#[async_trait]
impl Integration for ClearanceJobsIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "ClearanceJobs".to_string(),
            category: SourceCategory::ClearedJobs,
            requires_credential: false,
            estimated_latency_ms: Some(2500),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "Job postings that require a US security clearance, with employer, \
                          location, and clearance level. Cleared hiring is often the only \
                          public signal of classified program growth."
                .to_string(),
            search_strategies: vec![
                SearchStrategy {
                    method_name: STRATEGY_TITLE.to_string(),
                    reliability: StrategyReliability::High,
                    required_param: "job_title".to_string(),
                },
                SearchStrategy {
                    method_name: STRATEGY_KEYWORD.to_string(),
                    reliability: StrategyReliability::Medium,
                    required_param: "keywords".to_string(),
                },
                SearchStrategy {
                    method_name: STRATEGY_COMPANY.to_string(),
                    reliability: StrategyReliability::Low,
                    required_param: "company".to_string(),
                },
            ],
        }
    }

    async fn is_relevant(&self, question: &str) -> bool {
        let lower = question.to_lowercase();
        RELEVANCE_HINTS.iter().any(|hint| lower.contains(hint))
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("job_title", json!({ "type": "string" })),
                ("keywords", json!({ "type": "string" })),
                ("company", json!({ "type": "string" })),
            ],
            &[],
        );
        let params = match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema)
            .await?
        {
            Ok(params) => params,
            Err(reason) => return Ok(GeneratedQuery::NotApplicable { reason }),
        };

        // The schema cannot express "at least one of the three"
        if !params.has("job_title") && !params.has("keywords") && !params.has("company") {
            return Err(SourceError::new(
                SourceErrorKind::LlmInvalidOutput,
                SOURCE_ID,
                "none of job_title, keywords, or company was provided",
            ));
        }
        Ok(GeneratedQuery::Params(params))
    }

    async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult {
        let meta = self.metadata();
        fallback::execute_with_strategies(self, &meta, params, limit).await
    }

    fn supports_strategy(&self, method_name: &str) -> bool {
        matches!(
            method_name,
            STRATEGY_TITLE | STRATEGY_KEYWORD | STRATEGY_COMPANY
        )
    }
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    jobs: Vec<JobPosting>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct JobPosting {
    title: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    posted_date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    clearance_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jobs() {
        let body = r#"{
            "total": 23,
            "jobs": [{
                "title": "Systems Engineer - TS/SCI w/ Poly",
                "url": "https://www.clearancejobs.com/jobs/812345",
                "posted_date": "2026-07-15",
                "description": "Support a fast-paced program office...",
                "company_name": "Leidos",
                "clearance_level": "TS/SCI"
            }]
        }"#;
        let (total, items) = parse_jobs(body).unwrap();
        assert_eq!(total, 23);
        assert_eq!(items[0].author.as_deref(), Some("Leidos"));
        assert_eq!(items[0].source_id, SOURCE_ID);
    }

    #[test]
    fn test_parse_jobs_bad_body() {
        let err = parse_jobs("not json").unwrap_err();
        assert_eq!(err.kind, SourceErrorKind::ParseError);
    }

    #[tokio::test]
    async fn test_supports_declared_strategies() {
        let ctx = IntegrationContext {
            gateway: std::sync::Arc::new(crate::llm::testing::gateway(|_| Ok(String::new()))),
            model: "test".to_string(),
            settings: Default::default(),
        };
        let adapter = ClearanceJobsIntegration::new(ctx);
        for strategy in &adapter.metadata().search_strategies {
            assert!(adapter.supports_strategy(&strategy.method_name));
        }
        assert!(!adapter.supports_strategy("scrape_html"));
    }
}
