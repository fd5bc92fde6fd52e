//! Brave Search integration
//!
//! General web search; the safety net source that is almost never declined
//! by query generation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::{elapsed_ms, generate_params, http_get, Integration, IntegrationContext};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
    SourceErrorKind, SourceMetadata,
};

const DEFAULT_BASE_URL: &str = "https://api.search.brave.com";
const SOURCE_ID: &str = "brave_search";
const MAX_QUERY_LEN: usize = 400;

const QUERY_PROMPT: &str = "You generate web search queries for the Brave Search API. \
Given a research question, produce a JSON object with:\n\
- q: the search query string (supports quoted phrases and -term exclusion)\n\
- freshness (optional): one of pd (day), pw (week), pm (month), py (year) when \
the question is about recent events\n\
If web search cannot help with the question, set not_applicable to true and \
explain in reason. Output only the JSON object.";

pub struct BraveSearchIntegration {
    ctx: IntegrationContext,
}

impl BraveSearchIntegration {
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
}

#[async_trait]
impl Integration for BraveSearchIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "Brave Web Search".to_string(),
            category: SourceCategory::WebSearch,
            requires_credential: true,
            estimated_latency_ms: Some(600),
            estimated_cost_per_call: Some(0.005),
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "General web search across news sites, blogs, and public pages. \
                          Good fallback for any question; supports quoted phrases and \
                          -term exclusion."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("q", json!({ "type": "string", "minLength": 1 })),
                ("freshness", json!({ "type": "string", "enum": ["pd", "pw", "pm", "py"] })),
            ],
            &["q"],
        );
        let params = match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema)
            .await?
        {
            Ok(params) => params,
            Err(reason) => return Ok(GeneratedQuery::NotApplicable { reason }),
        };

        let q = params.get_str("q").unwrap_or_default();
        if q.len() > MAX_QUERY_LEN {
            return Err(SourceError::new(
                SourceErrorKind::LlmInvalidOutput,
                SOURCE_ID,
                format!("query exceeds {} characters", MAX_QUERY_LEN),
            ));
        }
        Ok(GeneratedQuery::Params(params))
    }

    async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult {
        let meta = self.metadata();
        let started = Instant::now();

        let api_key = match self.ctx.settings.api_key.as_deref() {
            Some(key) => key,
            None => {
                return QueryResult::failure(
                    &meta,
                    params.clone(),
                    SourceError::new(
                        SourceErrorKind::AuthFailed,
                        SOURCE_ID,
                        "BRAVE_API_KEY is not set",
                    ),
                    0,
                )
            }
        };

        let mut query = vec![
            ("q", params.get_str("q").unwrap_or_default().to_string()),
            ("count", limit.min(20).to_string()),
        ];
        if let Some(freshness) = params.get_str("freshness") {
            query.push(("freshness", freshness.to_string()));
        }

        let url = format!("{}/res/v1/web/search", self.base_url());
        let headers = [
            ("Accept", "application/json"),
            ("X-Subscription-Token", api_key),
        ];
        match http_get(SOURCE_ID, &url, &headers, &query).await {
            Ok(body) => parse_response(&meta, params, &body, limit, elapsed_ms(started)),
            Err(error) => QueryResult::failure(&meta, params.clone(), error, elapsed_ms(started)),
        }
    }
}

fn parse_response(
    meta: &SourceMetadata,
    params: &QueryParams,
    body: &str,
    limit: usize,
    elapsed: u64,
) -> QueryResult {
    let data: BraveSearchResponse = match serde_json::from_str(body) {
        Ok(data) => data,
        Err(e) => {
            return QueryResult::failure(
                meta,
                params.clone(),
                SourceError::new(SourceErrorKind::ParseError, SOURCE_ID, e.to_string()),
                elapsed,
            )
        }
    };

    let results = data.web.map(|w| w.results).unwrap_or_default();
    let total = results.len() as u64;
    let items = results
        .into_iter()
        .map(|r| {
            let raw = serde_json::to_value(&r).unwrap_or_default();
            ResultItem {
                title: r.title,
                url: r.url,
                date: r.page_age.unwrap_or_default(),
                description: r.description,
                author: None,
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct BraveWebResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    page_age: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "Brave Web Search".to_string(),
            category: SourceCategory::WebSearch,
            requires_credential: true,
            estimated_latency_ms: None,
            estimated_cost_per_call: None,
            daily_call_limit: None,
            description: String::new(),
            search_strategies: Vec::new(),
        }
    }

    #[test]
    fn test_parse_response_maps_fields() {
        let body = r#"{
            "web": { "results": [
                { "title": "Army fields new missile", "url": "https://example.com/a",
                  "description": "coverage of the fielding", "page_age": "2026-06-01T00:00:00" },
                { "title": "Second hit", "url": "https://example.com/b", "description": "" }
            ]}
        }"#;
        let result = parse_response(&meta(), &QueryParams::new(), body, 10, 5);
        assert!(result.success);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.items[0].source_id, SOURCE_ID);
        assert_eq!(result.items[0].date, "2026-06-01T00:00:00");
        assert!(result.items[1].date.is_empty());
    }

    #[test]
    fn test_parse_response_respects_limit() {
        let body = r#"{
            "web": { "results": [
                { "title": "a", "url": "u1", "description": "" },
                { "title": "b", "url": "u2", "description": "" },
                { "title": "c", "url": "u3", "description": "" }
            ]}
        }"#;
        let result = parse_response(&meta(), &QueryParams::new(), body, 2, 5);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.total_upstream, 3);
    }

    #[test]
    fn test_parse_response_bad_body() {
        let result = parse_response(&meta(), &QueryParams::new(), "<html>block</html>", 10, 5);
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, SourceErrorKind::ParseError);
    }
}
