//! USAJOBS integration
//!
//! Federal job postings. Hiring patterns are a useful signal for what an
//! agency is standing up; the pre-filter keeps this source out of cohorts
//! for questions with no staffing angle.

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

const DEFAULT_BASE_URL: &str = "https://data.usajobs.gov";
const SOURCE_ID: &str = "usajobs";
const USER_AGENT_CONTACT: &str = "research@argus.local";

/// Vocabulary that marks a question as plausibly staffing-related
const RELEVANCE_HINTS: &[&str] = &[
    "job", "jobs", "hiring", "hire", "position", "vacancy", "vacancies", "career",
    "staffing", "recruit", "workforce", "personnel", "billet", "analyst", "engineer",
];

const QUERY_PROMPT: &str = "You generate search parameters for the USAJOBS federal \
job-posting API. Given a research question, produce a JSON object with:\n\
- keyword: search keywords for job titles and duties\n\
- location (optional): a city/state string such as \"Huntsville, Alabama\"\n\
- organization (optional): an agency name such as \"Department of the Army\"\n\
USAJOBS only lists US federal civilian job postings. If the question has no \
staffing or hiring angle, set not_applicable to true and explain in reason. \
Output only the JSON object.";

pub struct UsaJobsIntegration {
    ctx: IntegrationContext,
}

impl UsaJobsIntegration {
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
impl Integration for UsaJobsIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "USAJOBS".to_string(),
            category: SourceCategory::GovernmentJobs,
            requires_credential: true,
            estimated_latency_ms: Some(1200),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "US federal civilian job postings with titles, agencies, locations, \
                          and duty summaries. Hiring surges reveal what an agency is building \
                          or standing up."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn is_relevant(&self, question: &str) -> bool {
        let lower = question.to_lowercase();
        RELEVANCE_HINTS.iter().any(|hint| lower.contains(hint))
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("keyword", json!({ "type": "string", "minLength": 1 })),
                ("location", json!({ "type": "string" })),
                ("organization", json!({ "type": "string" })),
            ],
            &["keyword"],
        );
        match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema).await? {
            Ok(params) => Ok(GeneratedQuery::Params(params)),
            Err(reason) => Ok(GeneratedQuery::NotApplicable { reason }),
        }
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
                        "USAJOBS_API_KEY is not set",
                    ),
                    0,
                )
            }
        };

        let mut query = vec![
            (
                "Keyword",
                params.get_str("keyword").unwrap_or_default().to_string(),
            ),
            ("ResultsPerPage", limit.min(100).to_string()),
        ];
        if let Some(location) = params.get_str("location") {
            query.push(("LocationName", location.to_string()));
        }
        if let Some(organization) = params.get_str("organization") {
            query.push(("Organization", organization.to_string()));
        }

        let url = format!("{}/api/search", self.base_url());
        let headers = [
            ("Authorization-Key", api_key),
            ("User-Agent", USER_AGENT_CONTACT),
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
    let data: UsaJobsResponse = match serde_json::from_str(body) {
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

    let search = data.search_result.unwrap_or_default();
    let total = search
        .search_result_count_all
        .unwrap_or(search.search_result_items.len() as u64);
    let items = search
        .search_result_items
        .into_iter()
        .map(|item| {
            let descriptor = item.matched_object_descriptor;
            let raw = serde_json::to_value(&descriptor).unwrap_or_default();
            let summary = descriptor
                .user_area
                .as_ref()
                .and_then(|ua| ua.details.as_ref())
                .and_then(|d| d.job_summary.clone())
                .unwrap_or_default();
            ResultItem {
                title: descriptor.position_title.clone().unwrap_or_default(),
                url: descriptor.position_uri.clone().unwrap_or_default(),
                date: descriptor.publication_start_date.clone().unwrap_or_default(),
                description: summary,
                author: descriptor.organization_name.clone(),
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

#[derive(Debug, Deserialize)]
struct UsaJobsResponse {
    #[serde(rename = "SearchResult", default)]
    search_result: Option<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResult {
    #[serde(rename = "SearchResultCountAll", default)]
    search_result_count_all: Option<u64>,
    #[serde(rename = "SearchResultItems", default)]
    search_result_items: Vec<SearchResultItem>,
}

#[derive(Debug, Deserialize)]
struct SearchResultItem {
    #[serde(rename = "MatchedObjectDescriptor")]
    matched_object_descriptor: JobDescriptor,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct JobDescriptor {
    #[serde(rename = "PositionTitle", default)]
    position_title: Option<String>,
    #[serde(rename = "PositionURI", default)]
    position_uri: Option<String>,
    #[serde(rename = "PublicationStartDate", default)]
    publication_start_date: Option<String>,
    #[serde(rename = "OrganizationName", default)]
    organization_name: Option<String>,
    #[serde(rename = "UserArea", default)]
    user_area: Option<UserArea>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct UserArea {
    #[serde(rename = "Details", default)]
    details: Option<UserAreaDetails>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct UserAreaDetails {
    #[serde(rename = "JobSummary", default)]
    job_summary: Option<String>,
}
