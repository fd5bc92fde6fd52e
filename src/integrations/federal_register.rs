//! Federal Register integration
//!
//! Rules, proposed rules, notices, and presidential documents. Public API,
//! no credential.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::{elapsed_ms, generate_params, http_get, Integration, IntegrationContext};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
    SourceErrorKind, SourceMetadata,
};

const DEFAULT_BASE_URL: &str = "https://www.federalregister.gov";
const SOURCE_ID: &str = "federal_register";

const DOC_TYPES: &[&str] = &["RULE", "PRORULE", "NOTICE", "PRESDOCU"];

/// Vocabulary that marks a question as plausibly regulatory
const RELEVANCE_HINTS: &[&str] = &[
    "regulation", "regulatory", "rule", "rulemaking", "federal register", "notice",
    "comment period", "cfr", "executive order", "agency", "policy", "compliance",
    "environmental", "export control", "itar", "ear",
];

const QUERY_PROMPT: &str = "You generate search conditions for the Federal Register API. \
Given a research question, produce a JSON object with:\n\
- term: the full-text search term\n\
- doc_types (optional): subset of [\"RULE\",\"PRORULE\",\"NOTICE\",\"PRESDOCU\"]\n\
- date_from, date_to (optional): YYYY-MM-DD publication-date bounds\n\
The Federal Register only publishes US federal agency rulemaking, notices, \
and presidential documents. If the question cannot be answered from those, \
set not_applicable to true and explain in reason. Output only the JSON object.";

pub struct FederalRegisterIntegration {
    ctx: IntegrationContext,
}

impl FederalRegisterIntegration {
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
impl Integration for FederalRegisterIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "Federal Register".to_string(),
            category: SourceCategory::GovernmentRegulations,
            requires_credential: false,
            estimated_latency_ms: Some(800),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "The daily journal of US federal rulemaking: final and proposed \
                          rules, agency notices, and presidential documents with publication \
                          dates and issuing agencies."
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
                ("term", json!({ "type": "string", "minLength": 1 })),
                (
                    "doc_types",
                    json!({
                        "type": "array",
                        "items": { "type": "string", "enum": DOC_TYPES }
                    }),
                ),
                ("date_from", json!({ "type": "string" })),
                ("date_to", json!({ "type": "string" })),
            ],
            &["term"],
        );
        let params = match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema)
            .await?
        {
            Ok(params) => params,
            Err(reason) => return Ok(GeneratedQuery::NotApplicable { reason }),
        };

        for key in ["date_from", "date_to"] {
            if let Some(raw) = params.get_str(key) {
                if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_err() {
                    return Err(SourceError::new(
                        SourceErrorKind::LlmInvalidOutput,
                        SOURCE_ID,
                        format!("{} '{}' is not YYYY-MM-DD", key, raw),
                    ));
                }
            }
        }
        Ok(GeneratedQuery::Params(params))
    }

    async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult {
        let meta = self.metadata();
        let started = Instant::now();

        let mut query = vec![
            (
                "conditions[term]",
                params.get_str("term").unwrap_or_default().to_string(),
            ),
            ("per_page", limit.min(100).to_string()),
            ("order", "newest".to_string()),
        ];
        if let Some(types) = params.get("doc_types").and_then(|v| v.as_array()) {
            for doc_type in types.iter().filter_map(|v| v.as_str()) {
                query.push(("conditions[type][]", doc_type.to_string()));
            }
        }
        if let Some(from) = params.get_str("date_from") {
            query.push(("conditions[publication_date][gte]", from.to_string()));
        }
        if let Some(to) = params.get_str("date_to") {
            query.push(("conditions[publication_date][lte]", to.to_string()));
        }

        let url = format!("{}/api/v1/documents.json", self.base_url());
        match http_get(SOURCE_ID, &url, &[], &query).await {
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
    let data: DocumentsResponse = match serde_json::from_str(body) {
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

    let total = data.count.unwrap_or(data.results.len() as u64);
    let items = data
        .results
        .into_iter()
        .map(|doc| {
            let raw = serde_json::to_value(&doc).unwrap_or_default();
            let author = doc.agencies.first().and_then(|a| a.name.clone());
            ResultItem {
                title: doc.title,
                url: doc.html_url.unwrap_or_default(),
                date: doc.publication_date.unwrap_or_default(),
                description: doc.r#abstract.unwrap_or_default(),
                author,
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    results: Vec<FrDocument>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct FrDocument {
    title: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    r#abstract: Option<String>,
    #[serde(default)]
    agencies: Vec<FrAgency>,
    #[serde(default)]
    document_number: Option<String>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct FrAgency {
    #[serde(default)]
    name: Option<String>,
}
