//! SAM.gov contract opportunities integration
//!
//! Active and archived federal solicitations. Requires an api.sam.gov key;
//! the API caps the posted-date window at one year per request.

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

const DEFAULT_BASE_URL: &str = "https://api.sam.gov";
const SOURCE_ID: &str = "sam_gov";
const DATE_FORMAT: &str = "%m/%d/%Y";
const MAX_WINDOW_DAYS: i64 = 366;

/// Procurement type codes: solicitation, presolicitation, combined synopsis,
/// sources sought, sale of surplus, special notice, intent to bundle
const PTYPE_CODES: &[&str] = &["o", "p", "k", "r", "g", "s", "i"];

const QUERY_PROMPT: &str = "You generate search parameters for the SAM.gov contract \
opportunities API. Given a research question, produce a JSON object with:\n\
- title: keywords to match against opportunity titles\n\
- posted_from, posted_to: MM/DD/YYYY posted-date bounds, at most one year apart \
(both required by the API; default to the last 90 days when the question gives \
no time frame)\n\
- ptype (optional): one of o (solicitation), p (presolicitation), k (combined \
synopsis), r (sources sought), g (surplus sale), s (special notice), i (intent \
to bundle)\n\
This source only covers US federal contracting opportunities. If the question \
is not about federal procurement, set not_applicable to true and explain in \
reason. Output only the JSON object.";

pub struct SamGovIntegration {
    ctx: IntegrationContext,
}

impl SamGovIntegration {
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

/// SAM.gov requires both posted-date bounds and rejects windows over a year
fn validate_window(params: &QueryParams) -> Result<(), String> {
    let parse = |key: &str| -> Result<NaiveDate, String> {
        let raw = params
            .get_str(key)
            .ok_or_else(|| format!("{} is required", key))?;
        NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|_| format!("{} '{}' is not MM/DD/YYYY", key, raw))
    };
    let from = parse("posted_from")?;
    let to = parse("posted_to")?;
    if from > to {
        return Err("posted_from is after posted_to".to_string());
    }
    if (to - from).num_days() > MAX_WINDOW_DAYS {
        return Err("posted-date window exceeds one year".to_string());
    }
    Ok(())
}

#[async_trait]
impl Integration for SamGovIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "SAM.gov Opportunities".to_string(),
            category: SourceCategory::GovernmentContracts,
            requires_credential: true,
            estimated_latency_ms: Some(2000),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day.or(Some(1000)),
            description: "Federal contract opportunities: solicitations, presolicitations, \
                          sources-sought notices, and special notices with agencies and \
                          response deadlines. Best for what the government is asking \
                          industry to bid on right now."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("title", json!({ "type": "string", "minLength": 1 })),
                ("posted_from", json!({ "type": "string" })),
                ("posted_to", json!({ "type": "string" })),
                ("ptype", json!({ "type": "string", "enum": PTYPE_CODES })),
            ],
            &["title", "posted_from", "posted_to"],
        );
        let params = match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema)
            .await?
        {
            Ok(params) => params,
            Err(reason) => return Ok(GeneratedQuery::NotApplicable { reason }),
        };

        if let Err(msg) = validate_window(&params) {
            return Err(SourceError::new(
                SourceErrorKind::LlmInvalidOutput,
                SOURCE_ID,
                msg,
            ));
        }
        Ok(GeneratedQuery::Params(params))
    }

    async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult {
        let meta = self.metadata();
        let started = Instant::now();

        let api_key = match self.ctx.settings.api_key.clone() {
            Some(key) => key,
            None => {
                return QueryResult::failure(
                    &meta,
                    params.clone(),
                    SourceError::new(
                        SourceErrorKind::AuthFailed,
                        SOURCE_ID,
                        "SAM_API_KEY is not set",
                    ),
                    0,
                )
            }
        };

        let mut query = vec![
            ("api_key", api_key),
            (
                "title",
                params.get_str("title").unwrap_or_default().to_string(),
            ),
            (
                "postedFrom",
                params.get_str("posted_from").unwrap_or_default().to_string(),
            ),
            (
                "postedTo",
                params.get_str("posted_to").unwrap_or_default().to_string(),
            ),
            ("limit", limit.min(100).to_string()),
        ];
        if let Some(ptype) = params.get_str("ptype") {
            query.push(("ptype", ptype.to_string()));
        }

        let url = format!("{}/opportunities/v2/search", self.base_url());
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
    let data: OpportunitiesResponse = match serde_json::from_str(body) {
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

    let total = data.total_records.unwrap_or(data.opportunities_data.len() as u64);
    let items = data
        .opportunities_data
        .into_iter()
        .map(|opp| {
            let raw = serde_json::to_value(&opp).unwrap_or_default();
            let description = match (&opp.solicitation_number, &opp.full_parent_path_name) {
                (Some(number), Some(path)) => format!("{} — {}", number, path),
                (Some(number), None) => number.clone(),
                (None, Some(path)) => path.clone(),
                (None, None) => String::new(),
            };
            ResultItem {
                title: opp.title,
                url: opp.ui_link.unwrap_or_default(),
                date: opp.posted_date.unwrap_or_default(),
                description,
                author: None,
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpportunitiesResponse {
    #[serde(default)]
    total_records: Option<u64>,
    #[serde(default)]
    opportunities_data: Vec<Opportunity>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Opportunity {
    title: String,
    #[serde(default)]
    solicitation_number: Option<String>,
    #[serde(default)]
    posted_date: Option<String>,
    #[serde(default)]
    ui_link: Option<String>,
    #[serde(default)]
    full_parent_path_name: Option<String>,
    #[serde(default, rename = "type")]
    notice_type: Option<String>,
}
