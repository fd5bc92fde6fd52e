//! USAspending.gov integration
//!
//! Federal award and contract spending records. No credential required;
//! the keyword filter supports quoted phrases, which pass through from
//! Boolean monitor keywords unchanged.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::{elapsed_ms, generate_params, http_post_json, Integration, IntegrationContext};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
    SourceErrorKind, SourceMetadata,
};

const DEFAULT_BASE_URL: &str = "https://api.usaspending.gov";
const SOURCE_ID: &str = "usaspending";

/// Contract award type codes plus their IDV umbrella variants
const AWARD_TYPE_CODES: &[&str] = &[
    "A", "B", "C", "D", "IDV_A", "IDV_B", "IDV_C", "IDV_D", "IDV_E",
];

/// Oldest time_period start the API accepts meaningful data for
const MAX_LOOKBACK_YEARS: i32 = 10;

const QUERY_PROMPT: &str = "You generate search filters for the USAspending.gov award \
search API. Given a research question, produce a JSON object with:\n\
- keywords: the award search keywords (quoted phrases are supported)\n\
- start_date, end_date (optional): YYYY-MM-DD bounds on the award period\n\
- award_types (optional): subset of [\"A\",\"B\",\"C\",\"D\",\"IDV_A\",\"IDV_B\",\
\"IDV_C\",\"IDV_D\",\"IDV_E\"] (A-D are definitive contracts, IDV_* are \
indefinite-delivery vehicles)\n\
This source only covers US federal spending: contracts, grants, and awards. \
If the question has nothing to do with federal spending, set not_applicable \
to true and explain in reason. Output only the JSON object.";

pub struct UsaSpendingIntegration {
    ctx: IntegrationContext,
}

impl UsaSpendingIntegration {
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

/// Validate the model's date fields against the API's constraints
fn validate_dates(params: &QueryParams) -> Result<(), String> {
    let parse = |key: &str| -> Result<Option<NaiveDate>, String> {
        match params.get_str(key) {
            Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| format!("{} '{}' is not YYYY-MM-DD", key, raw)),
            None => Ok(None),
        }
    };
    let start = parse("start_date")?;
    let end = parse("end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err("start_date is after end_date".to_string());
        }
    }
    if let Some(start) = start {
        let floor = Utc::now().date_naive() - chrono::Duration::days(365 * MAX_LOOKBACK_YEARS as i64);
        if start < floor {
            return Err(format!(
                "start_date exceeds the {}-year lookback window",
                MAX_LOOKBACK_YEARS
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl Integration for UsaSpendingIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "USAspending.gov".to_string(),
            category: SourceCategory::GovernmentContracts,
            requires_credential: false,
            estimated_latency_ms: Some(1500),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "US federal award records: contracts, IDVs, grants, and loans with \
                          recipients, amounts, agencies, and periods of performance. Best for \
                          questions about who is being paid to do what for the government."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("keywords", json!({ "type": "string", "minLength": 1 })),
                ("start_date", json!({ "type": "string" })),
                ("end_date", json!({ "type": "string" })),
                (
                    "award_types",
                    json!({
                        "type": "array",
                        "items": { "type": "string", "enum": AWARD_TYPE_CODES }
                    }),
                ),
            ],
            &["keywords"],
        );
        let params = match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema)
            .await?
        {
            Ok(params) => params,
            Err(reason) => return Ok(GeneratedQuery::NotApplicable { reason }),
        };

        if let Err(msg) = validate_dates(&params) {
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

        let keywords = params.get_str("keywords").unwrap_or_default();
        let mut filters = json!({
            "keywords": [keywords],
            "award_type_codes": params
                .get("award_types")
                .cloned()
                .unwrap_or_else(|| json!(AWARD_TYPE_CODES)),
        });
        if let (Some(start), Some(end)) = (params.get_str("start_date"), params.get_str("end_date"))
        {
            filters["time_period"] = json!([{ "start_date": start, "end_date": end }]);
        }

        let body = json!({
            "filters": filters,
            "fields": [
                "Award ID", "Recipient Name", "Description", "Award Amount",
                "Start Date", "Awarding Agency", "generated_internal_id"
            ],
            "limit": limit.min(100),
            "page": 1,
            "sort": "Award Amount",
            "order": "desc"
        });

        let url = format!("{}/api/v2/search/spending_by_award/", self.base_url());
        match http_post_json(SOURCE_ID, &url, &[], &body).await {
            Ok(text) => parse_response(&meta, params, &text, limit, elapsed_ms(started)),
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
    let data: AwardSearchResponse = match serde_json::from_str(body) {
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

    let total = data
        .page_metadata
        .as_ref()
        .and_then(|m| m.total)
        .unwrap_or(data.results.len() as u64);
    let items = data
        .results
        .into_iter()
        .map(|award| {
            let raw = serde_json::to_value(&award).unwrap_or_default();
            let title = match (&award.recipient_name, &award.award_id) {
                (Some(recipient), Some(id)) => format!("{} — {}", recipient, id),
                (Some(recipient), None) => recipient.clone(),
                (None, Some(id)) => id.clone(),
                (None, None) => "Unnamed award".to_string(),
            };
            let url = award
                .generated_internal_id
                .as_deref()
                .map(|id| format!("https://www.usaspending.gov/award/{}", id))
                .unwrap_or_default();
            ResultItem {
                title,
                url,
                date: award.start_date.clone().unwrap_or_default(),
                description: award.description.clone().unwrap_or_default(),
                author: award.awarding_agency.clone(),
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

#[derive(Debug, Deserialize)]
struct AwardSearchResponse {
    #[serde(default)]
    page_metadata: Option<PageMetadata>,
    #[serde(default)]
    results: Vec<AwardRecord>,
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct AwardRecord {
    #[serde(rename = "Award ID", default)]
    award_id: Option<String>,
    #[serde(rename = "Recipient Name", default)]
    recipient_name: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "Start Date", default)]
    start_date: Option<String>,
    #[serde(rename = "Awarding Agency", default)]
    awarding_agency: Option<String>,
    #[serde(default)]
    generated_internal_id: Option<String>,
}
