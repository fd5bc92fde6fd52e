//! GovInfo integration
//!
//! Full-text search over GPO's document collections: bills, the
//! Congressional Record, the Federal Register backfile, GAO reports,
//! hearings, and public laws. The query grammar supports field operators
//! and Boolean keywords, which pass through unchanged.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::{elapsed_ms, generate_params, http_post_json, Integration, IntegrationContext};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
    SourceErrorKind, SourceMetadata,
};

const DEFAULT_BASE_URL: &str = "https://api.govinfo.gov";
const SOURCE_ID: &str = "govinfo";
const MAX_QUERY_LEN: usize = 1000;

const COLLECTIONS: &[&str] = &[
    "BILLS", "CREC", "FR", "GAOREPORTS", "CHRG", "PLAW", "USCOURTS",
];

const QUERY_PROMPT: &str = "You generate search parameters for the GovInfo full-text \
search API. Given a research question, produce a JSON object with:\n\
- query: the search string; Boolean operators (AND, OR, NOT) and quoted \
phrases are supported and should be used when they sharpen the search\n\
- collection (optional): one of BILLS (bills), CREC (Congressional Record), \
FR (Federal Register), GAOREPORTS (GAO reports), CHRG (hearings), PLAW \
(public laws), USCOURTS (court opinions)\n\
GovInfo holds official US government publications only. If the question \
cannot be answered from those, set not_applicable to true and explain in \
reason. Output only the JSON object.";

pub struct GovInfoIntegration {
    ctx: IntegrationContext,
}

impl GovInfoIntegration {
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
impl Integration for GovInfoIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "GovInfo".to_string(),
            category: SourceCategory::GovernmentDocs,
            requires_credential: true,
            estimated_latency_ms: Some(1500),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "Full text of official US government publications: bills, the \
                          Congressional Record, hearings, GAO reports, public laws, and \
                          court opinions. Best for what Congress and oversight bodies have \
                          said on the record."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("query", json!({ "type": "string", "minLength": 1 })),
                ("collection", json!({ "type": "string", "enum": COLLECTIONS })),
            ],
            &["query"],
        );
        let params = match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema)
            .await?
        {
            Ok(params) => params,
            Err(reason) => return Ok(GeneratedQuery::NotApplicable { reason }),
        };

        if params.get_str("query").unwrap_or_default().len() > MAX_QUERY_LEN {
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
                        "GOVINFO_API_KEY is not set",
                    ),
                    0,
                )
            }
        };

        let mut search_query = params.get_str("query").unwrap_or_default().to_string();
        if let Some(collection) = params.get_str("collection") {
            search_query = format!("{} collection:({})", search_query, collection);
        }

        let body = json!({
            "query": search_query,
            "pageSize": limit.min(100),
            "offsetMark": "*",
            "sorts": [{ "field": "score", "sortOrder": "DESC" }]
        });

        let url = format!("{}/search", self.base_url());
        let headers = [("X-Api-Key", api_key)];
        match http_post_json(SOURCE_ID, &url, &headers, &body).await {
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
    let data: GovInfoResponse = match serde_json::from_str(body) {
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
            let url = doc.result_link.clone().unwrap_or_else(|| {
                doc.package_id
                    .as_deref()
                    .map(|id| format!("https://www.govinfo.gov/app/details/{}", id))
                    .unwrap_or_default()
            });
            let description = doc.collection_code.clone().unwrap_or_default();
            ResultItem {
                title: doc.title.unwrap_or_else(|| "Untitled document".to_string()),
                url,
                date: doc.date_issued.unwrap_or_default(),
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
struct GovInfoResponse {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    results: Vec<GovInfoDocument>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct GovInfoDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    package_id: Option<String>,
    #[serde(default)]
    date_issued: Option<String>,
    #[serde(default)]
    collection_code: Option<String>,
    #[serde(default)]
    result_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_falls_back_to_package_url() {
        let meta = SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "GovInfo".to_string(),
            category: SourceCategory::GovernmentDocs,
            requires_credential: true,
            estimated_latency_ms: None,
            estimated_cost_per_call: None,
            daily_call_limit: None,
            description: String::new(),
            search_strategies: Vec::new(),
        };
        let body = r#"{
            "count": 5,
            "results": [{
                "title": "GAO Report on Hypersonic Weapons Acquisition",
                "packageId": "GAOREPORTS-GAO-26-105",
                "dateIssued": "2026-01-30",
                "collectionCode": "GAOREPORTS"
            }]
        }"#;
        let result = parse_response(&meta, &QueryParams::new(), body, 10, 3);
        assert!(result.success);
        assert_eq!(
            result.items[0].url,
            "https://www.govinfo.gov/app/details/GAOREPORTS-GAO-26-105"
        );
        assert_eq!(result.items[0].description, "GAOREPORTS");
    }
}
