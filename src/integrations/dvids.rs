//! DVIDS integration
//!
//! Defense Visual Information Distribution Service: official military news,
//! imagery, and publications with unit and branch attribution.

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

const DEFAULT_BASE_URL: &str = "https://api.dvidshub.net";
const SOURCE_ID: &str = "dvids";

const MEDIA_TYPES: &[&str] = &["news", "image", "video", "audio", "publication_issue"];
const BRANCHES: &[&str] = &["army", "navy", "air_force", "marines", "coast_guard", "joint"];

const QUERY_PROMPT: &str = "You generate search parameters for the DVIDS military media \
API. Given a research question, produce a JSON object with:\n\
- q: the search keywords\n\
- media_type (optional): one of news, image, video, audio, publication_issue \
(default news)\n\
- branch (optional): one of army, navy, air_force, marines, coast_guard, joint\n\
DVIDS carries official US military public-affairs content only. If the \
question is not about US military activities, units, or equipment, set \
not_applicable to true and explain in reason. Output only the JSON object.";

pub struct DvidsIntegration {
    ctx: IntegrationContext,
}

impl DvidsIntegration {
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
impl Integration for DvidsIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "DVIDS".to_string(),
            category: SourceCategory::GovernmentMedia,
            requires_credential: true,
            estimated_latency_ms: Some(1000),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "Official US military public-affairs releases: unit news articles, \
                          photos, video, and publications, credited to the releasing unit. \
                          Best for official accounts of exercises, deployments, and fieldings."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("q", json!({ "type": "string", "minLength": 1 })),
                ("media_type", json!({ "type": "string", "enum": MEDIA_TYPES })),
                ("branch", json!({ "type": "string", "enum": BRANCHES })),
            ],
            &["q"],
        );
        match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema).await? {
            Ok(params) => Ok(GeneratedQuery::Params(params)),
            Err(reason) => Ok(GeneratedQuery::NotApplicable { reason }),
        }
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
                        "DVIDS_API_KEY is not set",
                    ),
                    0,
                )
            }
        };

        let mut query = vec![
            ("api_key", api_key),
            ("q", params.get_str("q").unwrap_or_default().to_string()),
            (
                "type",
                params.get_str("media_type").unwrap_or("news").to_string(),
            ),
            ("max_results", limit.min(50).to_string()),
        ];
        if let Some(branch) = params.get_str("branch") {
            query.push(("branch", branch.to_string()));
        }

        let url = format!("{}/search", self.base_url());
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
    let data: DvidsResponse = match serde_json::from_str(body) {
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
        .page_info
        .as_ref()
        .and_then(|p| p.total_results)
        .unwrap_or(data.results.len() as u64);
    let items = data
        .results
        .into_iter()
        .map(|asset| {
            let raw = serde_json::to_value(&asset).unwrap_or_default();
            let url = asset.url.clone().unwrap_or_else(|| {
                asset
                    .id
                    .as_deref()
                    .map(|id| format!("https://www.dvidshub.net/{}", id.replace(':', "/")))
                    .unwrap_or_default()
            });
            ResultItem {
                title: asset.title,
                url,
                date: asset.date.unwrap_or_default(),
                description: asset.short_description.unwrap_or_default(),
                author: asset.credit,
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

#[derive(Debug, Deserialize)]
struct DvidsResponse {
    #[serde(default)]
    page_info: Option<DvidsPageInfo>,
    #[serde(default)]
    results: Vec<DvidsAsset>,
}

#[derive(Debug, Deserialize)]
struct DvidsPageInfo {
    #[serde(default)]
    total_results: Option<u64>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct DvidsAsset {
    title: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    credit: Option<String>,
    #[serde(default, rename = "type")]
    media_type: Option<String>,
}
