//! Reddit integration
//!
//! Public search over reddit's JSON endpoints, optionally scoped to one
//! subreddit. No credential for read-only search.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

use super::{elapsed_ms, generate_params, http_get, Integration, IntegrationContext};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
    SourceErrorKind, SourceMetadata,
};

const DEFAULT_BASE_URL: &str = "https://www.reddit.com";
const SOURCE_ID: &str = "reddit";
const MAX_QUERY_LEN: usize = 512;
const DESCRIPTION_TRUNCATE: usize = 500;

const SORTS: &[&str] = &["relevance", "new", "top"];
const TIME_WINDOWS: &[&str] = &["hour", "day", "week", "month", "year", "all"];

const QUERY_PROMPT: &str = "You generate search parameters for reddit's public search. \
Given a research question, produce a JSON object with:\n\
- query: the search string (quoted phrases supported)\n\
- subreddit (optional): a single subreddit name without the r/ prefix, only \
when an obviously on-topic community exists (e.g. army, SecurityClearance, \
spacex)\n\
- sort (optional): relevance, new, or top (default relevance)\n\
- time (optional): hour, day, week, month, year, or all\n\
Reddit is useful for practitioner chatter, rumors, and first-hand accounts, \
not official records. If community discussion cannot help, set \
not_applicable to true and explain in reason. Output only the JSON object.";

pub struct RedditIntegration {
    ctx: IntegrationContext,
}

impl RedditIntegration {
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

fn valid_subreddit(name: &str) -> bool {
    name.len() >= 2
        && name.len() <= 21
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl Integration for RedditIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "Reddit".to_string(),
            category: SourceCategory::SocialForum,
            requires_credential: false,
            estimated_latency_ms: Some(900),
            estimated_cost_per_call: None,
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "Public forum discussion: practitioner chatter, rumors, and \
                          first-hand accounts from communities like r/army or \
                          r/SecurityClearance. Unofficial by nature; good for ground truth \
                          the press release leaves out."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                ("query", json!({ "type": "string", "minLength": 1 })),
                ("subreddit", json!({ "type": "string" })),
                ("sort", json!({ "type": "string", "enum": SORTS })),
                ("time", json!({ "type": "string", "enum": TIME_WINDOWS })),
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
        if let Some(subreddit) = params.get_str("subreddit") {
            if !valid_subreddit(subreddit) {
                return Err(SourceError::new(
                    SourceErrorKind::LlmInvalidOutput,
                    SOURCE_ID,
                    format!("'{}' is not a valid subreddit name", subreddit),
                ));
            }
        }
        Ok(GeneratedQuery::Params(params))
    }

    async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult {
        let meta = self.metadata();
        let started = Instant::now();

        let mut query = vec![
            (
                "q",
                params.get_str("query").unwrap_or_default().to_string(),
            ),
            ("limit", limit.min(100).to_string()),
            (
                "sort",
                params.get_str("sort").unwrap_or("relevance").to_string(),
            ),
            ("raw_json", "1".to_string()),
        ];
        if let Some(time) = params.get_str("time") {
            query.push(("t", time.to_string()));
        }

        let url = match params.get_str("subreddit") {
            Some(subreddit) => {
                query.push(("restrict_sr", "1".to_string()));
                format!("{}/r/{}/search.json", self.base_url(), subreddit)
            }
            None => format!("{}/search.json", self.base_url()),
        };

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
    let data: RedditListing = match serde_json::from_str(body) {
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

    let listing = data.data.unwrap_or_default();
    let total = listing.dist.unwrap_or(listing.children.len() as u64);
    let items = listing
        .children
        .into_iter()
        .map(|child| {
            let post = child.data;
            let raw = serde_json::to_value(&post).unwrap_or_default();
            let date = post
                .created_utc
                .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single())
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            let mut description = post.selftext.clone().unwrap_or_default();
            if description.len() > DESCRIPTION_TRUNCATE {
                description.truncate(
                    (0..=DESCRIPTION_TRUNCATE)
                        .rev()
                        .find(|&i| description.is_char_boundary(i))
                        .unwrap_or(0),
                );
            }
            ResultItem {
                title: post.title.clone().unwrap_or_default(),
                url: post
                    .permalink
                    .as_deref()
                    .map(|p| format!("https://www.reddit.com{}", p))
                    .unwrap_or_default(),
                date,
                description,
                author: post.author.clone().map(|a| format!("u/{}", a)),
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

#[derive(Debug, Deserialize)]
struct RedditListing {
    #[serde(default)]
    data: Option<RedditListingData>,
}

#[derive(Debug, Default, Deserialize)]
struct RedditListingData {
    #[serde(default)]
    dist: Option<u64>,
    #[serde(default)]
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditPost,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct RedditPost {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    subreddit: Option<String>,
}
