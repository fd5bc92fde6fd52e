//! X (Twitter) integration
//!
//! Recent-search over public posts. The v2 recent endpoint only reaches
//! back seven days, so generated `start_time` values outside that window
//! are rejected before they hit the API. The X query grammar (quoted
//! phrases, OR, -exclusion) passes through from Boolean keywords.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;

use super::{elapsed_ms, generate_params, http_get, Integration, IntegrationContext};
use crate::llm::schemas;
use crate::models::{
    GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
    SourceErrorKind, SourceMetadata,
};

const DEFAULT_BASE_URL: &str = "https://api.x.com";
const SOURCE_ID: &str = "twitter";
const MAX_QUERY_LEN: usize = 512;
const RECENT_WINDOW_DAYS: i64 = 7;
const TITLE_TRUNCATE: usize = 80;

const QUERY_PROMPT: &str = "You generate search queries for the X (Twitter) v2 recent \
search API. Given a research question, produce a JSON object with:\n\
- query: the search string using X operators where useful: quoted phrases, \
OR, -exclusion, from:user, lang:en\n\
- start_time (optional): RFC3339 lower bound, within the last 7 days (the \
recent endpoint reaches no further back)\n\
X is useful for breaking chatter, OSINT accounts, and official unit or \
agency posts from the last week only. For older events set not_applicable \
to true and explain in reason. Output only the JSON object.";

pub struct TwitterIntegration {
    ctx: IntegrationContext,
}

impl TwitterIntegration {
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

fn validate_start_time(params: &QueryParams, now: DateTime<Utc>) -> Result<(), String> {
    let Some(raw) = params.get_str("start_time") else {
        return Ok(());
    };
    let start = DateTime::parse_from_rfc3339(raw)
        .map_err(|_| format!("start_time '{}' is not RFC3339", raw))?
        .with_timezone(&Utc);
    if start < now - Duration::days(RECENT_WINDOW_DAYS) {
        return Err(format!(
            "start_time is outside the {}-day recent-search window",
            RECENT_WINDOW_DAYS
        ));
    }
    Ok(())
}

#[async_trait]
impl Integration for TwitterIntegration {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "X (Twitter)".to_string(),
            category: SourceCategory::SocialMicroblog,
            requires_credential: true,
            estimated_latency_ms: Some(700),
            estimated_cost_per_call: Some(0.01),
            daily_call_limit: self.ctx.settings.rate_limit_per_day,
            description: "Public posts from the last seven days: breaking chatter, OSINT \
                          trackers, and official unit or agency accounts. Useless for \
                          anything older than a week."
                .to_string(),
            search_strategies: Vec::new(),
        }
    }

    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
        let schema = schemas::query_schema(
            vec![
                (
                    "query",
                    json!({ "type": "string", "minLength": 1, "maxLength": MAX_QUERY_LEN }),
                ),
                ("start_time", json!({ "type": "string" })),
            ],
            &["query"],
        );
        let params = match generate_params(&self.ctx, SOURCE_ID, QUERY_PROMPT, question, &schema)
            .await?
        {
            Ok(params) => params,
            Err(reason) => return Ok(GeneratedQuery::NotApplicable { reason }),
        };

        if let Err(msg) = validate_start_time(&params, Utc::now()) {
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

        let bearer = match self.ctx.settings.api_key.as_deref() {
            Some(token) => format!("Bearer {}", token),
            None => {
                return QueryResult::failure(
                    &meta,
                    params.clone(),
                    SourceError::new(
                        SourceErrorKind::AuthFailed,
                        SOURCE_ID,
                        "X_BEARER_TOKEN is not set",
                    ),
                    0,
                )
            }
        };

        let mut query = vec![
            (
                "query",
                params.get_str("query").unwrap_or_default().to_string(),
            ),
            // The endpoint floor is 10
            ("max_results", limit.clamp(10, 100).to_string()),
            ("tweet.fields", "created_at,author_id".to_string()),
            ("expansions", "author_id".to_string()),
            ("user.fields", "username".to_string()),
        ];
        if let Some(start_time) = params.get_str("start_time") {
            query.push(("start_time", start_time.to_string()));
        }

        let url = format!("{}/2/tweets/search/recent", self.base_url());
        let headers = [("Authorization", bearer.as_str())];
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
    let data: RecentSearchResponse = match serde_json::from_str(body) {
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

    let usernames: HashMap<String, String> = data
        .includes
        .map(|inc| {
            inc.users
                .into_iter()
                .filter_map(|u| Some((u.id?, u.username?)))
                .collect()
        })
        .unwrap_or_default();

    let total = data
        .meta
        .and_then(|m| m.result_count)
        .unwrap_or(data.data.len() as u64);
    let items = data
        .data
        .into_iter()
        .map(|tweet| {
            let raw = serde_json::to_value(&tweet).unwrap_or_default();
            let username = tweet
                .author_id
                .as_ref()
                .and_then(|id| usernames.get(id))
                .cloned();
            let url = match (&username, &tweet.id) {
                (Some(user), Some(id)) => format!("https://x.com/{}/status/{}", user, id),
                (None, Some(id)) => format!("https://x.com/i/web/status/{}", id),
                _ => String::new(),
            };
            let text = tweet.text.clone().unwrap_or_default();
            let title = single_line_prefix(&text, TITLE_TRUNCATE);
            ResultItem {
                title,
                url,
                date: tweet.created_at.clone().unwrap_or_default(),
                description: text,
                author: username.map(|u| format!("@{}", u)),
                source_id: SOURCE_ID.to_string(),
                raw,
            }
        })
        .collect();

    QueryResult::ok(meta, params.clone(), total, items, limit, elapsed)
}

/// First line of `text`, cut at a char boundary no later than `max`
fn single_line_prefix(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.len() <= max {
        return first_line.to_string();
    }
    let cut = (0..=max)
        .rev()
        .find(|&i| first_line.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}…", &first_line[..cut])
}

#[derive(Debug, Deserialize)]
struct RecentSearchResponse {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    meta: Option<SearchMeta>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct Tweet {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    author_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<XUser>,
}

#[derive(Debug, Deserialize)]
struct XUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchMeta {
    #[serde(default)]
    result_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_start_time_window() {
        let now = Utc::now();
        let mut params = QueryParams::new();
        assert!(validate_start_time(&params, now).is_ok());

        params.set("start_time", json!((now - Duration::days(3)).to_rfc3339()));
        assert!(validate_start_time(&params, now).is_ok());

        params.set("start_time", json!((now - Duration::days(30)).to_rfc3339()));
        assert!(validate_start_time(&params, now)
            .unwrap_err()
            .contains("7-day"));

        params.set("start_time", json!("last tuesday"));
        assert!(validate_start_time(&params, now)
            .unwrap_err()
            .contains("RFC3339"));
    }

    #[test]
    fn test_parse_response_joins_usernames() {
        let meta = SourceMetadata {
            id: SOURCE_ID.to_string(),
            display_name: "X (Twitter)".to_string(),
            category: SourceCategory::SocialMicroblog,
            requires_credential: true,
            estimated_latency_ms: None,
            estimated_cost_per_call: None,
            daily_call_limit: None,
            description: String::new(),
            search_strategies: Vec::new(),
        };
        let body = r#"{
            "data": [{
                "id": "190000000000001",
                "text": "Range closure NOTAM posted for next week, looks like another test window.",
                "created_at": "2026-07-28T14:00:00.000Z",
                "author_id": "4242"
            }],
            "includes": { "users": [{ "id": "4242", "username": "rangewatcher" }] },
            "meta": { "result_count": 1 }
        }"#;
        let result = parse_response(&meta, &QueryParams::new(), body, 10, 2);
        assert!(result.success);
        assert_eq!(
            result.items[0].url,
            "https://x.com/rangewatcher/status/190000000000001"
        );
        assert_eq!(result.items[0].author.as_deref(), Some("@rangewatcher"));
        assert!(result.items[0].title.len() <= TITLE_TRUNCATE + '…'.len_utf8());
    }

    #[test]
    fn test_single_line_prefix() {
        assert_eq!(single_line_prefix("short", 10), "short");
        assert_eq!(single_line_prefix("first\nsecond", 10), "first");
        let long = "a".repeat(100);
        let cut = single_line_prefix(&long, 80);
        assert!(cut.ends_with('…'));
    }
}
