//! Integration adapters for upstream sources
//!
//! One adapter per source, each implementing the four-operation contract:
//! cheap metadata, a fast relevance pre-filter, LLM-backed query generation
//! validated against a source-specific schema, and a search execution that
//! never panics and always returns a classified `QueryResult`.

pub mod brave_search;
pub mod clearancejobs;
pub mod discord_archive;
pub mod dvids;
pub mod fallback;
pub mod federal_register;
pub mod govinfo;
pub mod reddit;
pub mod registry;
pub mod sam_gov;
pub mod twitter;
pub mod usajobs;
pub mod usaspending;

pub use registry::{IntegrationFactory, IntegrationRegistry, RegistryError};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::IntegrationSettings;
use crate::llm::{LlmError, LlmGateway};
use crate::models::{GeneratedQuery, QueryParams, QueryResult, SourceError, SourceMetadata};

/// Default HTTP timeout for upstream calls; the executor imposes its own
/// per-call deadline on top
pub const UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// The four-operation adapter contract
#[async_trait]
pub trait Integration: Send + Sync {
    /// Immutable source description; must not perform I/O
    fn metadata(&self) -> SourceMetadata;

    /// Cheap pre-filter. `true` does not commit to results; `false`
    /// short-circuits this source for the question. Must stay in the
    /// tens-of-milliseconds range — keyword checks, not network calls.
    async fn is_relevant(&self, _question: &str) -> bool {
        true
    }

    /// Ask the model for source-specific query parameters, validated
    /// against this adapter's schema and constraints
    async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError>;

    /// Run the upstream search. Must catch every upstream error and return
    /// `success=false` with a classified error instead of propagating.
    async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult;

    /// Whether a fallback-strategy method name resolves on this adapter.
    /// Only adapters that declare `search_strategies` implement this.
    fn supports_strategy(&self, _method_name: &str) -> bool {
        false
    }
}

/// Everything an adapter instance needs besides its own code
#[derive(Clone)]
pub struct IntegrationContext {
    pub gateway: Arc<LlmGateway>,
    /// Model used for query generation
    pub model: String,
    pub settings: IntegrationSettings,
}

impl IntegrationContext {
    pub fn new(gateway: Arc<LlmGateway>, model: &str, settings: IntegrationSettings) -> Self {
        Self {
            gateway,
            model: model.to_string(),
            settings,
        }
    }
}

/// Shared HTTP client for adapters
pub(crate) fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
        .user_agent("argus-research/0.1")
        .build()
}

/// Run the gateway call shared by every adapter's `generate_query` and
/// split the decline path from the parameter path. The adapter still owns
/// validation of the returned parameters.
pub(crate) async fn generate_params(
    ctx: &IntegrationContext,
    source_id: &str,
    system_prompt: &str,
    question: &str,
    schema: &Value,
) -> Result<Result<QueryParams, String>, SourceError> {
    let call_site = format!("query_gen:{}", source_id);
    let value = ctx
        .gateway
        .structured(&call_site, &ctx.model, system_prompt, question, schema)
        .await
        .map_err(|e| llm_source_error(source_id, &e))?;

    if value
        .get("not_applicable")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("no reason given")
            .to_string();
        return Ok(Err(reason));
    }

    let mut params = QueryParams::from_value(value);
    params.values.remove("not_applicable");
    params.values.remove("reason");
    Ok(Ok(params))
}

pub(crate) fn llm_source_error(source_id: &str, err: &LlmError) -> SourceError {
    SourceError::new(err.kind(), source_id, err.to_string())
}

/// GET an upstream endpoint and return the body, with transport and status
/// failures classified into the shared taxonomy
pub(crate) async fn http_get(
    source_id: &str,
    url: &str,
    headers: &[(&str, &str)],
    query: &[(&str, String)],
) -> Result<String, SourceError> {
    let client = http_client()
        .map_err(|e| SourceError::new(crate::models::SourceErrorKind::Upstream5xx, source_id, e.to_string()))?;
    let mut request = client.get(url).query(query);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request
        .send()
        .await
        .map_err(|e| SourceError::from_reqwest(source_id, &e))?;
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    if !(200..300).contains(&status) {
        return Err(SourceError::from_status(source_id, status, &body));
    }
    Ok(body)
}

/// POST a JSON body to an upstream endpoint; same classification as
/// [`http_get`]
pub(crate) async fn http_post_json(
    source_id: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &Value,
) -> Result<String, SourceError> {
    let client = http_client()
        .map_err(|e| SourceError::new(crate::models::SourceErrorKind::Upstream5xx, source_id, e.to_string()))?;
    let mut request = client.post(url).json(body);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request
        .send()
        .await
        .map_err(|e| SourceError::from_reqwest(source_id, &e))?;
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    if !(200..300).contains(&status) {
        return Err(SourceError::from_status(source_id, status, &text));
    }
    Ok(text)
}

/// Milliseconds elapsed since `start`, saturating
pub(crate) fn elapsed_ms(start: std::time::Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}

// ============================================================================
// Boolean keyword handling
// ============================================================================

/// A monitor keyword reduced to matchable terms for sources without a
/// Boolean operator grammar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordTerms {
    /// Bare terms and quoted phrases; an item matching any of these matches
    pub include: Vec<String>,
    /// `NOT` terms; an item matching any of these is rejected
    pub exclude: Vec<String>,
}

/// Reduce a keyword that may embed quoted phrases and AND/OR/NOT operators
/// to include/exclude term lists. Operators are consumed, not matched:
/// `foo AND "bar baz" NOT qux` yields include [foo, bar baz], exclude [qux].
pub fn parse_boolean_keyword(keyword: &str) -> KeywordTerms {
    let mut terms = KeywordTerms::default();
    let mut rest = keyword.trim();
    let mut negate_next = false;

    while !rest.is_empty() {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let token;
        if let Some(stripped) = rest.strip_prefix('"') {
            match stripped.find('"') {
                Some(end) => {
                    token = stripped[..end].to_string();
                    rest = &stripped[end + 1..];
                }
                None => {
                    token = stripped.to_string();
                    rest = "";
                }
            }
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            token = rest[..end].to_string();
            rest = &rest[end..];
        }

        match token.as_str() {
            "" | "AND" | "OR" => continue,
            "NOT" => {
                negate_next = true;
                continue;
            }
            _ => {}
        }

        let term = token.trim_matches(|c: char| c == ',').to_lowercase();
        if term.is_empty() {
            continue;
        }
        if negate_next || term.starts_with('-') && term.len() > 1 {
            terms
                .exclude
                .push(term.trim_start_matches('-').to_string());
            negate_next = false;
        } else {
            terms.include.push(term);
        }
    }

    terms
}

/// Substring match of an item's text against reduced keyword terms
pub fn matches_keyword(text: &str, terms: &KeywordTerms) -> bool {
    let haystack = text.to_lowercase();
    if terms.exclude.iter().any(|t| haystack.contains(t.as_str())) {
        return false;
    }
    if terms.include.is_empty() {
        return true;
    }
    terms.include.iter().any(|t| haystack.contains(t.as_str()))
}
