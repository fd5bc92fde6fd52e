//! Shared data model for sources, queries, and results
//!
//! Every integration maps its upstream's native shapes into these types so
//! the executor, research engine, and monitor can treat all sources
//! uniformly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Category of an upstream source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SourceCategory {
    GovernmentContracts,
    GovernmentMedia,
    GovernmentJobs,
    ClearedJobs,
    GovernmentDocs,
    GovernmentRegulations,
    SocialForum,
    SocialMicroblog,
    SocialChatArchive,
    WebSearch,
    Other,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::GovernmentContracts => "government-contracts",
            SourceCategory::GovernmentMedia => "government-media",
            SourceCategory::GovernmentJobs => "government-jobs",
            SourceCategory::ClearedJobs => "cleared-jobs",
            SourceCategory::GovernmentDocs => "government-docs",
            SourceCategory::GovernmentRegulations => "government-regulations",
            SourceCategory::SocialForum => "social-forum",
            SourceCategory::SocialMicroblog => "social-microblog",
            SourceCategory::SocialChatArchive => "social-chat-archive",
            SourceCategory::WebSearch => "web-search",
            SourceCategory::Other => "other",
        }
    }
}

/// Reliability ranking of a fallback search strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyReliability {
    High,
    Medium,
    Low,
}

/// Descriptor for one entry in an adapter's ordered fallback chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStrategy {
    /// Adapter method the fallback helper dispatches to
    pub method_name: String,
    pub reliability: StrategyReliability,
    /// Query parameter that must be present for this strategy to apply
    pub required_param: String,
}

/// Immutable description of a source, returned by `Integration::metadata`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Short stable identifier; keys the registry and all log entries
    pub id: String,
    pub display_name: String,
    pub category: SourceCategory,
    pub requires_credential: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_per_call: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_call_limit: Option<u32>,
    /// Free text fed into the source-selection prompt
    pub description: String,
    /// Ordered fallback strategies, empty when the adapter has a single path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_strategies: Vec<SearchStrategy>,
}

/// Parameters an adapter sends upstream, kept for replay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(flatten)]
    pub values: serde_json::Map<String, Value>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(|v| v.as_u64())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values
            .get(key)
            .map(|v| !v.is_null())
            .unwrap_or(false)
    }
}

/// Outcome of `Integration::generate_query`
///
/// `NotApplicable` is a decision, not an error: the model concluded the
/// source cannot help with this question and said why.
#[derive(Debug, Clone)]
pub enum GeneratedQuery {
    Params(QueryParams),
    NotApplicable { reason: String },
}

/// One result, in the uniform cross-source shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub title: String,
    /// Required where the source has one; empty string otherwise
    #[serde(default)]
    pub url: String,
    /// RFC3339, or empty when the source carries no date
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub source_id: String,
    /// Opaque source-native object retained for later extraction
    #[serde(default)]
    pub raw: Value,
}

/// Uniform return from every integration's `execute_search`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub source_id: String,
    pub source_display_name: String,
    pub success: bool,
    /// Count the upstream reports; may exceed `items.len()`
    pub total_upstream: u64,
    pub items: Vec<ResultItem>,
    pub query_params: QueryParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SourceError>,
    pub response_time_ms: u64,
    pub from_cache: bool,
}

impl QueryResult {
    /// Successful result; truncates items to `limit` so no adapter overruns it
    pub fn ok(
        meta: &SourceMetadata,
        params: QueryParams,
        total_upstream: u64,
        mut items: Vec<ResultItem>,
        limit: usize,
        response_time_ms: u64,
    ) -> Self {
        items.truncate(limit);
        Self {
            source_id: meta.id.clone(),
            source_display_name: meta.display_name.clone(),
            success: true,
            total_upstream,
            items,
            query_params: params,
            error: None,
            response_time_ms,
            from_cache: false,
        }
    }

    /// Failed result carrying a classified error
    pub fn failure(
        meta: &SourceMetadata,
        params: QueryParams,
        error: SourceError,
        response_time_ms: u64,
    ) -> Self {
        Self {
            source_id: meta.id.clone(),
            source_display_name: meta.display_name.clone(),
            success: false,
            total_upstream: 0,
            items: Vec::new(),
            query_params: params,
            error: Some(error),
            response_time_ms,
            from_cache: false,
        }
    }
}

/// Classified error kinds shared across the whole engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    AuthFailed,
    RateLimited,
    QuotaExhausted,
    Upstream5xx,
    Upstream4xxOther,
    Timeout,
    Cancelled,
    ParseError,
    LlmInvalidOutput,
    LlmRefusal,
    IntegrationNotApplicable,
    ConfigMissing,
    DeadlineExceeded,
    CriticalSourceFailure,
}

impl SourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceErrorKind::AuthFailed => "auth_failed",
            SourceErrorKind::RateLimited => "rate_limited",
            SourceErrorKind::QuotaExhausted => "quota_exhausted",
            SourceErrorKind::Upstream5xx => "upstream_5xx",
            SourceErrorKind::Upstream4xxOther => "upstream_4xx_other",
            SourceErrorKind::Timeout => "timeout",
            SourceErrorKind::Cancelled => "cancelled",
            SourceErrorKind::ParseError => "parse_error",
            SourceErrorKind::LlmInvalidOutput => "llm_invalid_output",
            SourceErrorKind::LlmRefusal => "llm_refusal",
            SourceErrorKind::IntegrationNotApplicable => "integration_not_applicable",
            SourceErrorKind::ConfigMissing => "config_missing",
            SourceErrorKind::DeadlineExceeded => "deadline_exceeded",
            SourceErrorKind::CriticalSourceFailure => "critical_source_failure",
        }
    }
}

/// A classified source-level error
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{} ({}): {message}", .kind.as_str(), .source_id.as_deref().unwrap_or("-"))]
pub struct SourceError {
    pub kind: SourceErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, source_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: Some(source_id.to_string()),
            message: message.into(),
        }
    }

    pub fn unsourced(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: None,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status into the error taxonomy
    pub fn from_status(source_id: &str, status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => SourceErrorKind::AuthFailed,
            429 => SourceErrorKind::RateLimited,
            s if s >= 500 => SourceErrorKind::Upstream5xx,
            _ => SourceErrorKind::Upstream4xxOther,
        };
        let snippet: String = body.chars().take(300).collect();
        Self::new(kind, source_id, format!("HTTP {}: {}", status, snippet))
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(source_id: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            SourceErrorKind::Timeout
        } else {
            SourceErrorKind::Upstream5xx
        };
        Self::new(kind, source_id, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SourceMetadata {
        SourceMetadata {
            id: "stub".to_string(),
            display_name: "Stub".to_string(),
            category: SourceCategory::Other,
            requires_credential: false,
            estimated_latency_ms: None,
            estimated_cost_per_call: None,
            daily_call_limit: None,
            description: "test source".to_string(),
            search_strategies: Vec::new(),
        }
    }

    fn item(title: &str) -> ResultItem {
        ResultItem {
            title: title.to_string(),
            url: String::new(),
            date: String::new(),
            description: String::new(),
            author: None,
            source_id: "stub".to_string(),
            raw: Value::Null,
        }
    }

    #[test]
    fn test_ok_truncates_to_limit() {
        let items = (0..10).map(|i| item(&format!("r{}", i))).collect();
        let result = QueryResult::ok(&meta(), QueryParams::new(), 10, items, 3, 12);
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.total_upstream, 10);
        assert!(result.success);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            SourceError::from_status("stub", 401, "").kind,
            SourceErrorKind::AuthFailed
        );
        assert_eq!(
            SourceError::from_status("stub", 429, "").kind,
            SourceErrorKind::RateLimited
        );
        assert_eq!(
            SourceError::from_status("stub", 503, "").kind,
            SourceErrorKind::Upstream5xx
        );
        assert_eq!(
            SourceError::from_status("stub", 404, "").kind,
            SourceErrorKind::Upstream4xxOther
        );
    }

    #[test]
    fn test_category_serde_kebab_case() {
        let json = serde_json::to_string(&SourceCategory::GovernmentContracts).unwrap();
        assert_eq!(json, "\"government-contracts\"");
        let parsed: SourceCategory = serde_json::from_str("\"cleared-jobs\"").unwrap();
        assert_eq!(parsed, SourceCategory::ClearedJobs);
    }

    #[test]
    fn test_query_params_accessors() {
        let mut params = QueryParams::new();
        params.set("keywords", serde_json::json!("hypersonics"));
        params.set("limit", serde_json::json!(25));
        params.set("absent", Value::Null);
        assert_eq!(params.get_str("keywords"), Some("hypersonics"));
        assert_eq!(params.get_u64("limit"), Some(25));
        assert!(!params.has("absent"));
        assert!(!params.has("missing"));
    }
}
