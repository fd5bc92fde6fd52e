//! Process-lifetime catalog of integration factories
//!
//! Populated once during startup, then shared read-only. Each lookup
//! produces a fresh short-lived adapter instance so per-query state never
//! leaks across cohorts. Registration validates the adapter contract and
//! fails initialization on violation.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::Integration;
use crate::models::SourceMetadata;

/// Produces a fresh adapter instance per invocation
pub type IntegrationFactory = Arc<dyn Fn() -> Arc<dyn Integration> + Send + Sync>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("integration '{0}' is already registered")]
    DuplicateId(String),
    #[error("registration id '{registered}' does not match metadata id '{metadata}'")]
    IdMismatch { registered: String, metadata: String },
    #[error("integration '{id}' declares strategy method '{method}' that does not resolve")]
    UnresolvedStrategy { id: String, method: String },
    #[error("unknown integration '{0}'")]
    UnknownId(String),
}

struct Entry {
    metadata: SourceMetadata,
    factory: IntegrationFactory,
}

/// Source-id keyed adapter catalog
#[derive(Default)]
pub struct IntegrationRegistry {
    entries: HashMap<String, Entry>,
    /// Registration order, preserved for stable listings
    order: Vec<String>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register an adapter factory under `id`.
    ///
    /// Violations are initialization failures: callers are expected to
    /// propagate them and abort startup.
    pub fn register(&mut self, id: &str, factory: IntegrationFactory) -> Result<(), RegistryError> {
        if self.entries.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }

        let probe = factory();
        let metadata = probe.metadata();
        if metadata.id != id {
            return Err(RegistryError::IdMismatch {
                registered: id.to_string(),
                metadata: metadata.id,
            });
        }
        for strategy in &metadata.search_strategies {
            if !probe.supports_strategy(&strategy.method_name) {
                return Err(RegistryError::UnresolvedStrategy {
                    id: id.to_string(),
                    method: strategy.method_name.clone(),
                });
            }
        }
        // The description doubles as the source-selection prompt text
        if metadata.description.trim().is_empty() {
            log::warn!(
                "[Registry] Integration '{}' has no description for source selection",
                id
            );
        }

        log::info!(
            "[Registry] Registered integration '{}' ({})",
            id,
            metadata.category.as_str()
        );
        self.order.push(id.to_string());
        self.entries.insert(id.to_string(), Entry { metadata, factory });
        Ok(())
    }

    /// Fresh adapter instance for one query
    pub fn instantiate(&self, id: &str) -> Result<Arc<dyn Integration>, RegistryError> {
        self.entries
            .get(id)
            .map(|entry| (entry.factory)())
            .ok_or_else(|| RegistryError::UnknownId(id.to_string()))
    }

    /// Metadata snapshots in registration order
    pub fn list_metadata(&self) -> Vec<SourceMetadata> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.metadata.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stub integrations shared by executor, research, and monitor tests

    use super::*;
    use crate::models::{
        GeneratedQuery, QueryParams, QueryResult, ResultItem, SourceCategory, SourceError,
        SourceErrorKind,
    };
    use async_trait::async_trait;
    use serde_json::json;

    /// What a stub integration should do on `execute_search`
    #[derive(Debug, Clone)]
    pub enum StubBehavior {
        /// Return `count` items titled `<id>-item-<n>`
        Items(usize),
        /// Return exactly these items
        Fixed(Vec<ResultItem>),
        /// Return success with zero items
        Empty,
        /// Return a classified failure
        Fail(SourceErrorKind),
        /// Declare the source not applicable at query generation
        NotApplicable,
        /// Report irrelevant at the pre-filter
        Irrelevant,
    }

    pub struct StubIntegration {
        pub id: String,
        pub behavior: StubBehavior,
    }

    impl StubIntegration {
        pub fn new(id: &str, behavior: StubBehavior) -> Self {
            Self {
                id: id.to_string(),
                behavior,
            }
        }

        pub fn factory(id: &'static str, behavior: StubBehavior) -> IntegrationFactory {
            Arc::new(move || {
                Arc::new(StubIntegration::new(id, behavior.clone())) as Arc<dyn Integration>
            })
        }

        pub fn item(&self, n: usize) -> ResultItem {
            ResultItem {
                title: format!("{}-item-{}", self.id, n),
                url: format!("https://example.com/{}/{}", self.id, n),
                date: "2026-07-01T00:00:00Z".to_string(),
                description: format!("stub result {} from {}", n, self.id),
                author: None,
                source_id: self.id.clone(),
                raw: json!({ "n": n }),
            }
        }
    }

    #[async_trait]
    impl Integration for StubIntegration {
        fn metadata(&self) -> SourceMetadata {
            SourceMetadata {
                id: self.id.clone(),
                display_name: format!("Stub {}", self.id),
                category: SourceCategory::Other,
                requires_credential: false,
                estimated_latency_ms: Some(1),
                estimated_cost_per_call: None,
                daily_call_limit: None,
                description: format!("stub source {}", self.id),
                search_strategies: Vec::new(),
            }
        }

        async fn is_relevant(&self, _question: &str) -> bool {
            !matches!(self.behavior, StubBehavior::Irrelevant)
        }

        async fn generate_query(&self, question: &str) -> Result<GeneratedQuery, SourceError> {
            if matches!(self.behavior, StubBehavior::NotApplicable) {
                return Ok(GeneratedQuery::NotApplicable {
                    reason: "stub declines".to_string(),
                });
            }
            let mut params = QueryParams::new();
            params.set("q", json!(question));
            Ok(GeneratedQuery::Params(params))
        }

        async fn execute_search(&self, params: &QueryParams, limit: usize) -> QueryResult {
            let meta = self.metadata();
            match &self.behavior {
                StubBehavior::Items(count) => {
                    let items = (0..*count).map(|n| self.item(n)).collect();
                    QueryResult::ok(&meta, params.clone(), *count as u64, items, limit, 1)
                }
                StubBehavior::Fixed(items) => {
                    let mut items = items.clone();
                    for item in &mut items {
                        item.source_id = self.id.clone();
                    }
                    let total = items.len() as u64;
                    QueryResult::ok(&meta, params.clone(), total, items, limit, 1)
                }
                StubBehavior::Empty => {
                    QueryResult::ok(&meta, params.clone(), 0, Vec::new(), limit, 1)
                }
                StubBehavior::Fail(kind) => QueryResult::failure(
                    &meta,
                    params.clone(),
                    SourceError::new(*kind, &self.id, "stub failure"),
                    1,
                ),
                StubBehavior::NotApplicable | StubBehavior::Irrelevant => {
                    QueryResult::ok(&meta, params.clone(), 0, Vec::new(), limit, 1)
                }
            }
        }
    }
}
