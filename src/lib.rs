//! argus — investigative research engine
//!
//! Answers natural-language questions and monitors keyword sets over an
//! extensible set of upstream sources. Two execution modes share one
//! engine: on-demand deep research (decompose, search, validate, follow
//! up, synthesize) and scheduled Boolean monitoring (keywords × sources,
//! dedup against prior runs, alert).
//!
//! Front-ends, concrete mail transports, and model providers live outside
//! this crate; the programmatic surface is [`Argus`].

pub mod config;
pub mod dedup;
pub mod executor;
pub mod integrations;
pub mod llm;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod research;

pub use config::{AppConfig, ConfigError};
pub use executor::CancellationToken;
pub use integrations::{Integration, IntegrationFactory, IntegrationRegistry, RegistryError};
pub use models::{QueryResult, ResultItem, SourceMetadata};
pub use monitor::{AlertSummary, BooleanMonitor, MonitorConfig, MonitorError};
pub use research::{DeepResearchEngine, ResearchConstraints, ResearchError, ResearchRun};

use std::sync::Arc;
use thiserror::Error;

use integrations::IntegrationContext;
use llm::LlmGateway;

#[derive(Error, Debug)]
pub enum InitError {
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("LLM gateway error: {0}")]
    LlmError(#[from] llm::LlmError),
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),
}

/// Ids of the built-in integrations, in registration order
pub const BUILTIN_SOURCES: &[&str] = &[
    "usaspending",
    "sam_gov",
    "dvids",
    "usajobs",
    "clearancejobs",
    "govinfo",
    "federal_register",
    "reddit",
    "twitter",
    "discord_archive",
    "brave_search",
];

/// Builder for an [`Argus`] engine; lets hosts add their own integrations
/// before the registry is frozen
pub struct ArgusBuilder {
    config: AppConfig,
    gateway: Option<Arc<LlmGateway>>,
    include_builtin: bool,
    extra: Vec<(String, IntegrationFactory)>,
}

impl ArgusBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            gateway: None,
            include_builtin: true,
            extra: Vec::new(),
        }
    }

    /// Use an existing gateway instead of building one from the config
    pub fn with_gateway(mut self, gateway: Arc<LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Skip the built-in source catalog
    pub fn without_builtin_sources(mut self) -> Self {
        self.include_builtin = false;
        self
    }

    /// Queue a custom integration for validated registration at build time
    pub fn register_integration(mut self, id: &str, factory: IntegrationFactory) -> Self {
        self.extra.push((id.to_string(), factory));
        self
    }

    /// Validate the config, freeze the registry, and produce the engine
    pub fn build(self) -> Result<Argus, InitError> {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(LlmGateway::new(&config.llm)?),
        };

        let mut registry = IntegrationRegistry::new();
        if self.include_builtin {
            register_builtin(&mut registry, &config, &gateway)?;
        }
        for (id, factory) in self.extra {
            registry.register(&id, factory)?;
        }
        let registry = Arc::new(registry);

        Ok(Argus {
            monitor: BooleanMonitor::new(config.clone(), registry.clone(), gateway.clone()),
            config,
            registry,
            gateway,
        })
    }
}

/// Register every enabled built-in integration
fn register_builtin(
    registry: &mut IntegrationRegistry,
    config: &Arc<AppConfig>,
    gateway: &Arc<LlmGateway>,
) -> Result<(), RegistryError> {
    use integrations::brave_search::BraveSearchIntegration;
    use integrations::clearancejobs::ClearanceJobsIntegration;
    use integrations::discord_archive::DiscordArchiveIntegration;
    use integrations::dvids::DvidsIntegration;
    use integrations::federal_register::FederalRegisterIntegration;
    use integrations::govinfo::GovInfoIntegration;
    use integrations::reddit::RedditIntegration;
    use integrations::sam_gov::SamGovIntegration;
    use integrations::twitter::TwitterIntegration;
    use integrations::usajobs::UsaJobsIntegration;
    use integrations::usaspending::UsaSpendingIntegration;

    macro_rules! builtin {
        ($id:literal, $adapter:ident) => {
            if config.integration($id).enabled {
                let ctx = IntegrationContext::new(
                    gateway.clone(),
                    &config.llm.model_query_gen,
                    config.integration($id),
                );
                registry.register(
                    $id,
                    Arc::new(move || {
                        Arc::new($adapter::new(ctx.clone())) as Arc<dyn Integration>
                    }),
                )?;
            } else {
                log::info!("[Argus] Integration '{}' disabled by configuration", $id);
            }
        };
    }

    builtin!("usaspending", UsaSpendingIntegration);
    builtin!("sam_gov", SamGovIntegration);
    builtin!("dvids", DvidsIntegration);
    builtin!("usajobs", UsaJobsIntegration);
    builtin!("clearancejobs", ClearanceJobsIntegration);
    builtin!("govinfo", GovInfoIntegration);
    builtin!("federal_register", FederalRegisterIntegration);
    builtin!("reddit", RedditIntegration);
    builtin!("twitter", TwitterIntegration);
    builtin!("discord_archive", DiscordArchiveIntegration);
    builtin!("brave_search", BraveSearchIntegration);
    Ok(())
}

/// The engine: research runs, monitor runs, and the source catalog
pub struct Argus {
    config: Arc<AppConfig>,
    registry: Arc<IntegrationRegistry>,
    gateway: Arc<LlmGateway>,
    monitor: BooleanMonitor,
}

impl Argus {
    /// Initialize from a config with the built-in source catalog
    pub fn init(config: AppConfig) -> Result<Self, InitError> {
        ArgusBuilder::new(config).build()
    }

    pub fn builder(config: AppConfig) -> ArgusBuilder {
        ArgusBuilder::new(config)
    }

    /// Metadata for every registered source, in registration order
    pub fn list_sources(&self) -> Vec<SourceMetadata> {
        self.registry.list_metadata()
    }

    /// Execute one deep-research run
    pub async fn run_research(
        &self,
        question: &str,
        constraints: ResearchConstraints,
    ) -> Result<ResearchRun, ResearchError> {
        self.run_research_cancellable(question, constraints, &CancellationToken::new())
            .await
    }

    /// Execute one deep-research run with an external cancellation signal
    pub async fn run_research_cancellable(
        &self,
        question: &str,
        constraints: ResearchConstraints,
        cancel: &CancellationToken,
    ) -> Result<ResearchRun, ResearchError> {
        let engine = DeepResearchEngine::new(
            self.config.clone(),
            self.registry.clone(),
            self.gateway.clone(),
        );
        engine.run(question, constraints, cancel).await
    }

    /// Run one configured monitor by name
    pub async fn run_monitor(&self, name: &str) -> Result<AlertSummary, MonitorError> {
        self.monitor.run_by_name(name).await
    }

    /// Run every enabled monitor whose schedule is due
    pub async fn run_due_monitors(&self) -> Result<Vec<AlertSummary>, MonitorError> {
        self.monitor.run_due().await
    }
}
