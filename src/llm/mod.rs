//! LLM gateway
//!
//! Single entry point for every model call in the engine. The gateway
//! owns the provider client, caps in-flight calls with a semaphore,
//! applies per-call timeouts, and validates every structured output
//! against its call site's schema (one repair re-prompt, then
//! `llm_invalid_output`).

mod anthropic;
mod openai;
pub mod schemas;
mod types;

pub use anthropic::AnthropicClient;
pub use openai::OpenAIClient;
pub use types::*;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{LlmConfig, LlmProviderKind};

/// Output-token budget for structured calls on non-reasoning models
const STRUCTURED_MAX_TOKENS: u32 = 4096;

/// Trait for LLM client implementations
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Non-streaming chat completion
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;

    /// Check if the provider is reachable
    async fn health_check(&self) -> Result<bool, LlmError> {
        Ok(true)
    }
}

/// Create an LLM client for the given gateway configuration
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProviderKind::OpenAI => {
            let api_key = config.api_key.clone().ok_or(LlmError::MissingApiKey)?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            Ok(Box::new(OpenAIClient::new(base_url, Some(api_key))?))
        }
        LlmProviderKind::Anthropic => {
            let api_key = config.api_key.clone().ok_or(LlmError::MissingApiKey)?;
            Ok(Box::new(AnthropicClient::new(api_key)?))
        }
        LlmProviderKind::Custom => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                LlmError::NotConfigured("custom provider requires base_url".to_string())
            })?;
            Ok(Box::new(OpenAIClient::new(
                base_url,
                config.api_key.clone(),
            )?))
        }
    }
}

/// Reasoning-family models reject explicit output-token limits
pub fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5")
}

/// Pull the first JSON object out of a model reply that may carry prose
/// around it
pub fn extract_json_object(response: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(response) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&response[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn looks_like_refusal(response: &str) -> bool {
    let lower = response.to_lowercase();
    ["i can't", "i cannot", "i'm unable", "i am unable", "cannot assist", "can't help"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn validation_errors(schema: &Value, instance: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| format!("schema failed to compile: {}", e))?;
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Gateway wrapping one provider client with concurrency and validation
pub struct LlmGateway {
    client: Box<dyn LlmClient>,
    semaphore: Arc<Semaphore>,
    timeout_seconds: u64,
}

impl LlmGateway {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = create_client(config)?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_parallel.max(1))),
            timeout_seconds: config.timeout_seconds,
            client,
        })
    }

    /// Build a gateway around an existing client (tests, custom hosts)
    pub fn with_client(client: Box<dyn LlmClient>, max_parallel: usize, timeout_seconds: u64) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            timeout_seconds,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    pub async fn health_check(&self) -> Result<bool, LlmError> {
        self.client.health_check().await
    }

    /// One structured call: prompt the model for JSON, validate against the
    /// call site's schema, repair once, and return the validated object.
    pub async fn structured(
        &self,
        call_site: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        schema: &Value,
    ) -> Result<Value, LlmError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LlmError::NotConfigured("gateway closed".to_string()))?;

        let first = self
            .chat_with_timeout(model, vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ])
            .await?;

        let failure = match extract_json_object(&first.content) {
            Some(value) => match validation_errors(schema, &value) {
                Ok(()) => return Ok(value),
                Err(errors) => errors,
            },
            None if looks_like_refusal(&first.content) => {
                return Err(LlmError::Refusal(first.content));
            }
            None => "reply contained no JSON object".to_string(),
        };

        log::warn!(
            "[LlmGateway] {} output invalid, attempting repair: {}",
            call_site,
            failure
        );

        // Exactly one repair attempt: re-prompt with the validator's output
        let repair_prompt = format!(
            "Your previous reply was rejected: {}\n\nReturn ONLY a JSON object that satisfies the \
             requirements. No prose, no code fences.",
            failure
        );
        let second = self
            .chat_with_timeout(model, vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
                ChatMessage::assistant(&first.content),
                ChatMessage::user(&repair_prompt),
            ])
            .await?;

        let value = extract_json_object(&second.content).ok_or_else(|| LlmError::InvalidOutput {
            call_site: call_site.to_string(),
            errors: "repair reply contained no JSON object".to_string(),
        })?;
        validation_errors(schema, &value).map_err(|errors| LlmError::InvalidOutput {
            call_site: call_site.to_string(),
            errors,
        })?;
        Ok(value)
    }

    async fn chat_with_timeout(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatResponse, LlmError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: if is_reasoning_model(model) {
                None
            } else {
                Some(STRUCTURED_MAX_TOKENS)
            },
            temperature: Some(0.2),
        };
        tokio::time::timeout(
            Duration::from_secs(self.timeout_seconds),
            self.client.chat(request),
        )
        .await
        .map_err(|_| LlmError::Timeout(self.timeout_seconds))?
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted LLM client for tests across the crate

    use super::*;
    use std::sync::Mutex;

    type Responder = dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync;

    /// Test client that answers from a closure; records every request
    pub struct ScriptedClient {
        responder: Box<Responder>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        pub fn new(
            responder: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                responder: Box::new(responder),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        fn provider_name(&self) -> &'static str {
            "Scripted"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
            let content = (self.responder)(&request)?;
            self.requests.lock().unwrap().push(request);
            Ok(ChatResponse {
                content,
                finish_reason: "stop".to_string(),
                usage: None,
            })
        }
    }

    /// Gateway over a scripted responder, generous defaults for tests
    pub fn gateway(
        responder: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> LlmGateway {
        LlmGateway::with_client(Box::new(ScriptedClient::new(responder)), 4, 30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_is_reasoning_model() {
        assert!(is_reasoning_model("o1-mini"));
        assert!(is_reasoning_model("o3"));
        assert!(is_reasoning_model("gpt-5.1"));
        assert!(!is_reasoning_model("gpt-4o-mini"));
        assert!(!is_reasoning_model("claude-sonnet-4-5"));
    }

    #[test]
    fn test_extract_json_object() {
        assert!(extract_json_object(r#"{"a": 1}"#).is_some());
        let wrapped = "Here is the plan:\n{\"a\": 1}\nDone.";
        assert_eq!(extract_json_object(wrapped), Some(json!({"a": 1})));
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }

    #[tokio::test]
    async fn test_structured_valid_first_try() {
        let gateway = testing::gateway(|_| Ok(r#"{"score": 8, "reasoning": "on topic"}"#.to_string()));
        let value = gateway
            .structured(
                "relevance_validation",
                "gpt-4o-mini",
                "score the results",
                "items...",
                &schemas::relevance_validation(),
            )
            .await
            .unwrap();
        assert_eq!(value["score"], 8);
    }

    #[tokio::test]
    async fn test_structured_repairs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let gateway = testing::gateway(move |_| {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(r#"{"score": "eight"}"#.to_string())
            } else {
                Ok(r#"{"score": 8, "reasoning": "repaired"}"#.to_string())
            }
        });
        let value = gateway
            .structured(
                "relevance_validation",
                "gpt-4o-mini",
                "score",
                "items",
                &schemas::relevance_validation(),
            )
            .await
            .unwrap();
        assert_eq!(value["reasoning"], "repaired");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_structured_fails_after_second_invalid() {
        let gateway = testing::gateway(|_| Ok(r#"{"score": 99}"#.to_string()));
        let err = gateway
            .structured(
                "relevance_validation",
                "gpt-4o-mini",
                "score",
                "items",
                &schemas::relevance_validation(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidOutput { ref call_site, .. }
            if call_site == "relevance_validation"));
    }

    #[tokio::test]
    async fn test_structured_classifies_refusal() {
        let gateway =
            testing::gateway(|_| Ok("I can't help with planning that research.".to_string()));
        let err = gateway
            .structured(
                "decomposition",
                "gpt-4o-mini",
                "plan",
                "question",
                &schemas::decomposition(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Refusal(_)));
    }

    #[tokio::test]
    async fn test_reasoning_model_has_no_max_tokens() {
        let gateway = testing::gateway(|request| {
            assert!(request.max_tokens.is_none());
            Ok(r#"{"score": 5, "reasoning": "ok"}"#.to_string())
        });
        gateway
            .structured(
                "relevance_validation",
                "gpt-5.1",
                "score",
                "items",
                &schemas::relevance_validation(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_immediately() {
        let gateway = testing::gateway(|_| Err(LlmError::RateLimited("429".to_string())));
        let err = gateway
            .structured(
                "relevance_validation",
                "gpt-4o-mini",
                "score",
                "items",
                &schemas::relevance_validation(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
    }
}
