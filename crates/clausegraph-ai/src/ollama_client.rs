use crate::llm_provider::*;
use anyhow::anyhow;
use async_trait::async_trait;
use clausegraph_core::LLMConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

/// Ollama `/api/generate` client used as the clause risk validator
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub model_name: String,
    pub base_url: String,
    pub context_window: usize,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model_name: "qwen2.5:7b-instruct".to_string(),
            base_url: "http://localhost:11434".to_string(),
            context_window: 8192,
            max_tokens: 1024,
            temperature: 0.1,
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&LLMConfig> for OllamaConfig {
    fn from(config: &LLMConfig) -> Self {
        Self {
            model_name: config.model.clone(),
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
    num_ctx: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    eval_count: Option<usize>,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    done_reason: Option<String>,
}

pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Check that the server answers and has the configured model pulled
    pub async fn check_availability(&self) -> LLMResult<bool> {
        let response = timeout(
            Duration::from_secs(5),
            self.client
                .get(format!("{}/api/tags", self.config.base_url))
                .send(),
        )
        .await
        .map_err(|_| anyhow!("Ollama availability check timeout"))?
        .map_err(|e| anyhow!("Ollama availability check failed: {}", e))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let models: serde_json::Value = response.json().await?;
        let has_model = models["models"]
            .as_array()
            .map(|models| {
                models.iter().any(|model| {
                    model["name"]
                        .as_str()
                        .map(|name| name.starts_with(&self.config.model_name))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);

        info!("Ollama model {} available: {}", self.config.model_name, has_model);
        Ok(has_model)
    }
}

#[async_trait]
impl LLMProvider for OllamaClient {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        // A lone user message is sent verbatim so the prompt reaches the model unchanged
        let prompt = match messages {
            [single] if matches!(single.role, MessageRole::User) => single.content.clone(),
            _ => {
                let transcript = messages
                    .iter()
                    .map(|m| match m.role {
                        MessageRole::System => format!("System: {}", m.content),
                        MessageRole::User => format!("User: {}", m.content),
                        MessageRole::Assistant => format!("Assistant: {}", m.content),
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n");
                format!("{}\n\nAssistant:", transcript)
            }
        };

        let start_time = Instant::now();
        let request = GenerateRequest {
            model: self.config.model_name.clone(),
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens.unwrap_or(self.config.max_tokens),
                num_ctx: self.config.context_window,
                stop: config.stop.clone(),
            },
        };

        debug!("Sending generate request to {}", self.config.base_url);

        let response = timeout(
            self.config.timeout,
            self.client
                .post(format!("{}/api/generate", self.config.base_url))
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| anyhow!("Ollama request timeout after {:?}", self.config.timeout))?
        .map_err(|e| anyhow!("Ollama request failed: {}", e))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Ollama response: {}", e))?;

        debug!(
            "Ollama generation completed: {}ms, completion: {} tokens",
            start_time.elapsed().as_millis(),
            data.eval_count.unwrap_or(0)
        );

        Ok(LLMResponse {
            content: data.response,
            total_tokens: Some(data.prompt_eval_count.unwrap_or(0) + data.eval_count.unwrap_or(0)),
            finish_reason: data.done_reason.or_else(|| Some("stop".to_string())),
            model: self.config.model_name.clone(),
        })
    }

    async fn is_available(&self) -> bool {
        self.check_availability().await.unwrap_or(false)
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: self.config.context_window,
            avg_latency_ms: 2000,
            supports_streaming: true,
        }
    }
}
