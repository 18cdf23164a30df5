use crate::llm_provider::*;
use crate::ollama_client::{OllamaClient, OllamaConfig};
use anyhow::{anyhow, Result};
use clausegraph_core::LLMConfig;
use std::sync::Arc;

#[cfg(feature = "openai-compatible")]
use crate::openai_compatible_provider::{OpenAICompatibleConfig, OpenAICompatibleProvider};

/// Factory for creating LLM providers based on configuration
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Create an LLM provider from configuration
    pub fn create_from_config(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        let provider_name = config.provider.to_lowercase();

        match provider_name.as_str() {
            "ollama" => Self::create_ollama_provider(config),
            "openai-compatible" | "lmstudio" => Self::create_openai_compatible_provider(config),
            _ => Err(anyhow!(
                "Unsupported LLM provider: {}. Available providers: {}",
                provider_name,
                Self::supported_providers().join(", ")
            )),
        }
    }

    fn create_ollama_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        Ok(Arc::new(OllamaClient::new(OllamaConfig::from(config))))
    }

    fn create_openai_compatible_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>> {
        #[cfg(feature = "openai-compatible")]
        {
            Ok(Arc::new(OpenAICompatibleProvider::new(
                OpenAICompatibleConfig::from(config),
            )?))
        }

        #[cfg(not(feature = "openai-compatible"))]
        {
            let _ = config;
            Err(anyhow!(
                "The openai-compatible provider requires the 'openai-compatible' feature. \
                 Rebuild with --features openai-compatible or use the 'ollama' provider instead."
            ))
        }
    }

    /// Get a list of supported providers (based on enabled features)
    pub fn supported_providers() -> Vec<&'static str> {
        let mut providers = vec!["ollama"];

        #[cfg(feature = "openai-compatible")]
        providers.push("openai-compatible");

        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_providers() {
        let providers = LLMProviderFactory::supported_providers();
        assert!(providers.contains(&"ollama"));
    }

    #[test]
    fn test_ollama_provider_creation() {
        let config = LLMConfig {
            provider: "ollama".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
            ..Default::default()
        };

        let provider = LLMProviderFactory::create_from_config(&config).unwrap();
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "qwen2.5:7b-instruct");
    }

    #[test]
    fn test_unknown_provider() {
        let config = LLMConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };

        let result = LLMProviderFactory::create_from_config(&config);
        assert!(result
            .err()
            .map(|e| e.to_string().contains("Unsupported LLM provider"))
            .unwrap_or(false));
    }
}
