pub mod hybrid;
pub mod llm_factory;
pub mod llm_provider;
pub mod ml;
pub mod ollama_client;
pub mod risk_schema;

#[cfg(feature = "openai-compatible")]
pub mod openai_compatible_provider;

pub use hybrid::*;
pub use llm_factory::LLMProviderFactory;
pub use llm_provider::*;
pub use ollama_client::{OllamaClient, OllamaConfig};
pub use risk_schema::{validate_risk_output, RiskAssessment};

#[cfg(feature = "openai-compatible")]
pub use openai_compatible_provider::{OpenAICompatibleConfig, OpenAICompatibleProvider};
