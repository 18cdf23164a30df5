pub mod cache;
pub mod error;
pub mod providers;
pub mod similarity;

#[cfg(feature = "ollama")]
pub mod ollama_embedding_provider;

#[cfg(feature = "openai")]
pub mod openai_provider;

pub use cache::*;
pub use providers::*;
pub use similarity::*;

#[cfg(feature = "ollama")]
pub use ollama_embedding_provider::*;

#[cfg(feature = "openai")]
pub use openai_provider::*;

pub use clausegraph_core::{ClauseGraphError, NodeId, Result};
pub use error::VectorError;
