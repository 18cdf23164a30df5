//! Confidence-gated hybrid classification.
//!
//! ```text
//! GraphAttempted ──▶ ConfidentReturn
//!        │
//!        ▼
//!    Escalate ──▶ Validated
//!        │            ▲
//!        ▼            │
//! RepairAttempted ────┘
//!        │
//!        ▼
//!   SafeFallback
//! ```
//!
//! Every terminal state produces a [`ClassificationResponse`]; the orchestrator never returns an
//! error. A graph failure counts as confidence zero, a generator failure or a second validation
//! failure ends in the safe default.

use clausegraph_core::{ClauseGraphConfig, ClauseGraphError, Result, RiskLevel};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::llm_provider::{GenerationConfig, LLMProvider};
use crate::ml::{GraphPrediction, GraphPredictor};
use crate::risk_schema::{analysis_prompt, repair_prompt, validate_risk_output, RiskAssessment};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.60;
pub const GRAPH_SOURCE: &str = "GNN";
pub const HYBRID_SOURCE: &str = "HYBRID_LLM";

const NO_ESCALATION_NOTE: &str =
    "Graph confidence met the threshold; the generative validator was not consulted.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub text: String,
    /// Overrides the configured confidence threshold for this request
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl ClassificationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            threshold: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// How a generative result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Validated,
    Repaired,
    SafeDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphResult {
    pub used_fallback: bool,
    /// Class index: 0 LOW, 1 MEDIUM, 2 HIGH
    pub risk_level: usize,
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridResult {
    pub used_fallback: bool,
    pub fallback_reason: String,
    pub risk_level: RiskLevel,
    pub issue: String,
    pub explanation: String,
    pub suggested_rewrite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gnn_prediction: Option<GraphPrediction>,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum ClassificationResponse {
    #[serde(rename = "GNN")]
    Graph(GraphResult),
    #[serde(rename = "HYBRID_LLM")]
    Hybrid(HybridResult),
}

impl ClassificationResponse {
    pub fn source(&self) -> &'static str {
        match self {
            ClassificationResponse::Graph(_) => GRAPH_SOURCE,
            ClassificationResponse::Hybrid(_) => HYBRID_SOURCE,
        }
    }

    pub fn used_fallback(&self) -> bool {
        match self {
            ClassificationResponse::Graph(r) => r.used_fallback,
            ClassificationResponse::Hybrid(r) => r.used_fallback,
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        match self {
            ClassificationResponse::Graph(r) => {
                RiskLevel::from_index(r.risk_level).unwrap_or(RiskLevel::Medium)
            }
            ClassificationResponse::Hybrid(r) => r.risk_level,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub confidence_threshold: f32,
    /// Requests in flight during [`HybridClassifier::classify_batch`]
    pub max_concurrent: usize,
    pub graph_timeout: Duration,
    pub llm_timeout: Duration,
    pub generation: GenerationConfig,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_concurrent: 4,
            graph_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(60),
            generation: GenerationConfig::default(),
        }
    }
}

impl From<&ClauseGraphConfig> for HybridOptions {
    fn from(config: &ClauseGraphConfig) -> Self {
        Self {
            confidence_threshold: config.hybrid.confidence_threshold,
            max_concurrent: config.hybrid.max_concurrent,
            graph_timeout: Duration::from_secs(config.embedding.timeout_secs),
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            generation: GenerationConfig {
                temperature: config.llm.temperature,
                max_tokens: Some(config.llm.max_tokens),
                stop: None,
            },
        }
    }
}

/// Why the request left the graph path, plus the graph output if there was one.
#[derive(Debug)]
struct Escalation {
    reason: String,
    graph: Option<GraphPrediction>,
}

#[derive(Debug)]
enum State {
    GraphAttempted,
    ConfidentReturn(GraphPrediction),
    Escalate(Escalation),
    RepairAttempted { escalation: Escalation, invalid_output: String },
    Validated { escalation: Escalation, assessment: RiskAssessment, resolution: Resolution },
    SafeFallback(Escalation),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::GraphAttempted => "graph_attempted",
            State::ConfidentReturn(_) => "confident_return",
            State::Escalate(_) => "escalate",
            State::RepairAttempted { .. } => "repair_attempted",
            State::Validated { .. } => "validated",
            State::SafeFallback(_) => "safe_fallback",
        }
    }
}

pub struct HybridClassifier {
    predictor: Arc<dyn GraphPredictor>,
    validator: Arc<dyn LLMProvider>,
    options: HybridOptions,
}

impl HybridClassifier {
    pub fn new(
        predictor: Arc<dyn GraphPredictor>,
        validator: Arc<dyn LLMProvider>,
        options: HybridOptions,
    ) -> Self {
        Self {
            predictor,
            validator,
            options,
        }
    }

    pub fn options(&self) -> &HybridOptions {
        &self.options
    }

    pub async fn classify_text(&self, text: &str) -> ClassificationResponse {
        self.classify(&ClassificationRequest::new(text)).await
    }

    /// Run one clause through the state machine. Always returns a structured result.
    pub async fn classify(&self, request: &ClassificationRequest) -> ClassificationResponse {
        let text = request.text.as_str();
        let threshold = self.resolve_threshold(request.threshold);
        let mut state = State::GraphAttempted;

        loop {
            debug!(state = state.name(), "Hybrid classifier transition");
            state = match state {
                State::GraphAttempted => match self.attempt_graph(text).await {
                    Ok(prediction) if prediction.confidence >= threshold => {
                        State::ConfidentReturn(prediction)
                    }
                    Ok(prediction) => State::Escalate(Escalation {
                        reason: format!(
                            "GNN confidence {:.2} below threshold {:.2}",
                            prediction.confidence, threshold
                        ),
                        graph: Some(prediction),
                    }),
                    Err(e) => {
                        warn!("Graph prediction failed, treating as confidence 0: {}", e);
                        State::Escalate(Escalation {
                            reason: format!(
                                "GNN prediction failed ({e}); confidence 0.00 below threshold {threshold:.2}"
                            ),
                            graph: None,
                        })
                    }
                },

                State::ConfidentReturn(prediction) => {
                    return ClassificationResponse::Graph(GraphResult {
                        used_fallback: false,
                        risk_level: prediction.risk_level.index(),
                        confidence: prediction.confidence,
                        probabilities: prediction.probabilities,
                        note: NO_ESCALATION_NOTE.to_string(),
                    });
                }

                State::Escalate(escalation) => {
                    info!(reason = %escalation.reason, "Escalating to generative validator");
                    match self.generate(&analysis_prompt(text)).await {
                        Ok(raw) => match validate_risk_output(&raw) {
                            Ok(assessment) => State::Validated {
                                escalation,
                                assessment,
                                resolution: Resolution::Validated,
                            },
                            Err(e) => {
                                debug!("Validator output rejected: {}", e);
                                State::RepairAttempted {
                                    escalation,
                                    invalid_output: raw,
                                }
                            }
                        },
                        Err(e) => {
                            warn!("Generative validator failed: {}", e);
                            State::SafeFallback(escalation)
                        }
                    }
                }

                State::RepairAttempted {
                    escalation,
                    invalid_output,
                } => match self.generate(&repair_prompt(&invalid_output)).await {
                    Ok(raw) => match validate_risk_output(&raw) {
                        Ok(assessment) => State::Validated {
                            escalation,
                            assessment,
                            resolution: Resolution::Repaired,
                        },
                        Err(e) => {
                            warn!("Repaired output still invalid: {}", e);
                            State::SafeFallback(escalation)
                        }
                    },
                    Err(e) => {
                        warn!("Repair request failed: {}", e);
                        State::SafeFallback(escalation)
                    }
                },

                State::Validated {
                    escalation,
                    assessment,
                    resolution,
                } => return hybrid_response(escalation, assessment, resolution),

                State::SafeFallback(escalation) => {
                    warn!("Returning safe default assessment");
                    return hybrid_response(
                        escalation,
                        RiskAssessment::safe_default(text),
                        Resolution::SafeDefault,
                    );
                }
            };
        }
    }

    /// Per-request override, clamped to `[0, 1]`. A NaN override falls back to the configured
    /// threshold.
    fn resolve_threshold(&self, requested: Option<f32>) -> f32 {
        let Some(threshold) = requested else {
            return self.options.confidence_threshold;
        };
        if threshold.is_nan() {
            warn!(
                "Ignoring NaN request threshold, using {:.2}",
                self.options.confidence_threshold
            );
            return self.options.confidence_threshold;
        }
        if !(0.0..=1.0).contains(&threshold) {
            warn!("Request threshold {} outside [0, 1], clamping", threshold);
        }
        threshold.clamp(0.0, 1.0)
    }

    /// Classify many clauses with bounded concurrency; results keep the input order.
    pub async fn classify_batch(
        &self,
        requests: &[ClassificationRequest],
    ) -> Vec<ClassificationResponse> {
        let limit = self.options.max_concurrent.max(1);
        stream::iter(requests.iter().map(|request| self.classify(request)))
            .buffered(limit)
            .collect()
            .await
    }

    async fn attempt_graph(&self, text: &str) -> Result<GraphPrediction> {
        timeout(self.options.graph_timeout, self.predictor.predict(text))
            .await
            .map_err(|_| {
                ClauseGraphError::Timeout(format!(
                    "graph prediction timed out after {:?}",
                    self.options.graph_timeout
                ))
            })?
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = timeout(
            self.options.llm_timeout,
            self.validator
                .generate_with_config(prompt, &self.options.generation),
        )
        .await
        .map_err(|_| {
            ClauseGraphError::Timeout(format!(
                "{} generation timed out after {:?}",
                self.validator.provider_name(),
                self.options.llm_timeout
            ))
        })?
        .map_err(|e| {
            ClauseGraphError::ExternalService(format!(
                "{} generation failed: {}",
                self.validator.provider_name(),
                e
            ))
        })?;
        Ok(response.content)
    }
}

fn hybrid_response(
    escalation: Escalation,
    assessment: RiskAssessment,
    resolution: Resolution,
) -> ClassificationResponse {
    ClassificationResponse::Hybrid(HybridResult {
        used_fallback: true,
        fallback_reason: escalation.reason,
        risk_level: assessment.risk_level,
        issue: assessment.issue,
        explanation: assessment.explanation,
        suggested_rewrite: assessment.suggested_rewrite,
        gnn_prediction: escalation.graph,
        resolution,
    })
}
