use async_trait::async_trait;
use clausegraph_ai::risk_schema::{SAFE_DEFAULT_EXPLANATION, SAFE_DEFAULT_ISSUE};
use clausegraph_ai::{
    ClassificationRequest, ClassificationResponse, GenerationConfig, HybridClassifier,
    HybridOptions, LLMProvider, LLMResponse, LLMResult, Message, ProviderCharacteristics,
    Resolution,
};
use clausegraph_ai::ml::{GraphPrediction, GraphPredictor};
use clausegraph_core::{ClauseGraphError, Result, RiskLevel};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const CLAUSE: &str = "Either party may terminate this agreement with only 3 days of notice.";

const HIGH_RISK_JSON: &str = r#"{"risk_level":"HIGH","issue":"Very short termination notice","explanation":"Three days leaves no time to transition services.","suggested_rewrite":"Either party may terminate this agreement with at least 30 days written notice."}"#;

/// Graph stage double returning a fixed distribution, or failing.
struct FixedPredictor {
    probabilities: Option<Vec<f32>>,
    delay: Duration,
}

impl FixedPredictor {
    fn confident(probabilities: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            probabilities: Some(probabilities),
            delay: Duration::ZERO,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            probabilities: None,
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl GraphPredictor for FixedPredictor {
    async fn predict(&self, _text: &str) -> Result<GraphPrediction> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let probabilities = self
            .probabilities
            .clone()
            .ok_or_else(|| ClauseGraphError::ExternalService("embedding service down".into()))?;
        let (class, &confidence) = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        Ok(GraphPrediction {
            risk_level: RiskLevel::from_index(class).unwrap(),
            confidence,
            probabilities,
            neighbors: vec![0, 1, 2],
        })
    }
}

/// Validator double replaying scripted outputs and recording prompts.
struct ScriptedValidator {
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedValidator {
    fn new(replies: Vec<std::result::Result<&str, &str>>) -> Arc<Self> {
        Self::with_delay(replies, Duration::ZERO)
    }

    fn with_delay(replies: Vec<std::result::Result<&str, &str>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedValidator {
    async fn generate_chat(
        &self,
        messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        self.prompts
            .lock()
            .push(messages.last().map(|m| m.content.clone()).unwrap_or_default());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()));
        match reply {
            Ok(content) => Ok(LLMResponse {
                content,
                total_tokens: None,
                finish_reason: Some("stop".to_string()),
                model: "scripted".to_string(),
            }),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: 4096,
            avg_latency_ms: 0,
            supports_streaming: false,
        }
    }
}

fn classifier(
    predictor: Arc<dyn GraphPredictor>,
    validator: Arc<ScriptedValidator>,
) -> HybridClassifier {
    HybridClassifier::new(predictor, validator, HybridOptions::default())
}

fn hybrid(response: ClassificationResponse) -> clausegraph_ai::HybridResult {
    match response {
        ClassificationResponse::Hybrid(result) => result,
        other => panic!("expected hybrid result, got {other:?}"),
    }
}

#[tokio::test]
async fn low_confidence_escalates_to_validated_llm_answer() {
    let validator = ScriptedValidator::new(vec![Ok(HIGH_RISK_JSON)]);
    let classifier = classifier(
        FixedPredictor::confident(vec![0.30, 0.28, 0.42]),
        validator.clone(),
    );

    let response = classifier.classify_text(CLAUSE).await;
    assert_eq!(response.source(), "HYBRID_LLM");
    assert!(response.used_fallback());

    let result = hybrid(response);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert_eq!(result.resolution, Resolution::Validated);
    assert_eq!(result.fallback_reason, "GNN confidence 0.42 below threshold 0.60");
    assert_eq!(result.gnn_prediction.unwrap().confidence, 0.42);

    let prompts = validator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].ends_with(CLAUSE));
}

#[tokio::test]
async fn confident_graph_prediction_skips_validator() {
    let validator = ScriptedValidator::new(vec![]);
    let classifier = classifier(
        FixedPredictor::confident(vec![0.05, 0.14, 0.81]),
        validator.clone(),
    );

    let response = classifier.classify_text(CLAUSE).await;
    assert_eq!(response.source(), "GNN");
    assert!(!response.used_fallback());
    match response {
        ClassificationResponse::Graph(result) => {
            assert_eq!(result.risk_level, 2);
            assert_eq!(result.probabilities.len(), 3);
            assert!((result.probabilities.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        other => panic!("expected graph result, got {other:?}"),
    }
    assert!(validator.prompts().is_empty());
}

#[tokio::test]
async fn malformed_output_twice_returns_safe_default() {
    let validator = ScriptedValidator::new(vec![
        Ok("risk: HIGH"),
        Ok(r#"{"risk_level":"SEVERE","issue":"x","explanation":"y","suggested_rewrite":"z"}"#),
    ]);
    let classifier = classifier(
        FixedPredictor::confident(vec![0.4, 0.35, 0.25]),
        validator.clone(),
    );

    let result = hybrid(classifier.classify_text(CLAUSE).await);
    assert_eq!(result.risk_level, RiskLevel::Medium);
    assert_eq!(result.issue, SAFE_DEFAULT_ISSUE);
    assert_eq!(result.explanation, SAFE_DEFAULT_EXPLANATION);
    assert_eq!(result.suggested_rewrite, CLAUSE);
    assert_eq!(result.resolution, Resolution::SafeDefault);

    let prompts = validator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].ends_with("Invalid output:\nrisk: HIGH"));
}

#[tokio::test]
async fn repair_can_rescue_invalid_output() {
    let fenced = format!("```json\n{HIGH_RISK_JSON}\n```");
    let validator = ScriptedValidator::new(vec![
        Ok(r#"{"risk_level":"HIGH","issue":"x"}"#),
        Ok(fenced.as_str()),
    ]);
    let classifier = classifier(FixedPredictor::confident(vec![0.5, 0.3, 0.2]), validator);

    let result = hybrid(classifier.classify_text(CLAUSE).await);
    assert_eq!(result.resolution, Resolution::Repaired);
    assert_eq!(result.risk_level, RiskLevel::High);
}

#[tokio::test]
async fn graph_failure_counts_as_zero_confidence() {
    let validator = ScriptedValidator::new(vec![Ok(HIGH_RISK_JSON)]);
    let classifier = classifier(FixedPredictor::failing(), validator);

    let result = hybrid(classifier.classify_text(CLAUSE).await);
    assert!(result.gnn_prediction.is_none());
    assert!(result.fallback_reason.contains("embedding service down"));
    assert_eq!(result.resolution, Resolution::Validated);
}

#[tokio::test]
async fn validator_errors_end_in_safe_default() {
    let validator = ScriptedValidator::new(vec![Err("connection refused")]);
    let classifier = classifier(FixedPredictor::failing(), validator.clone());

    let result = hybrid(classifier.classify_text(CLAUSE).await);
    assert_eq!(result.resolution, Resolution::SafeDefault);
    assert_eq!(result.suggested_rewrite, CLAUSE);
    assert_eq!(validator.prompts().len(), 1);
}

#[tokio::test]
async fn failed_repair_call_returns_safe_default() {
    let validator = ScriptedValidator::new(vec![Ok("not json"), Err("connection refused")]);
    let classifier = classifier(
        FixedPredictor::confident(vec![0.4, 0.35, 0.25]),
        validator.clone(),
    );

    let result = hybrid(classifier.classify_text(CLAUSE).await);
    assert_eq!(result.resolution, Resolution::SafeDefault);
    assert_eq!(result.risk_level, RiskLevel::Medium);
    assert_eq!(result.suggested_rewrite, CLAUSE);

    let prompts = validator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].ends_with("Invalid output:\nnot json"));
}

#[tokio::test]
async fn slow_validator_times_out_into_safe_default() {
    let validator =
        ScriptedValidator::with_delay(vec![Ok(HIGH_RISK_JSON)], Duration::from_millis(200));
    let options = HybridOptions {
        llm_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let classifier = HybridClassifier::new(
        FixedPredictor::confident(vec![0.4, 0.35, 0.25]),
        validator.clone(),
        options,
    );

    let result = hybrid(classifier.classify_text(CLAUSE).await);
    assert_eq!(result.resolution, Resolution::SafeDefault);
    assert_eq!(result.suggested_rewrite, CLAUSE);
    assert_eq!(validator.prompts().len(), 1);
}

#[tokio::test]
async fn nan_request_threshold_uses_configured_default() {
    let validator = ScriptedValidator::new(vec![]);
    let classifier = classifier(
        FixedPredictor::confident(vec![0.05, 0.14, 0.81]),
        validator.clone(),
    );

    let request = ClassificationRequest::new(CLAUSE).with_threshold(f32::NAN);
    assert_eq!(classifier.classify(&request).await.source(), "GNN");
    assert!(validator.prompts().is_empty());
}

#[tokio::test]
async fn out_of_range_request_threshold_is_clamped() {
    let validator = ScriptedValidator::new(vec![]);
    let classifier = classifier(FixedPredictor::confident(vec![0.0, 0.0, 1.0]), validator.clone());

    let above = ClassificationRequest::new(CLAUSE).with_threshold(1.5);
    assert_eq!(classifier.classify(&above).await.source(), "GNN");

    let low = HybridClassifier::new(
        FixedPredictor::confident(vec![0.3, 0.28, 0.42]),
        validator.clone(),
        HybridOptions::default(),
    );
    let below = ClassificationRequest::new(CLAUSE).with_threshold(-0.5);
    assert_eq!(low.classify(&below).await.source(), "GNN");
    assert!(validator.prompts().is_empty());
}

#[tokio::test]
async fn request_threshold_overrides_default() {
    let validator = ScriptedValidator::new(vec![]);
    let classifier = classifier(
        FixedPredictor::confident(vec![0.3, 0.28, 0.42]),
        validator,
    );

    let request = ClassificationRequest::new(CLAUSE).with_threshold(0.4);
    assert_eq!(classifier.classify(&request).await.source(), "GNN");
}

#[tokio::test]
async fn slow_graph_stage_times_out_into_escalation() {
    let predictor = Arc::new(FixedPredictor {
        probabilities: Some(vec![0.0, 0.0, 1.0]),
        delay: Duration::from_millis(200),
    });
    let validator = ScriptedValidator::new(vec![Ok(HIGH_RISK_JSON)]);
    let options = HybridOptions {
        graph_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let classifier = HybridClassifier::new(predictor, validator, options);

    let response = classifier.classify_text(CLAUSE).await;
    assert_eq!(response.source(), "HYBRID_LLM");
    assert!(hybrid(response).fallback_reason.contains("timed out"));
}

#[tokio::test]
async fn batch_preserves_input_order() {
    let replies: Vec<std::result::Result<&str, &str>> = vec![Ok(HIGH_RISK_JSON); 6];
    let validator = ScriptedValidator::new(replies);
    let classifier = classifier(
        FixedPredictor::confident(vec![0.5, 0.3, 0.2]),
        validator,
    );

    let requests: Vec<ClassificationRequest> = (0..6)
        .map(|i| {
            let request = ClassificationRequest::new(format!("clause {i}"));
            if i % 2 == 0 {
                request.with_threshold(0.1)
            } else {
                request
            }
        })
        .collect();

    let responses = classifier.classify_batch(&requests).await;
    assert_eq!(responses.len(), 6);
    for (i, response) in responses.iter().enumerate() {
        let expected = if i % 2 == 0 { "GNN" } else { "HYBRID_LLM" };
        assert_eq!(response.source(), expected, "request {i}");
    }
}
